// SPDX-License-Identifier: MPL-2.0

//! Synchronization daemon example.
//!
//! Connects to the feed service, keeps the device store in sync and prints
//! every committed change along with a weekly power summary.
//!
//! # Usage
//!
//! ```bash
//! # Configuration from the environment
//! AIO_USERNAME=alice AIO_KEY=aio_xxx cargo run --example sync_daemon
//!
//! # Configuration from a JSON file
//! cargo run --example sync_daemon -- feedlink.config.json
//!
//! # Register a device before starting
//! AIO_USERNAME=alice AIO_KEY=aio_xxx cargo run --example sync_daemon -- --add porch-light "Porch light" 40
//! ```
//!
//! Set `RUST_LOG=feedlink=debug` for detailed logs.

use std::env;
use std::time::Duration;

use feedlink::config::SyncConfig;
use feedlink::manager::SyncService;
use feedlink::state::{Device, PowerFilter};
use feedlink::store::{JsonFileRepository, Repository};
use feedlink::types::FeedKey;
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("feedlink=info")))
        .init();

    let args: Vec<String> = env::args().skip(1).collect();

    let config = match args.first() {
        Some(path) if !path.starts_with("--") => SyncConfig::load(path).await?,
        _ => SyncConfig::from_env()?,
    };

    if let Some(pos) = args.iter().position(|a| a == "--add") {
        let feed = args.get(pos + 1).ok_or("--add needs a feed key")?;
        let name = args.get(pos + 2).map_or(feed.as_str(), String::as_str);
        let mut device = Device::new(FeedKey::new(feed.as_str())?, name);
        if let Some(watts) = args.get(pos + 3) {
            device = device.with_rated_power(watts.parse()?);
        }

        let repo = JsonFileRepository::open(config.store_path.clone()).await?;
        repo.insert_device(device.clone()).await?;
        println!("Registered {} on feed '{}'", device.name(), device.feed_key());
    }

    let service = SyncService::start(&config).await?;

    match service.feed().wait_connected(Duration::from_secs(30)).await {
        Ok(()) => println!("Connected to {}", service.feed().host()),
        Err(e) => eprintln!("Still connecting in the background: {e}"),
    }

    for device in service.store().devices().await? {
        println!(
            "  {:<20} {:<20} {:>4}",
            device.name(),
            device.feed_key().as_str(),
            device.state()
        );
    }

    let mut events = service.subscribe();
    let mut summary = tokio::time::interval(Duration::from_secs(60));

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(event) => {
                    let name = service
                        .store()
                        .device(event.device_id)
                        .await
                        .map_or_else(|_| event.device_id.to_string(), |d| d.name().to_string());
                    println!("[{}] {name} -> {} ({})", event.timestamp.format("%H:%M:%S"), event.state, event.origin);
                }
                Err(RecvError::Lagged(n)) => eprintln!("Missed {n} events"),
                Err(RecvError::Closed) => break,
            },
            _ = summary.tick() => {
                let report = service.store().power(PowerFilter::Week, chrono::Utc::now()).await?;
                println!(
                    "Power now: {} W, this week: {} kWh",
                    report.current_power_w, report.total_energy_kwh
                );
            }
            _ = tokio::signal::ctrl_c() => {
                println!("Shutting down...");
                break;
            }
        }
    }

    service.shutdown().await?;
    Ok(())
}
