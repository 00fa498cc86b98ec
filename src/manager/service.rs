// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Fully wired synchronization service.

use std::sync::Arc;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use super::{CommandGateway, FeedBridge, Scheduler};
use crate::config::SyncConfig;
use crate::event::{EventBus, SyncEvent};
use crate::guard::EchoGuard;
use crate::protocol::MqttFeed;
use crate::store::{JsonFileRepository, Repository, StateStore};
use crate::Result;

/// The synchronization service with all of its background tasks.
///
/// Starting the service opens the store, connects the MQTT feed, subscribes
/// to every device feed and spawns the inbound bridge, the scheduler and,
/// when configured, the webhook forwarder and a one-off REST resync. Each
/// broker acknowledgement re-reads the device list, so devices added while
/// running are subscribed after the next reconnect.
///
/// # Examples
///
/// ```no_run
/// use feedlink::config::SyncConfig;
/// use feedlink::manager::{SyncService, ToggleRequest};
///
/// #[tokio::main]
/// async fn main() -> feedlink::Result<()> {
///     let config = SyncConfig::from_env()?;
///     let service = SyncService::start(&config).await?;
///
///     let mut events = service.subscribe();
///     tokio::spawn(async move {
///         while let Ok(event) = events.recv().await {
///             println!("{} is now {}", event.device_id, event.state);
///         }
///     });
///
///     tokio::signal::ctrl_c().await.ok();
///     service.shutdown().await
/// }
/// ```
#[derive(Debug)]
pub struct SyncService {
    store: StateStore,
    gateway: CommandGateway,
    feed: MqttFeed,
    tasks: Vec<JoinHandle<()>>,
}

impl SyncService {
    /// Starts the service with a JSON file store at `config.store_path`.
    ///
    /// # Errors
    ///
    /// Returns configuration, store and transport errors.
    pub async fn start(config: &SyncConfig) -> Result<Self> {
        let repo = JsonFileRepository::open(config.store_path.clone()).await?;
        Self::start_with_repository(config, Arc::new(repo)).await
    }

    /// Starts the service over an existing repository.
    ///
    /// # Errors
    ///
    /// Returns `ValueError::MissingField` for incomplete feed settings and
    /// store or transport errors.
    pub async fn start_with_repository(config: &SyncConfig, repo: Arc<dyn Repository>) -> Result<Self> {
        config.feed.validate()?;

        let events = EventBus::with_capacity(config.event_capacity.max(1));
        let store = StateStore::new(repo, events.clone());
        let guard = EchoGuard::new(config.echo_ttl);

        let (feed, inbound) = MqttFeed::builder()
            .connection(&config.feed)
            .reconnection(config.reconnection.clone())
            .inbound_capacity(config.inbound_capacity)
            .build()?;

        let bridge = FeedBridge::new(store.clone(), guard, Arc::new(feed.clone()));
        bridge.watch_all().await?;

        let gateway = CommandGateway::new(bridge.clone());
        let mut tasks = vec![
            bridge.spawn(inbound),
            bridge.spawn_follow_connection(feed.connection_state()),
            Scheduler::new(gateway.clone())
                .with_interval(config.scheduler_interval)
                .spawn(),
        ];

        #[cfg(feature = "http")]
        {
            if let Some(url) = &config.webhook_url {
                let forwarder = crate::event::WebhookForwarder::new(url.clone())?;
                tasks.push(forwarder.spawn(&events));
            }

            let rest = crate::protocol::FeedRestClient::from_connection(Some(config.rest_base_url.as_str()), &config.feed)?;
            let resync_bridge = bridge.clone();
            tasks.push(tokio::spawn(async move {
                if let Err(e) = resync_bridge.resync(&rest).await {
                    tracing::warn!(error = %e, "Feed resync failed");
                }
            }));
        }

        tracing::info!(
            host = %config.feed.host,
            owner = %config.feed.username,
            "Sync service started"
        );

        Ok(Self {
            store,
            gateway,
            feed,
            tasks,
        })
    }

    /// Returns the command gateway.
    #[must_use]
    pub fn gateway(&self) -> &CommandGateway {
        &self.gateway
    }

    /// Returns the state store.
    #[must_use]
    pub fn store(&self) -> &StateStore {
        &self.store
    }

    /// Returns the MQTT feed connection.
    #[must_use]
    pub fn feed(&self) -> &MqttFeed {
        &self.feed
    }

    /// Subscribes to committed state changes.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.store.subscribe()
    }

    /// Disconnects the feed and stops all background tasks.
    ///
    /// # Errors
    ///
    /// Returns the transport error if the disconnect cannot be queued; the
    /// tasks are stopped regardless.
    pub async fn shutdown(self) -> Result<()> {
        let result = self.feed.disconnect().await;
        for task in &self.tasks {
            task.abort();
        }
        tracing::info!("Sync service stopped");
        Ok(result?)
    }
}
