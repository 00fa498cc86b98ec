// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! `feedlink` - Keep on/off devices in sync with an MQTT feed service.
//!
//! Devices are toggled from three places: direct commands, time-of-day
//! schedules, and values written to the device's feed by other clients.
//! This library funnels all three through a single per-device commit path,
//! publishes every commanded state to the feed, suppresses the echo of its
//! own publishes, and keeps a runtime ledger for power accounting.
//!
//! # Components
//!
//! - **Command gateway**: validate, acknowledge and carry out toggles
//! - **Echo guard**: short leases that mark inbound values as self-caused
//! - **Feed bridge**: MQTT publish/subscribe with reconnection
//! - **State store**: device records, audit log and schedules behind a
//!   [`Repository`](store::Repository)
//! - **Power accounting**: instantaneous watts and energy over a window
//! - **Scheduler**: minute-resolution on/off edges
//! - **Event fanout**: a broadcast channel of committed changes, with an
//!   optional webhook forwarder
//!
//! # Quick Start
//!
//! ```no_run
//! use feedlink::config::SyncConfig;
//! use feedlink::manager::{SyncService, ToggleRequest};
//! use feedlink::state::PowerFilter;
//!
//! #[tokio::main]
//! async fn main() -> feedlink::Result<()> {
//!     let config = SyncConfig::from_env()?;
//!     let service = SyncService::start(&config).await?;
//!
//!     for device in service.store().devices().await? {
//!         let ack = service
//!             .gateway()
//!             .toggle(ToggleRequest::new(device.id(), true))
//!             .await?;
//!         println!("{}", ack.message);
//!     }
//!
//!     let report = service.store().power(PowerFilter::Week, chrono::Utc::now()).await?;
//!     println!("{} W, {} kWh this week", report.current_power_w, report.total_energy_kwh);
//!
//!     service.shutdown().await
//! }
//! ```
//!
//! # Features
//!
//! - `mqtt` (default): the MQTT feed connection and [`SyncService`](manager::SyncService)
//! - `http` (default): REST resync and the webhook forwarder

pub mod config;
pub mod error;
pub mod event;
pub mod guard;
pub mod manager;
pub mod protocol;
pub mod state;
pub mod store;
pub mod types;

pub use error::{Error, ParseError, Result, StoreError, TransportError, ValueError};
pub use types::{DeviceId, FeedKey, Origin, PowerState, ScheduleId};
