// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Command dispatch, feed reconciliation and scheduling.
//!
//! # Overview
//!
//! - [`CommandGateway`]: validates toggle commands, acknowledges them and
//!   carries them out in the background
//! - [`FeedBridge`]: publishes states to device feeds and reconciles inbound
//!   feed values, discarding echoes of its own publishes
//! - [`Scheduler`]: fires time-of-day schedule edges once per minute
//! - [`SyncService`]: wires all of the above to an MQTT feed and a JSON store
//!
//! Every path ends in [`StateStore::apply_transition`](crate::store::StateStore::apply_transition).
//!
//! # Examples
//!
//! ```
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> feedlink::Result<()> {
//! use std::sync::Arc;
//! use async_trait::async_trait;
//! use feedlink::error::TransportError;
//! use feedlink::event::EventBus;
//! use feedlink::guard::EchoGuard;
//! use feedlink::manager::{CommandGateway, FeedBridge};
//! use feedlink::protocol::FeedPublisher;
//! use feedlink::state::Device;
//! use feedlink::store::{MemoryRepository, Repository, StateStore};
//! use feedlink::types::{FeedKey, Origin, PowerState};
//!
//! struct Discard;
//!
//! #[async_trait]
//! impl FeedPublisher for Discard {
//!     async fn publish(&self, _: &FeedKey, _: &str) -> Result<(), TransportError> { Ok(()) }
//!     async fn subscribe(&self, _: &FeedKey) -> Result<(), TransportError> { Ok(()) }
//! }
//!
//! let repo = Arc::new(MemoryRepository::new());
//! let lamp = Device::new(FeedKey::new("lamp")?, "Lamp");
//! repo.insert_device(lamp.clone()).await?;
//!
//! let store = StateStore::new(repo, EventBus::new());
//! let bridge = FeedBridge::new(store, EchoGuard::default(), Arc::new(Discard));
//! let gateway = CommandGateway::new(bridge);
//!
//! let ack = gateway.request_toggle(lamp.id(), PowerState::On, Origin::Manual).await?;
//! assert!(ack.success);
//! # Ok(())
//! # }
//! ```

mod command_gateway;
mod feed_bridge;
mod scheduler;
#[cfg(feature = "mqtt")]
mod service;

pub use command_gateway::{CommandAck, CommandGateway, ToggleRequest};
pub use feed_bridge::{FeedBridge, InboundOutcome};
pub use scheduler::{FiredEdge, Scheduler};
#[cfg(feature = "mqtt")]
pub use service::SyncService;
