// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Fanout of committed state changes.
//!
//! Every commit made by the state store publishes a [`SyncEvent`] on the
//! [`EventBus`]. Consumers subscribe independently; with the `http` feature
//! a [`WebhookForwarder`] can push events to an external endpoint.
//!
//! # Examples
//!
//! ```
//! use chrono::Utc;
//! use feedlink::event::{EventBus, SyncEvent};
//! use feedlink::types::{DeviceId, Origin, PowerState};
//!
//! let bus = EventBus::new();
//! let mut rx = bus.subscribe();
//!
//! let device_id = DeviceId::new();
//! bus.publish(SyncEvent::new(device_id, PowerState::On, Origin::Feed, Utc::now()));
//! ```

mod event_bus;
mod sync_event;
#[cfg(feature = "http")]
mod webhook;

pub use event_bus::{DEFAULT_EVENT_CAPACITY, EventBus};
pub use sync_event::SyncEvent;
#[cfg(feature = "http")]
pub use webhook::WebhookForwarder;
