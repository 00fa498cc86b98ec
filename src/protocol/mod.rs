// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Feed transports.
//!
//! Each physical device is addressed by one feed on a pub/sub broker. This
//! module contains the transport-facing pieces:
//!
//! - [`FeedPublisher`]: the outbound seam used by the feed bridge
//! - [`MqttFeed`]: the MQTT transport with automatic reconnection
//! - [`FeedRestClient`]: the REST API used to read back the latest values
//! - [`FeedTopic`]: the topic layout
//!
//! Payloads are plain strings here; decoding into a power state happens in
//! the feed bridge.

#[cfg(feature = "mqtt")]
mod mqtt_feed;
#[cfg(feature = "http")]
mod rest;
mod topic;

use async_trait::async_trait;

#[cfg(feature = "mqtt")]
pub use mqtt_feed::{MqttFeed, MqttFeedBuilder};
#[cfg(feature = "http")]
pub use rest::FeedRestClient;
pub use topic::FeedTopic;

use crate::error::TransportError;
use crate::types::FeedKey;

/// A raw message received on a device feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    /// Feed the message arrived on.
    pub feed_key: FeedKey,
    /// Undecoded payload.
    pub payload: String,
}

impl InboundMessage {
    /// Creates an inbound message.
    #[must_use]
    pub fn new(feed_key: FeedKey, payload: impl Into<String>) -> Self {
        Self {
            feed_key,
            payload: payload.into(),
        }
    }
}

/// Outbound side of a feed transport.
///
/// Publishing is fire-and-forget: a successful return means the message was
/// handed to the transport, not that any subscriber received it.
#[async_trait]
pub trait FeedPublisher: Send + Sync {
    /// Publishes a payload on a feed.
    ///
    /// # Errors
    ///
    /// Returns `TransportError` if the message cannot be queued.
    async fn publish(&self, feed_key: &FeedKey, payload: &str) -> Result<(), TransportError>;

    /// Starts receiving messages for a feed, now and after every reconnection.
    ///
    /// # Errors
    ///
    /// Returns `TransportError` if the subscription request cannot be queued.
    async fn subscribe(&self, feed_key: &FeedKey) -> Result<(), TransportError>;
}
