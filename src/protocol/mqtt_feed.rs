// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! MQTT feed transport.
//!
//! One broker connection carries every device feed. The connection is driven
//! by a background task that forwards inbound publishes over a bounded
//! channel, replays all feed subscriptions on each connection acknowledgment
//! and reconnects with exponential backoff after errors.
//!
//! # Examples
//!
//! ```no_run
//! use feedlink::protocol::{FeedPublisher, MqttFeed};
//! use feedlink::types::FeedKey;
//! use std::time::Duration;
//!
//! # async fn example() -> feedlink::Result<()> {
//! let (feed, mut inbound) = MqttFeed::builder()
//!     .host("io.adafruit.com")
//!     .port(8883)
//!     .tls(true)
//!     .credentials("alice", "aio_key")
//!     .build()?;
//!
//! feed.wait_connected(Duration::from_secs(10)).await?;
//! feed.subscribe(&FeedKey::new("porch-light")?).await?;
//!
//! while let Some(message) = inbound.recv().await {
//!     println!("{} <- {}", message.feed_key, message.payload);
//! }
//! # Ok(())
//! # }
//! ```

use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS, SubscribeFilter, Transport};
use tokio::sync::{mpsc, watch};

use super::{FeedPublisher, FeedTopic, InboundMessage};
use crate::config::{FeedConnection, ReconnectionPolicy};
use crate::error::TransportError;
use crate::types::FeedKey;

/// Global counter for generating unique client IDs.
static FEED_CLIENT_ID_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Capacity of the rumqttc request queue.
const REQUEST_CAPACITY: usize = 64;

/// Configuration for an MQTT feed connection.
#[derive(Debug, Clone)]
struct MqttFeedConfig {
    host: String,
    port: u16,
    credentials: Option<(String, String)>,
    owner: Option<String>,
    use_tls: bool,
    keep_alive: Duration,
    reconnection: ReconnectionPolicy,
    inbound_capacity: usize,
}

impl Default for MqttFeedConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: FeedConnection::DEFAULT_PORT,
            credentials: None,
            owner: None,
            use_tls: false,
            keep_alive: Duration::from_secs(30),
            reconnection: ReconnectionPolicy::default(),
            inbound_capacity: 64,
        }
    }
}

/// An MQTT connection carrying device feeds.
///
/// `MqttFeed` is cheaply cloneable; clones share the connection and the set
/// of subscribed feeds.
#[derive(Clone)]
pub struct MqttFeed {
    inner: Arc<MqttFeedInner>,
}

struct MqttFeedInner {
    client: AsyncClient,
    topics: FeedTopic,
    /// Feeds replayed on every (re)connection.
    feeds: parking_lot::RwLock<BTreeSet<FeedKey>>,
    config: MqttFeedConfig,
    connected: watch::Sender<bool>,
    closing: AtomicBool,
}

impl MqttFeed {
    /// Creates a new builder for configuring a feed connection.
    #[must_use]
    pub fn builder() -> MqttFeedBuilder {
        MqttFeedBuilder::default()
    }

    /// Returns whether the broker connection is currently up.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        *self.inner.connected.borrow()
    }

    /// Returns a receiver that observes connection state changes.
    ///
    /// The value turns `true` on every broker acknowledgement, including
    /// after a reconnect.
    #[must_use]
    pub fn connection_state(&self) -> watch::Receiver<bool> {
        self.inner.connected.subscribe()
    }

    /// Returns the broker host.
    #[must_use]
    pub fn host(&self) -> &str {
        &self.inner.config.host
    }

    /// Returns the broker port.
    #[must_use]
    pub fn port(&self) -> u16 {
        self.inner.config.port
    }

    /// Returns the topic layout.
    #[must_use]
    pub fn topics(&self) -> &FeedTopic {
        &self.inner.topics
    }

    /// Returns the feeds this connection subscribes to.
    #[must_use]
    pub fn feeds(&self) -> Vec<FeedKey> {
        self.inner.feeds.read().iter().cloned().collect()
    }

    /// Waits until the broker acknowledges the connection.
    ///
    /// # Errors
    ///
    /// Returns `TransportError::ConnectionFailed` on timeout or if the event
    /// loop stopped.
    pub async fn wait_connected(&self, timeout: Duration) -> Result<(), TransportError> {
        let mut rx = self.inner.connected.subscribe();
        match tokio::time::timeout(timeout, rx.wait_for(|connected| *connected)).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(_)) => Err(TransportError::ConnectionFailed(
                "MQTT event loop terminated unexpectedly".to_string(),
            )),
            Err(_) => Err(TransportError::ConnectionFailed(format!(
                "MQTT connection timeout after {}s",
                timeout.as_secs()
            ))),
        }
    }

    /// Disconnects from the broker and stops the event loop.
    ///
    /// # Errors
    ///
    /// Returns error if the disconnect request cannot be queued.
    pub async fn disconnect(&self) -> Result<(), TransportError> {
        tracing::info!(
            host = %self.inner.config.host,
            port = %self.inner.config.port,
            "Disconnecting from feed broker"
        );

        self.inner.closing.store(true, Ordering::Release);
        self.inner.client.disconnect().await?;
        self.inner.connected.send_replace(false);
        Ok(())
    }

    fn is_closing(&self) -> bool {
        self.inner.closing.load(Ordering::Acquire)
    }

    fn set_connected(&self, connected: bool) {
        self.inner.connected.send_replace(connected);
    }

    /// Queues one SUBSCRIBE for every known feed.
    ///
    /// Called from the event loop, so it must not wait on the request queue.
    fn resubscribe_all(&self) {
        let filters: Vec<SubscribeFilter> = self
            .inner
            .feeds
            .read()
            .iter()
            .map(|key| SubscribeFilter::new(self.inner.topics.topic(key), QoS::AtMostOnce))
            .collect();

        if filters.is_empty() {
            return;
        }

        let count = filters.len();
        match self.inner.client.try_subscribe_many(filters) {
            Ok(()) => tracing::debug!(feeds = count, "Feed subscriptions replayed"),
            Err(e) => tracing::warn!(error = %e, feeds = count, "Failed to replay feed subscriptions"),
        }
    }
}

#[async_trait]
impl FeedPublisher for MqttFeed {
    async fn publish(&self, feed_key: &FeedKey, payload: &str) -> Result<(), TransportError> {
        let topic = self.inner.topics.topic(feed_key);
        tracing::debug!(topic = %topic, payload = %payload, "Publishing feed value");

        self.inner
            .client
            .publish(topic, QoS::AtMostOnce, false, payload.as_bytes().to_vec())
            .await?;
        Ok(())
    }

    async fn subscribe(&self, feed_key: &FeedKey) -> Result<(), TransportError> {
        let added = self.inner.feeds.write().insert(feed_key.clone());

        // Otherwise the next ConnAck replays it
        if added && self.is_connected() {
            let topic = self.inner.topics.topic(feed_key);
            self.inner.client.subscribe(&topic, QoS::AtMostOnce).await?;
            tracing::debug!(topic = %topic, "Subscribed to feed");
        }
        Ok(())
    }
}

impl std::fmt::Debug for MqttFeed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MqttFeed")
            .field("host", &self.inner.config.host)
            .field("port", &self.inner.config.port)
            .field("owner", &self.inner.topics.owner())
            .field("connected", &self.is_connected())
            .finish()
    }
}

/// Builder for creating an MQTT feed connection.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use feedlink::config::ReconnectionPolicy;
/// use feedlink::protocol::MqttFeed;
///
/// let builder = MqttFeed::builder()
///     .host("192.168.1.50")
///     .port(1883)
///     .feed_owner("home")
///     .keep_alive(Duration::from_secs(60))
///     .reconnection(ReconnectionPolicy {
///         max_retries: Some(5),
///         ..ReconnectionPolicy::default()
///     });
/// ```
#[derive(Debug, Default)]
pub struct MqttFeedBuilder {
    config: MqttFeedConfig,
}

impl MqttFeedBuilder {
    /// Sets the broker host address.
    #[must_use]
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.config.host = host.into();
        self
    }

    /// Sets the broker port (default: 1883).
    #[must_use]
    pub fn port(mut self, port: u16) -> Self {
        self.config.port = port;
        self
    }

    /// Sets authentication credentials.
    ///
    /// The username also becomes the feed owner unless one is set explicitly.
    #[must_use]
    pub fn credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.config.credentials = Some((username.into(), password.into()));
        self
    }

    /// Sets the account name used as the first topic segment.
    #[must_use]
    pub fn feed_owner(mut self, owner: impl Into<String>) -> Self {
        self.config.owner = Some(owner.into());
        self
    }

    /// Enables or disables TLS (default: disabled).
    #[must_use]
    pub fn tls(mut self, enabled: bool) -> Self {
        self.config.use_tls = enabled;
        self
    }

    /// Sets the keep-alive interval (default: 30 seconds).
    #[must_use]
    pub fn keep_alive(mut self, duration: Duration) -> Self {
        self.config.keep_alive = duration;
        self
    }

    /// Sets the reconnection policy (default: retry forever, 1s to 60s).
    #[must_use]
    pub fn reconnection(mut self, policy: ReconnectionPolicy) -> Self {
        self.config.reconnection = policy;
        self
    }

    /// Sets the capacity of the inbound message channel (default: 64).
    #[must_use]
    pub fn inbound_capacity(mut self, capacity: usize) -> Self {
        self.config.inbound_capacity = capacity.max(1);
        self
    }

    /// Applies host, port, credentials, TLS and keep-alive from a
    /// [`FeedConnection`].
    #[must_use]
    pub fn connection(self, connection: &FeedConnection) -> Self {
        self.host(connection.host.clone())
            .port(connection.port)
            .credentials(connection.username.clone(), connection.key.clone())
            .tls(connection.use_tls)
            .keep_alive(connection.keep_alive)
    }

    /// Starts the connection.
    ///
    /// The event loop is spawned immediately and connects in the background;
    /// use [`MqttFeed::wait_connected`] to wait for the broker. Inbound
    /// messages are delivered on the returned receiver.
    ///
    /// # Errors
    ///
    /// Returns `TransportError::InvalidAddress` if the host or the feed owner
    /// is missing.
    pub fn build(self) -> Result<(MqttFeed, mpsc::Receiver<InboundMessage>), TransportError> {
        if self.config.host.is_empty() {
            return Err(TransportError::InvalidAddress(
                "MQTT broker host is required".to_string(),
            ));
        }

        let owner = self
            .config
            .owner
            .clone()
            .or_else(|| self.config.credentials.as_ref().map(|(u, _)| u.clone()))
            .filter(|o| !o.is_empty())
            .ok_or_else(|| TransportError::InvalidAddress("feed owner is required".to_string()))?;

        let counter = FEED_CLIENT_ID_COUNTER.fetch_add(1, Ordering::Relaxed);
        let client_id = format!("feedlink_{}_{}", std::process::id(), counter);

        let mut mqtt_options = MqttOptions::new(&client_id, &self.config.host, self.config.port);
        mqtt_options.set_keep_alive(self.config.keep_alive);
        mqtt_options.set_clean_session(true);

        if let Some((ref username, ref password)) = self.config.credentials {
            mqtt_options.set_credentials(username, password);
        }
        if self.config.use_tls {
            mqtt_options.set_transport(Transport::tls_with_default_config());
        }

        let (client, event_loop) = AsyncClient::new(mqtt_options, REQUEST_CAPACITY);
        let (inbound_tx, inbound_rx) = mpsc::channel(self.config.inbound_capacity);
        let (connected, _) = watch::channel(false);

        let feed = MqttFeed {
            inner: Arc::new(MqttFeedInner {
                client,
                topics: FeedTopic::new(owner),
                feeds: parking_lot::RwLock::new(BTreeSet::new()),
                config: self.config,
                connected,
                closing: AtomicBool::new(false),
            }),
        };

        let feed_clone = feed.clone();
        tokio::spawn(async move {
            handle_feed_events(event_loop, feed_clone, inbound_tx).await;
        });

        Ok((feed, inbound_rx))
    }
}

/// Drives the MQTT connection until it is closed or retries run out.
async fn handle_feed_events(mut event_loop: EventLoop, feed: MqttFeed, inbound_tx: mpsc::Sender<InboundMessage>) {
    let policy = feed.inner.config.reconnection.clone();
    let mut attempt: u32 = 0;

    loop {
        match event_loop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(connack))) => {
                tracing::info!(
                    host = %feed.inner.config.host,
                    port = %feed.inner.config.port,
                    code = ?connack.code,
                    "Connected to feed broker"
                );
                attempt = 0;
                feed.set_connected(true);
                feed.resubscribe_all();
            }
            Ok(Event::Incoming(Packet::SubAck(suback))) => {
                tracing::debug!(?suback, "Feed subscription acknowledged");
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                let Some(feed_key) = feed.inner.topics.parse(&publish.topic) else {
                    tracing::debug!(topic = %publish.topic, "Ignoring message on foreign topic");
                    continue;
                };
                let Ok(payload) = String::from_utf8(publish.payload.to_vec()) else {
                    tracing::warn!(feed = %feed_key, "Dropping non-UTF-8 feed payload");
                    continue;
                };

                tracing::debug!(feed = %feed_key, payload = %payload, "Feed message received");
                if inbound_tx.send(InboundMessage::new(feed_key, payload)).await.is_err() {
                    tracing::debug!("Inbound receiver dropped, stopping feed event loop");
                    break;
                }
            }
            Ok(Event::Incoming(Packet::Disconnect)) => {
                tracing::info!("Feed broker sent disconnect");
                feed.set_connected(false);
            }
            Ok(Event::Outgoing(Outgoing::Disconnect)) if feed.is_closing() => {
                feed.set_connected(false);
                break;
            }
            Ok(_) => {}
            Err(e) => {
                feed.set_connected(false);
                if feed.is_closing() {
                    break;
                }
                if !policy.should_retry(attempt) {
                    tracing::error!(error = %e, attempts = attempt, "Feed connection lost, giving up");
                    break;
                }

                let delay = policy.backoff(attempt);
                attempt = attempt.saturating_add(1);
                tracing::error!(
                    error = %e,
                    attempt,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    "Feed connection error, reconnecting"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }

    tracing::debug!(host = %feed.inner.config.host, "Feed event loop stopped");
}
