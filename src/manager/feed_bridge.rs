// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Bridge between device feeds and the state store.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::error::{Error, TransportError};
use crate::event::SyncEvent;
use crate::guard::EchoGuard;
use crate::protocol::{FeedPublisher, InboundMessage};
use crate::state::Device;
use crate::store::StateStore;
use crate::types::{Brightness, Origin, PowerState};
use crate::Result;

/// What happened to an inbound feed message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundOutcome {
    /// The value was committed as a feed-originated transition.
    Applied(SyncEvent),
    /// The device holds a lease; the message is the echo of a local publish.
    StaleEcho,
    /// No device is bound to the feed.
    UnknownFeed,
}

/// Publishes device state to feeds and reconciles inbound feed values.
///
/// This is the only place where feed payloads are encoded or decoded.
/// Outbound publishes lease the device in the [`EchoGuard`]; inbound
/// messages for a leased device are discarded as echoes.
///
/// Cloning is cheap and clones share the same publisher and guard.
#[derive(Clone)]
pub struct FeedBridge {
    inner: Arc<BridgeInner>,
}

struct BridgeInner {
    store: StateStore,
    guard: EchoGuard,
    publisher: Arc<dyn FeedPublisher>,
}

impl std::fmt::Debug for FeedBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeedBridge")
            .field("guard", &self.inner.guard)
            .finish_non_exhaustive()
    }
}

impl FeedBridge {
    /// Creates a bridge.
    pub fn new(store: StateStore, guard: EchoGuard, publisher: Arc<dyn FeedPublisher>) -> Self {
        Self {
            inner: Arc::new(BridgeInner {
                store,
                guard,
                publisher,
            }),
        }
    }

    /// Returns the echo guard.
    #[must_use]
    pub fn guard(&self) -> &EchoGuard {
        &self.inner.guard
    }

    /// Returns the state store.
    #[must_use]
    pub fn store(&self) -> &StateStore {
        &self.inner.store
    }

    /// Publishes a power state on the device's feed.
    ///
    /// The device is leased before the message leaves, so the broker's echo
    /// is recognized even if it arrives immediately.
    ///
    /// # Errors
    ///
    /// Returns the transport error if the message cannot be queued.
    pub async fn publish_state(&self, device: &Device, state: PowerState) -> std::result::Result<(), TransportError> {
        self.inner.guard.lease(device.id());
        self.inner
            .publisher
            .publish(device.feed_key(), state.feed_payload())
            .await?;

        tracing::debug!(
            device_id = %device.id(),
            feed = %device.feed_key(),
            state = %state,
            "Published device state"
        );
        Ok(())
    }

    /// Publishes a brightness on the device's brightness feed.
    ///
    /// Returns `false` without publishing if the device is not dimmable.
    ///
    /// # Errors
    ///
    /// Returns the transport error if the message cannot be queued.
    pub async fn publish_brightness(
        &self,
        device: &Device,
        brightness: Brightness,
    ) -> std::result::Result<bool, TransportError> {
        let Some(feed_key) = device.brightness_feed() else {
            return Ok(false);
        };

        let payload = device.brightness_formula().feed_payload(brightness);
        self.inner.publisher.publish(feed_key, &payload).await?;

        tracing::debug!(
            device_id = %device.id(),
            feed = %feed_key,
            %brightness,
            payload = %payload,
            "Published brightness"
        );
        Ok(true)
    }

    /// Subscribes to a device's feed.
    ///
    /// # Errors
    ///
    /// Returns the transport error if the subscription cannot be queued.
    pub async fn watch_device(&self, device: &Device) -> std::result::Result<(), TransportError> {
        self.inner.publisher.subscribe(device.feed_key()).await
    }

    /// Subscribes to the feeds of every stored device.
    ///
    /// Returns the number of feeds watched.
    ///
    /// # Errors
    ///
    /// Returns repository or transport errors.
    pub async fn watch_all(&self) -> Result<usize> {
        let devices = self.inner.store.devices().await?;
        for device in &devices {
            self.watch_device(device).await?;
        }
        tracing::info!(feeds = devices.len(), "Watching device feeds");
        Ok(devices.len())
    }

    /// Reconciles one inbound feed message.
    ///
    /// # Errors
    ///
    /// Returns `ValueError::InvalidPowerState` for an undecodable payload,
    /// `Error::DeviceNotFound` if the device disappeared before the commit,
    /// and repository errors.
    pub async fn handle_inbound(&self, message: &InboundMessage) -> Result<InboundOutcome> {
        let device = match self.inner.store.device_by_feed(&message.feed_key).await {
            Ok(device) => device,
            Err(Error::FeedNotFound(_)) => {
                tracing::debug!(feed = %message.feed_key, "Message for unknown feed ignored");
                return Ok(InboundOutcome::UnknownFeed);
            }
            Err(e) => return Err(e),
        };

        if let Some(remaining) = self.inner.guard.remaining(device.id()) {
            tracing::debug!(
                device_id = %device.id(),
                feed = %message.feed_key,
                remaining_ms = u64::try_from(remaining.as_millis()).unwrap_or(u64::MAX),
                "Discarding echo of local command"
            );
            return Ok(InboundOutcome::StaleEcho);
        }

        let state = PowerState::from_feed(&message.payload)?;
        let commit = self
            .inner
            .store
            .apply_transition(device.id(), state, Origin::Feed, Utc::now(), None)
            .await?;

        Ok(InboundOutcome::Applied(commit.event))
    }

    /// Processes inbound messages until the channel closes.
    pub async fn run(self, mut inbound: mpsc::Receiver<InboundMessage>) {
        while let Some(message) = inbound.recv().await {
            if let Err(e) = self.handle_inbound(&message).await {
                tracing::warn!(
                    feed = %message.feed_key,
                    payload = %message.payload,
                    error = %e,
                    "Failed to apply feed message"
                );
            }
        }
        tracing::debug!("Inbound feed channel closed");
    }

    /// Spawns [`FeedBridge::run`] on the runtime.
    pub fn spawn(&self, inbound: mpsc::Receiver<InboundMessage>) -> JoinHandle<()> {
        tokio::spawn(self.clone().run(inbound))
    }

    /// Watches every stored device again each time `connected` turns true.
    ///
    /// Devices added to the repository after startup get their feed
    /// subscribed on the next (re)connection. Returns when the sender is
    /// dropped.
    pub async fn follow_connection(self, mut connected: watch::Receiver<bool>) {
        while connected.changed().await.is_ok() {
            if !*connected.borrow_and_update() {
                continue;
            }
            if let Err(e) = self.watch_all().await {
                tracing::warn!(error = %e, "Failed to watch device feeds after connecting");
            }
        }
        tracing::debug!("Connection state channel closed");
    }

    /// Spawns [`FeedBridge::follow_connection`] on the runtime.
    pub fn spawn_follow_connection(&self, connected: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(self.clone().follow_connection(connected))
    }

    /// Pulls the latest stored value of every device feed and reconciles it.
    ///
    /// Values go through [`FeedBridge::handle_inbound`], so leased devices
    /// are left alone. Per-device failures are logged and skipped. Returns
    /// the number of values applied.
    ///
    /// # Errors
    ///
    /// Returns the repository error if the device list cannot be read.
    #[cfg(feature = "http")]
    pub async fn resync(&self, rest: &crate::protocol::FeedRestClient) -> Result<usize> {
        let devices = self.inner.store.devices().await?;
        let mut applied = 0;

        for device in devices {
            let value = match rest.latest_value(device.feed_key()).await {
                Ok(Some(value)) => value,
                Ok(None) => continue,
                Err(e) => {
                    tracing::warn!(feed = %device.feed_key(), error = %e, "Failed to fetch feed value");
                    continue;
                }
            };

            // Skip values that already match to avoid a no-op audit entry
            if PowerState::from_feed(&value).is_ok_and(|s| s == device.state()) {
                continue;
            }

            let message = InboundMessage::new(device.feed_key().clone(), value);
            match self.handle_inbound(&message).await {
                Ok(InboundOutcome::Applied(_)) => applied += 1,
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(feed = %device.feed_key(), error = %e, "Failed to reconcile feed value");
                }
            }
        }

        tracing::info!(applied, "Feed resync complete");
        Ok(applied)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use async_trait::async_trait;
    use parking_lot::Mutex;

    use super::*;
    use crate::event::EventBus;
    use crate::store::{MemoryRepository, Repository};
    use crate::types::{BrightnessFormula, FeedKey};

    #[derive(Default)]
    struct Recorder {
        published: Mutex<Vec<(String, String)>>,
        subscribed: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl FeedPublisher for Recorder {
        async fn publish(&self, feed_key: &FeedKey, payload: &str) -> std::result::Result<(), TransportError> {
            self.published.lock().push((feed_key.to_string(), payload.to_string()));
            Ok(())
        }

        async fn subscribe(&self, feed_key: &FeedKey) -> std::result::Result<(), TransportError> {
            self.subscribed.lock().push(feed_key.to_string());
            Ok(())
        }
    }

    async fn setup(device: Device) -> (FeedBridge, Arc<Recorder>) {
        let repo = Arc::new(MemoryRepository::new());
        repo.insert_device(device).await.unwrap();
        let store = StateStore::new(repo, EventBus::new());
        let recorder = Arc::new(Recorder::default());
        let bridge = FeedBridge::new(store, EchoGuard::new(Duration::from_secs(3)), recorder.clone());
        (bridge, recorder)
    }

    fn lamp() -> Device {
        Device::new(FeedKey::new("lamp").unwrap(), "Lamp")
    }

    #[tokio::test(start_paused = true)]
    async fn publish_leases_and_encodes() {
        let lamp = lamp();
        let (bridge, recorder) = setup(lamp.clone()).await;

        bridge.publish_state(&lamp, PowerState::On).await.unwrap();

        assert!(bridge.guard().is_leased(lamp.id()));
        assert_eq!(*recorder.published.lock(), vec![("lamp".to_string(), "1".to_string())]);
    }

    #[tokio::test(start_paused = true)]
    async fn inbound_applies_when_not_leased() {
        let lamp = lamp();
        let (bridge, _) = setup(lamp.clone()).await;

        let outcome = bridge
            .handle_inbound(&InboundMessage::new(lamp.feed_key().clone(), "ON"))
            .await
            .unwrap();

        let InboundOutcome::Applied(event) = outcome else {
            panic!("expected Applied, got {outcome:?}");
        };
        assert_eq!(event.origin, Origin::Feed);
        assert!(bridge.store().device(lamp.id()).await.unwrap().is_on());
    }

    #[tokio::test(start_paused = true)]
    async fn inbound_echo_is_discarded_until_lease_expires() {
        let lamp = lamp();
        let (bridge, _) = setup(lamp.clone()).await;
        let message = InboundMessage::new(lamp.feed_key().clone(), "1");

        bridge.publish_state(&lamp, PowerState::On).await.unwrap();
        assert_eq!(bridge.handle_inbound(&message).await.unwrap(), InboundOutcome::StaleEcho);
        assert!(bridge.store().history(None).await.unwrap().is_empty());

        tokio::time::advance(Duration::from_secs(3)).await;
        assert!(matches!(
            bridge.handle_inbound(&message).await.unwrap(),
            InboundOutcome::Applied(_)
        ));
    }

    #[tokio::test]
    async fn unknown_feed_and_bad_payload() {
        let lamp = lamp();
        let (bridge, _) = setup(lamp.clone()).await;

        let unknown = InboundMessage::new(FeedKey::new("garage").unwrap(), "1");
        assert_eq!(bridge.handle_inbound(&unknown).await.unwrap(), InboundOutcome::UnknownFeed);

        let garbage = InboundMessage::new(lamp.feed_key().clone(), "maybe");
        assert!(matches!(
            bridge.handle_inbound(&garbage).await,
            Err(Error::Value(_))
        ));
    }

    #[tokio::test]
    async fn brightness_uses_formula() {
        let dimmer = lamp().with_brightness_feed(
            FeedKey::new("lamp-level").unwrap(),
            BrightnessFormula::Scale { max: 255 },
        );
        let (bridge, recorder) = setup(dimmer.clone()).await;

        let published = bridge
            .publish_brightness(&dimmer, Brightness::new(100).unwrap())
            .await
            .unwrap();
        assert!(published);
        assert_eq!(
            *recorder.published.lock(),
            vec![("lamp-level".to_string(), "255".to_string())]
        );

        assert!(!bridge.publish_brightness(&lamp(), Brightness::MAX).await.unwrap());
    }

    #[tokio::test]
    async fn watch_all_subscribes_every_device() {
        let (bridge, recorder) = setup(lamp()).await;
        assert_eq!(bridge.watch_all().await.unwrap(), 1);
        assert_eq!(*recorder.subscribed.lock(), vec!["lamp".to_string()]);
    }

    async fn wait_for_subscriptions(recorder: &Recorder, count: usize) {
        for _ in 0..100 {
            if recorder.subscribed.lock().len() >= count {
                return;
            }
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn reconnect_watches_devices_added_after_startup() {
        let (bridge, recorder) = setup(lamp()).await;
        bridge.watch_all().await.unwrap();

        let fan = Device::new(FeedKey::new("fan").unwrap(), "Fan");
        bridge.store().repository().insert_device(fan).await.unwrap();

        let (connected, state) = watch::channel(false);
        let task = bridge.spawn_follow_connection(state);

        connected.send_replace(false);
        tokio::task::yield_now().await;
        assert_eq!(recorder.subscribed.lock().len(), 1);

        connected.send_replace(true);
        wait_for_subscriptions(&recorder, 3).await;
        assert!(recorder.subscribed.lock().contains(&"fan".to_string()));

        drop(connected);
        task.await.unwrap();
    }
}
