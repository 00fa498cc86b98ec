// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Shared fixtures for integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use feedlink::error::TransportError;
use feedlink::event::EventBus;
use feedlink::guard::EchoGuard;
use feedlink::manager::{CommandGateway, FeedBridge};
use feedlink::protocol::FeedPublisher;
use feedlink::state::Device;
use feedlink::store::{MemoryRepository, Repository, StateStore};
use feedlink::types::FeedKey;
use parking_lot::Mutex;

/// Publisher that records every payload instead of sending it.
#[derive(Debug, Default)]
pub struct RecordingPublisher {
    published: Mutex<Vec<(String, String)>>,
    subscribed: Mutex<Vec<String>>,
    delays: Mutex<HashMap<String, Duration>>,
}

impl RecordingPublisher {
    /// Makes every publish to `feed` take `delay` before it is recorded.
    pub fn delay_feed(&self, feed: &str, delay: Duration) {
        self.delays.lock().insert(feed.to_string(), delay);
    }

    /// Payloads published to `feed`, oldest first.
    pub fn payloads(&self, feed: &str) -> Vec<String> {
        self.published
            .lock()
            .iter()
            .filter(|(key, _)| key == feed)
            .map(|(_, payload)| payload.clone())
            .collect()
    }

    pub fn published(&self) -> Vec<(String, String)> {
        self.published.lock().clone()
    }

    pub fn subscribed(&self) -> Vec<String> {
        self.subscribed.lock().clone()
    }
}

#[async_trait]
impl FeedPublisher for RecordingPublisher {
    async fn publish(&self, feed_key: &FeedKey, payload: &str) -> Result<(), TransportError> {
        let delay = self.delays.lock().get(feed_key.as_str()).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.published.lock().push((feed_key.to_string(), payload.to_string()));
        Ok(())
    }

    async fn subscribe(&self, feed_key: &FeedKey) -> Result<(), TransportError> {
        self.subscribed.lock().push(feed_key.to_string());
        Ok(())
    }
}

/// A gateway over an in-memory store holding `devices`.
pub struct Harness {
    pub repo: Arc<MemoryRepository>,
    pub publisher: Arc<RecordingPublisher>,
    pub gateway: CommandGateway,
}

impl Harness {
    pub async fn new(devices: &[Device]) -> Self {
        Self::with_ttl(devices, Duration::from_secs(3)).await
    }

    pub async fn with_ttl(devices: &[Device], ttl: Duration) -> Self {
        let repo = Arc::new(MemoryRepository::new());
        for device in devices {
            repo.insert_device(device.clone()).await.unwrap();
        }
        let publisher = Arc::new(RecordingPublisher::default());
        let store = StateStore::new(repo.clone(), EventBus::new());
        let bridge = FeedBridge::new(store, EchoGuard::new(ttl), publisher.clone());

        Self {
            repo,
            publisher,
            gateway: CommandGateway::new(bridge),
        }
    }

    pub fn bridge(&self) -> &FeedBridge {
        self.gateway.bridge()
    }

    pub fn store(&self) -> &StateStore {
        self.gateway.bridge().store()
    }
}

pub fn lamp() -> Device {
    Device::new(FeedKey::new("lamp").unwrap(), "Lamp").with_rated_power(60.0)
}
