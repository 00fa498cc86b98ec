// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Forwards committed state changes to an HTTP endpoint.

use std::time::Duration;

use reqwest::Client;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;

use super::{EventBus, SyncEvent};
use crate::error::TransportError;

/// Posts every [`SyncEvent`] as JSON to a fixed URL.
///
/// This is the bridge to a realtime UI backend. Delivery is best effort:
/// failed requests are logged and not retried.
///
/// # Examples
///
/// ```no_run
/// use feedlink::event::{EventBus, WebhookForwarder};
///
/// # fn example() -> feedlink::Result<()> {
/// let bus = EventBus::new();
/// let forwarder = WebhookForwarder::new("http://localhost:5000/device_update")?;
/// let _task = forwarder.spawn(&bus);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct WebhookForwarder {
    url: String,
    client: Client,
}

impl WebhookForwarder {
    /// Default request timeout.
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

    /// Creates a forwarder posting to `url`.
    ///
    /// # Errors
    ///
    /// Returns `TransportError::InvalidAddress` if the URL is not http(s), or
    /// `TransportError::Http` if the client cannot be created.
    pub fn new(url: impl Into<String>) -> Result<Self, TransportError> {
        Self::with_timeout(url, Self::DEFAULT_TIMEOUT)
    }

    /// Creates a forwarder with a custom request timeout.
    ///
    /// # Errors
    ///
    /// See [`WebhookForwarder::new`].
    pub fn with_timeout(url: impl Into<String>, timeout: Duration) -> Result<Self, TransportError> {
        let url = url.into();
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(TransportError::InvalidAddress(url));
        }

        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { url, client })
    }

    /// Returns the target URL.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Posts a single event.
    ///
    /// # Errors
    ///
    /// Returns `TransportError::Http` on request failure and
    /// `TransportError::UnexpectedStatus` on a non-success response.
    pub async fn forward(&self, event: &SyncEvent) -> Result<(), TransportError> {
        let response = self.client.post(&self.url).json(event).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::UnexpectedStatus(status.as_u16()));
        }
        Ok(())
    }

    /// Subscribes to `bus` and forwards events until the bus closes.
    pub fn spawn(self, bus: &EventBus) -> JoinHandle<()> {
        let rx = bus.subscribe();
        tokio::spawn(self.run(rx))
    }

    async fn run(self, mut rx: broadcast::Receiver<SyncEvent>) {
        tracing::info!(url = %self.url, "Webhook forwarder started");

        loop {
            match rx.recv().await {
                Ok(event) => {
                    if let Err(e) = self.forward(&event).await {
                        tracing::warn!(
                            device_id = %event.device_id,
                            url = %self.url,
                            error = %e,
                            "Failed to forward state change"
                        );
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Webhook forwarder lagged, events dropped");
                }
                Err(RecvError::Closed) => break,
            }
        }

        tracing::debug!("Webhook forwarder stopped");
    }
}
