// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Command intake.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;

use super::FeedBridge;
use crate::error::ValueError;
use crate::state::Device;
use crate::types::{Brightness, DeviceId, FeedKey, Origin, PowerState};
use crate::Result;

/// Toggle request as received from the HTTP layer.
///
/// Fields are optional so that missing values surface as validation errors
/// rather than deserialization failures.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToggleRequest {
    /// Target device.
    #[serde(default)]
    pub device_id: Option<DeviceId>,
    /// Desired power state.
    #[serde(default)]
    pub state: Option<bool>,
    /// Desired brightness percentage.
    #[serde(default)]
    pub brightness: Option<u16>,
}

impl ToggleRequest {
    /// Creates a request for `device_id` without a brightness.
    #[must_use]
    pub fn new(device_id: DeviceId, state: bool) -> Self {
        Self {
            device_id: Some(device_id),
            state: Some(state),
            brightness: None,
        }
    }

    /// Sets the brightness percentage.
    #[must_use]
    pub fn with_brightness(mut self, brightness: u16) -> Self {
        self.brightness = Some(brightness);
        self
    }
}

/// Immediate response to an accepted command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandAck {
    /// Whether the command was accepted.
    pub success: bool,
    /// Human-readable summary.
    pub message: String,
}

/// Accepts toggle commands and carries them out in the background.
///
/// Validation happens before the call returns; publishing, persisting and
/// fanout happen in a spawned task whose failures are only logged. Commands
/// for one device are carried out one at a time, each publishing and
/// committing before the next starts, so the last one carried out
/// determines both the device's feed value and the stored state.
///
/// # Examples
///
/// ```no_run
/// use feedlink::manager::{CommandGateway, ToggleRequest};
///
/// # async fn example(gateway: CommandGateway, id: feedlink::types::DeviceId) -> feedlink::Result<()> {
/// let ack = gateway
///     .toggle(ToggleRequest {
///         device_id: Some(id),
///         state: Some(true),
///         brightness: Some(60),
///     })
///     .await?;
/// assert!(ack.success);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct CommandGateway {
    bridge: FeedBridge,
}

impl CommandGateway {
    /// Creates a gateway publishing through `bridge`.
    #[must_use]
    pub fn new(bridge: FeedBridge) -> Self {
        Self { bridge }
    }

    /// Returns the feed bridge.
    #[must_use]
    pub fn bridge(&self) -> &FeedBridge {
        &self.bridge
    }

    /// Requests a power state for a device.
    ///
    /// # Errors
    ///
    /// Returns `ValueError::InvalidOrigin` for [`Origin::Feed`] and
    /// `Error::DeviceNotFound` for an unknown device. Nothing is published or
    /// leased in either case.
    pub async fn request_toggle(&self, device_id: DeviceId, desired: PowerState, origin: Origin) -> Result<CommandAck> {
        let (ack, _task) = self.dispatch(device_id, desired, None, origin).await?;
        Ok(ack)
    }

    /// Validates and dispatches a [`ToggleRequest`] as a manual command.
    ///
    /// # Errors
    ///
    /// Returns `ValueError::MissingField` for a missing device or state,
    /// `ValueError::InvalidBrightness` for a brightness above 100, and the
    /// errors of [`CommandGateway::request_toggle`].
    pub async fn toggle(&self, request: ToggleRequest) -> Result<CommandAck> {
        let device_id = request.device_id.ok_or(ValueError::MissingField("deviceId"))?;
        let desired = request
            .state
            .map(PowerState::from)
            .ok_or(ValueError::MissingField("state"))?;
        let brightness = request.brightness.map(Brightness::new).transpose()?;

        let (ack, _task) = self.dispatch(device_id, desired, brightness, Origin::Manual).await?;
        Ok(ack)
    }

    /// Sends a raw value to the device bound to a feed.
    ///
    /// # Errors
    ///
    /// Returns `ValueError::MissingField` for a missing argument,
    /// `ValueError::InvalidFeedKey` or `ValueError::InvalidPowerState` for
    /// malformed ones, and `Error::FeedNotFound` if no device uses the feed.
    pub async fn send_feed_value(&self, feed_key: Option<&str>, value: Option<&str>) -> Result<CommandAck> {
        let feed_key = feed_key
            .filter(|k| !k.is_empty())
            .ok_or(ValueError::MissingField("feedKey"))?;
        let value = value.ok_or(ValueError::MissingField("value"))?;

        let feed_key = FeedKey::new(feed_key)?;
        let desired = PowerState::from_feed(value)?;
        let device = self.bridge.store().device_by_feed(&feed_key).await?;

        self.request_toggle(device.id(), desired, Origin::Manual).await
    }

    /// Validates a command, leases the device and spawns the continuation.
    pub(crate) async fn dispatch(
        &self,
        device_id: DeviceId,
        desired: PowerState,
        brightness: Option<Brightness>,
        origin: Origin,
    ) -> Result<(CommandAck, JoinHandle<()>)> {
        if origin == Origin::Feed {
            return Err(ValueError::InvalidOrigin(origin.to_string()).into());
        }

        let device = self.bridge.store().device(device_id).await?;
        self.bridge.guard().lease(device_id);

        let message = match brightness {
            Some(b) => format!("{} turned {} at {}", device.name(), desired, b),
            None => format!("{} turned {}", device.name(), desired),
        };

        tracing::debug!(%device_id, %origin, state = %desired, "Command accepted");

        let bridge = self.bridge.clone();
        let task = tokio::spawn(async move {
            carry_out(bridge, device, desired, brightness, origin).await;
        });

        Ok((
            CommandAck {
                success: true,
                message,
            },
            task,
        ))
    }
}

/// Background half of a command: publish, then persist and fan out.
///
/// The device lock is held from the first publish to the commit, so
/// commands for one device are sent and committed in the same order and the
/// stored state always matches the last value sent. A command whose power
/// publish fails is dropped without touching the record.
async fn carry_out(
    bridge: FeedBridge,
    device: Device,
    desired: PowerState,
    brightness: Option<Brightness>,
    origin: Origin,
) {
    let device_id = device.id();
    let store = bridge.store();

    let held = match store.lock_device(device_id).await {
        Ok(held) => held,
        Err(e) => {
            tracing::warn!(%device_id, %origin, error = %e, "Device vanished before command ran, dropping it");
            return;
        }
    };

    if let Err(e) = bridge.publish_state(&device, desired).await {
        tracing::warn!(%device_id, %origin, error = %e, "Failed to publish command, dropping it");
        return;
    }

    if let Some(brightness) = brightness {
        match bridge.publish_brightness(&device, brightness).await {
            Ok(true) => {
                if let Err(e) = store.set_brightness_locked(&held, brightness).await {
                    tracing::warn!(%device_id, error = %e, "Failed to record brightness");
                }
            }
            Ok(false) => tracing::debug!(%device_id, "Device has no brightness feed, brightness ignored"),
            Err(e) => tracing::warn!(%device_id, error = %e, "Failed to publish brightness"),
        }
    }

    if let Err(e) = store
        .apply_transition_locked(&held, desired, origin, Utc::now(), None)
        .await
    {
        tracing::warn!(%device_id, %origin, error = %e, "Failed to commit command");
    }
}
