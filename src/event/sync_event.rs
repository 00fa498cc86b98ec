// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Canonical state-change event.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{DeviceId, Origin, PowerState};

/// Emitted once per committed transition.
///
/// This is also the realtime push payload:
/// `{"deviceId": ..., "state": "ON", "origin": "manual", "timestamp": ...}`.
///
/// # Examples
///
/// ```
/// use chrono::Utc;
/// use feedlink::event::SyncEvent;
/// use feedlink::types::{DeviceId, Origin, PowerState};
///
/// let event = SyncEvent::new(DeviceId::new(), PowerState::On, Origin::Feed, Utc::now());
/// assert!(event.state.is_on());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncEvent {
    /// Device whose state was committed.
    pub device_id: DeviceId,
    /// Committed power state.
    pub state: PowerState,
    /// Source of the transition.
    pub origin: Origin,
    /// Commit time.
    pub timestamp: DateTime<Utc>,
}

impl SyncEvent {
    /// Creates an event.
    #[must_use]
    pub fn new(device_id: DeviceId, state: PowerState, origin: Origin, timestamp: DateTime<Utc>) -> Self {
        Self {
            device_id,
            state,
            origin,
            timestamp,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_payload_shape() {
        let event = SyncEvent::new(DeviceId::new(), PowerState::Off, Origin::Scheduled, Utc::now());
        let json = serde_json::to_value(&event).unwrap();

        assert_eq!(json["deviceId"], event.device_id.to_string());
        assert_eq!(json["state"], "OFF");
        assert_eq!(json["origin"], "scheduled");
        assert!(json["timestamp"].is_string());
    }
}
