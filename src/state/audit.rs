// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Append-only audit log entries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::{DeviceId, Origin, PowerState};

/// One accepted transition, as recorded in the audit log.
///
/// Entries are written exactly once per accepted transition, including
/// transitions that did not change the power state. Discarded feed echoes
/// are never recorded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEvent {
    /// Unique entry identifier.
    pub id: Uuid,
    /// Device the transition applied to.
    pub device_id: DeviceId,
    /// Commit time.
    pub time: DateTime<Utc>,
    /// State applied by the transition.
    pub state: PowerState,
    /// Human-readable action label.
    pub action: String,
    /// Source of the transition.
    pub origin: Origin,
}

impl AuditEvent {
    /// Creates an audit entry with a fresh identifier.
    #[must_use]
    pub fn new(
        device_id: DeviceId,
        state: PowerState,
        origin: Origin,
        time: DateTime<Utc>,
        action: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            device_id,
            time,
            state,
            action: action.into(),
            origin,
        }
    }

    /// Default action label for a transition, e.g. `"scheduled ON"`.
    #[must_use]
    pub fn default_action(state: PowerState, origin: Origin) -> String {
        format!("{origin} {state}")
    }
}
