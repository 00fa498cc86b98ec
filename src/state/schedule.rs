// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Time-of-day schedules.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::types::{DeviceId, PowerState, ScheduleId, TimeOfDay};

/// A daily on/off schedule for one device.
///
/// Whether a schedule has fired is derived from the clock at each tick and
/// never stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Schedule {
    /// Schedule identifier.
    pub id: ScheduleId,
    /// Device driven by the schedule.
    pub device_id: DeviceId,
    /// Time at which the device is switched on.
    pub time_on: TimeOfDay,
    /// Time at which the device is switched off, if any.
    #[serde(default)]
    pub time_off: Option<TimeOfDay>,
    /// Inactive schedules are ignored by the scheduler.
    #[serde(default = "default_active")]
    pub is_active: bool,
    /// Free-form location label.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    /// Free-form note.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

fn default_active() -> bool {
    true
}

impl Schedule {
    /// Creates an active schedule with only an on time.
    #[must_use]
    pub fn new(device_id: DeviceId, time_on: TimeOfDay) -> Self {
        Self {
            id: ScheduleId::new(),
            device_id,
            time_on,
            time_off: None,
            is_active: true,
            location: None,
            note: None,
        }
    }

    /// Sets the off time.
    #[must_use]
    pub fn with_time_off(mut self, time_off: TimeOfDay) -> Self {
        self.time_off = Some(time_off);
        self
    }

    /// Sets the active flag.
    #[must_use]
    pub fn with_active(mut self, is_active: bool) -> Self {
        self.is_active = is_active;
        self
    }

    /// Returns the edges due at `now`, on before off.
    #[must_use]
    pub fn edges_at(&self, now: TimeOfDay) -> Vec<Edge> {
        let mut edges = Vec::with_capacity(2);
        if self.time_on == now {
            edges.push(Edge::On);
        }
        if self.time_off == Some(now) {
            edges.push(Edge::Off);
        }
        edges
    }
}

/// A schedule transition point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Edge {
    /// The `time_on` edge.
    On,
    /// The `time_off` edge.
    Off,
}

impl Edge {
    /// Returns the power state this edge commands.
    #[must_use]
    pub const fn target_state(&self) -> PowerState {
        match self {
            Self::On => PowerState::On,
            Self::Off => PowerState::Off,
        }
    }
}

impl fmt::Display for Edge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::On => f.write_str("on"),
            Self::Off => f.write_str("off"),
        }
    }
}
