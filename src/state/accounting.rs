// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Runtime and energy accounting.
//!
//! Everything here is a pure function of device records, audit history and
//! an explicit `now`, so results are reproducible in tests.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{AuditEvent, Device};
use crate::error::ValueError;
use crate::types::PowerState;

/// Time window for an energy report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PowerFilter {
    /// Whole device lifetime, from the cumulative counters.
    #[default]
    #[serde(rename = "none")]
    Lifetime,
    /// The last 7 days, from the audit history.
    Week,
    /// The last 30 days, from the audit history.
    Month,
}

impl PowerFilter {
    /// Returns the window length, or `None` for [`PowerFilter::Lifetime`].
    #[must_use]
    pub fn window(&self) -> Option<chrono::Duration> {
        match self {
            Self::Lifetime => None,
            Self::Week => Some(chrono::Duration::days(7)),
            Self::Month => Some(chrono::Duration::days(30)),
        }
    }

    /// Returns the start of the window ending at `now`.
    #[must_use]
    pub fn window_start(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.window().map(|w| now - w)
    }

    /// Returns the query-string name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Lifetime => "none",
            Self::Week => "week",
            Self::Month => "month",
        }
    }
}

impl fmt::Display for PowerFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PowerFilter {
    type Err = ValueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "none" => Ok(Self::Lifetime),
            "week" => Ok(Self::Week),
            "month" => Ok(Self::Month),
            _ => Err(ValueError::InvalidFilter(s.to_string())),
        }
    }
}

/// Aggregated power and energy figures.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PowerReport {
    /// Sum of the effective power of devices currently on, in watts.
    #[serde(rename = "currentPowerW")]
    pub current_power_w: f64,
    /// Energy consumed in the requested window, in kilowatt-hours.
    #[serde(rename = "totalEnergykWh")]
    pub total_energy_kwh: f64,
    /// Report time as Unix milliseconds.
    pub timestamp: i64,
}

/// Returns the lifetime runtime of a device at `now`.
///
/// This is the cumulative counter plus the ongoing on-interval, if any.
#[must_use]
pub fn lifetime_runtime(device: &Device, now: DateTime<Utc>) -> Duration {
    let running = device
        .last_on_time()
        .filter(|_| device.is_on())
        .and_then(|since| (now - since).to_std().ok())
        .unwrap_or(Duration::ZERO);
    device.cumulative_runtime() + running
}

/// Recomputes runtime from audit history within `[start, now]`.
///
/// `events` must belong to one device and be sorted by time. Each ON opens an
/// interval that the next OFF closes; ONs while an interval is open and OFFs
/// with no open interval are ignored. An interval still open at the end of
/// the history runs until `now`.
#[must_use]
pub fn windowed_runtime(events: &[AuditEvent], start: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
    let mut total = Duration::ZERO;
    let mut open: Option<DateTime<Utc>> = None;

    for event in events.iter().filter(|e| e.time >= start && e.time <= now) {
        match (event.state, open) {
            (PowerState::On, None) => open = Some(event.time),
            (PowerState::Off, Some(since)) => {
                total += (event.time - since).to_std().unwrap_or(Duration::ZERO);
                open = None;
            }
            _ => {}
        }
    }

    if let Some(since) = open {
        total += (now - since).to_std().unwrap_or(Duration::ZERO);
    }
    total
}

/// Converts a runtime at a given power draw to kilowatt-hours.
#[must_use]
pub fn energy_kwh(power_w: f64, runtime: Duration) -> f64 {
    let hours = runtime.as_secs_f64() / 3600.0;
    power_w * hours / 1000.0
}

/// Builds a report over `devices`.
///
/// `history` is consulted only for windowed filters and must return the
/// time-ordered audit events of the given device.
pub fn build_report<'a, I, F>(devices: I, filter: PowerFilter, now: DateTime<Utc>, mut history: F) -> PowerReport
where
    I: IntoIterator<Item = &'a Device>,
    F: FnMut(&Device) -> Vec<AuditEvent>,
{
    let mut current_power_w = 0.0;
    let mut total_energy_kwh = 0.0;

    for device in devices {
        let power = device.effective_power_w();
        if device.is_on() {
            current_power_w += power;
        }

        let runtime = match filter.window_start(now) {
            None => lifetime_runtime(device, now),
            Some(start) => windowed_runtime(&history(device), start, now),
        };
        total_energy_kwh += energy_kwh(power, runtime);
    }

    PowerReport {
        current_power_w: round_to(current_power_w, 2),
        total_energy_kwh: round_to(total_energy_kwh, 4),
        timestamp: now.timestamp_millis(),
    }
}

fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}
