// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Persistent device record.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{Brightness, BrightnessFormula, DeviceId, FeedKey, PowerState};

/// Rated power assumed for devices that were provisioned without one.
pub const DEFAULT_RATED_POWER_W: f64 = 60.0;

/// Persistent record of one actuator.
///
/// The record is only mutated through [`Device::apply_transition`], which
/// maintains two invariants:
///
/// - `state` is on if and only if `last_on_time` is set;
/// - the cumulative runtime only grows, at on→off transitions, by the
///   elapsed duration of the on-interval.
///
/// # Examples
///
/// ```
/// use chrono::{TimeZone, Utc};
/// use feedlink::state::Device;
/// use feedlink::types::{FeedKey, PowerState};
///
/// let mut lamp = Device::new(FeedKey::new("lamp").unwrap(), "Lamp").with_rated_power(60.0);
///
/// let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 18, 0, 0).unwrap();
/// lamp.apply_transition(PowerState::On, t0);
/// lamp.apply_transition(PowerState::Off, t0 + chrono::Duration::hours(1));
///
/// assert_eq!(lamp.cumulative_runtime().as_secs(), 3600);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Device {
    id: DeviceId,
    feed_key: FeedKey,
    name: String,
    state: PowerState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    rated_power_w: Option<f64>,
    #[serde(default)]
    last_on_time: Option<DateTime<Utc>>,
    #[serde(default)]
    cumulative_runtime_ms: u64,
    #[serde(default)]
    last_activity: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    room_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    home_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    brightness_feed: Option<FeedKey>,
    #[serde(default)]
    brightness_formula: BrightnessFormula,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    brightness: Option<Brightness>,
}

/// Outcome of applying a state to a device record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// The device went from off to on.
    SwitchedOn,
    /// The device went from on to off after running for `ran`.
    SwitchedOff {
        /// Duration of the on-interval that just ended.
        ran: Duration,
    },
    /// The device was already in the requested state.
    Unchanged,
}

impl Transition {
    /// Returns `true` if the power state changed.
    #[must_use]
    pub fn is_change(&self) -> bool {
        !matches!(self, Self::Unchanged)
    }
}

impl Device {
    /// Creates a new device record in the off state.
    #[must_use]
    pub fn new(feed_key: FeedKey, name: impl Into<String>) -> Self {
        Self::with_id(DeviceId::new(), feed_key, name)
    }

    /// Creates a new device record with a specific identifier.
    #[must_use]
    pub fn with_id(id: DeviceId, feed_key: FeedKey, name: impl Into<String>) -> Self {
        Self {
            id,
            feed_key,
            name: name.into(),
            state: PowerState::Off,
            rated_power_w: None,
            last_on_time: None,
            cumulative_runtime_ms: 0,
            last_activity: None,
            room_id: None,
            home_id: None,
            brightness_feed: None,
            brightness_formula: BrightnessFormula::default(),
            brightness: None,
        }
    }

    /// Sets the rated power draw in watts.
    #[must_use]
    pub fn with_rated_power(mut self, watts: f64) -> Self {
        self.rated_power_w = Some(watts);
        self
    }

    /// Associates the device with a room.
    #[must_use]
    pub fn with_room(mut self, room_id: impl Into<String>) -> Self {
        self.room_id = Some(room_id.into());
        self
    }

    /// Associates the device with a home.
    #[must_use]
    pub fn with_home(mut self, home_id: impl Into<String>) -> Self {
        self.home_id = Some(home_id.into());
        self
    }

    /// Adds a brightness feed and the formula used to compute its values.
    #[must_use]
    pub fn with_brightness_feed(mut self, feed_key: FeedKey, formula: BrightnessFormula) -> Self {
        self.brightness_feed = Some(feed_key);
        self.brightness_formula = formula;
        self
    }

    /// Returns the device identifier.
    #[must_use]
    pub fn id(&self) -> DeviceId {
        self.id
    }

    /// Returns the key of the feed addressing this device.
    #[must_use]
    pub fn feed_key(&self) -> &FeedKey {
        &self.feed_key
    }

    /// Returns the display name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the current power state.
    #[must_use]
    pub fn state(&self) -> PowerState {
        self.state
    }

    /// Returns `true` if the device is on.
    #[must_use]
    pub fn is_on(&self) -> bool {
        self.state.is_on()
    }

    /// Returns the configured rated power, if any.
    #[must_use]
    pub fn rated_power_w(&self) -> Option<f64> {
        self.rated_power_w
    }

    /// Returns the power draw used for accounting.
    ///
    /// Falls back to [`DEFAULT_RATED_POWER_W`] when no positive rating is set.
    #[must_use]
    pub fn effective_power_w(&self) -> f64 {
        self.rated_power_w
            .filter(|w| w.is_finite() && *w > 0.0)
            .unwrap_or(DEFAULT_RATED_POWER_W)
    }

    /// Returns when the current on-interval started.
    #[must_use]
    pub fn last_on_time(&self) -> Option<DateTime<Utc>> {
        self.last_on_time
    }

    /// Returns the lifetime runtime accumulated by completed on-intervals.
    #[must_use]
    pub fn cumulative_runtime(&self) -> Duration {
        Duration::from_millis(self.cumulative_runtime_ms)
    }

    /// Returns the time of the last committed transition, including no-ops.
    #[must_use]
    pub fn last_activity(&self) -> Option<DateTime<Utc>> {
        self.last_activity
    }

    /// Returns the room foreign key.
    #[must_use]
    pub fn room_id(&self) -> Option<&str> {
        self.room_id.as_deref()
    }

    /// Returns the home foreign key.
    #[must_use]
    pub fn home_id(&self) -> Option<&str> {
        self.home_id.as_deref()
    }

    /// Returns the brightness feed key, if the device is dimmable.
    #[must_use]
    pub fn brightness_feed(&self) -> Option<&FeedKey> {
        self.brightness_feed.as_ref()
    }

    /// Returns the formula mapping brightness to the brightness feed value.
    #[must_use]
    pub fn brightness_formula(&self) -> BrightnessFormula {
        self.brightness_formula
    }

    /// Returns the last commanded brightness.
    #[must_use]
    pub fn brightness(&self) -> Option<Brightness> {
        self.brightness
    }

    /// Records the last commanded brightness.
    pub fn set_brightness(&mut self, brightness: Brightness) {
        self.brightness = Some(brightness);
    }

    /// Applies a power state at `now` and updates runtime accounting.
    ///
    /// A negative on-interval (clock moved backwards) counts as zero.
    pub fn apply_transition(&mut self, new_state: PowerState, now: DateTime<Utc>) -> Transition {
        self.last_activity = Some(now);

        match (self.state, new_state) {
            (PowerState::Off, PowerState::On) => {
                self.state = PowerState::On;
                self.last_on_time = Some(now);
                Transition::SwitchedOn
            }
            (PowerState::On, PowerState::Off) => {
                self.state = PowerState::Off;
                let ran = self
                    .last_on_time
                    .take()
                    .and_then(|since| (now - since).to_std().ok())
                    .unwrap_or(Duration::ZERO);
                let ran_ms = u64::try_from(ran.as_millis()).unwrap_or(u64::MAX);
                self.cumulative_runtime_ms = self.cumulative_runtime_ms.saturating_add(ran_ms);
                Transition::SwitchedOff { ran }
            }
            _ => Transition::Unchanged,
        }
    }

    /// Clears the lifetime runtime counter.
    ///
    /// An ongoing on-interval is kept, so the device keeps accruing from
    /// its last switch-on.
    pub fn reset_runtime(&mut self) {
        self.cumulative_runtime_ms = 0;
    }

    /// Returns `true` if `state` and `last_on_time` agree.
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        self.state.is_on() == self.last_on_time.is_some()
    }

    /// Restores the on/`last_on_time` invariant of a record loaded from storage.
    ///
    /// An on device without a start time is treated as switched on at `now`;
    /// an off device loses its stale start time. Returns `true` if the record
    /// was modified.
    pub fn repair(&mut self, now: DateTime<Utc>) -> bool {
        match (self.state, self.last_on_time) {
            (PowerState::On, None) => {
                self.last_on_time = Some(now);
                true
            }
            (PowerState::Off, Some(_)) => {
                self.last_on_time = None;
                true
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn t(ms: i64) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(1_700_000_000_000 + ms).unwrap()
    }

    fn lamp() -> Device {
        Device::new(FeedKey::new("lamp").unwrap(), "Lamp")
    }

    #[test]
    fn new_device_is_off_and_consistent() {
        let d = lamp();
        assert_eq!(d.state(), PowerState::Off);
        assert!(d.last_on_time().is_none());
        assert!(d.is_consistent());
        assert_eq!(d.cumulative_runtime(), Duration::ZERO);
    }

    #[test]
    fn off_to_on_sets_last_on_time() {
        let mut d = lamp();
        assert_eq!(d.apply_transition(PowerState::On, t(0)), Transition::SwitchedOn);
        assert_eq!(d.last_on_time(), Some(t(0)));
        assert!(d.is_consistent());
    }

    #[test]
    fn on_to_off_accumulates_exact_interval() {
        let mut d = lamp();
        d.apply_transition(PowerState::On, t(0));
        let tr = d.apply_transition(PowerState::Off, t(3_600_000));

        assert_eq!(
            tr,
            Transition::SwitchedOff {
                ran: Duration::from_millis(3_600_000)
            }
        );
        assert_eq!(d.cumulative_runtime(), Duration::from_millis(3_600_000));
        assert!(d.last_on_time().is_none());
        assert!(d.is_consistent());
    }

    #[test]
    fn repeated_cycles_add_up() {
        let mut d = lamp();
        d.apply_transition(PowerState::On, t(0));
        d.apply_transition(PowerState::Off, t(1_000));
        d.apply_transition(PowerState::On, t(5_000));
        d.apply_transition(PowerState::Off, t(7_500));
        assert_eq!(d.cumulative_runtime(), Duration::from_millis(3_500));
    }

    #[test]
    fn repeated_on_only_touches_activity() {
        let mut d = lamp();
        d.apply_transition(PowerState::On, t(0));
        assert_eq!(d.apply_transition(PowerState::On, t(10_000)), Transition::Unchanged);

        assert_eq!(d.last_on_time(), Some(t(0)));
        assert_eq!(d.last_activity(), Some(t(10_000)));
        assert_eq!(d.cumulative_runtime(), Duration::ZERO);
    }

    #[test]
    fn repeated_off_is_noop() {
        let mut d = lamp();
        assert_eq!(d.apply_transition(PowerState::Off, t(0)), Transition::Unchanged);
        assert!(!d.apply_transition(PowerState::Off, t(1)).is_change());
        assert_eq!(d.cumulative_runtime(), Duration::ZERO);
    }

    #[test]
    fn clock_skew_counts_as_zero() {
        let mut d = lamp();
        d.apply_transition(PowerState::On, t(10_000));
        d.apply_transition(PowerState::Off, t(5_000));
        assert_eq!(d.cumulative_runtime(), Duration::ZERO);
        assert!(d.is_consistent());
    }

    #[test]
    fn reset_keeps_running_interval() {
        let mut d = lamp();
        d.apply_transition(PowerState::On, t(0));
        d.apply_transition(PowerState::Off, t(1_000));
        d.apply_transition(PowerState::On, t(2_000));
        d.reset_runtime();

        assert_eq!(d.cumulative_runtime(), Duration::ZERO);
        assert_eq!(d.last_on_time(), Some(t(2_000)));
    }

    #[test]
    fn effective_power_defaults_to_sixty() {
        assert!((lamp().effective_power_w() - DEFAULT_RATED_POWER_W).abs() < f64::EPSILON);
        assert!((lamp().with_rated_power(0.0).effective_power_w() - 60.0).abs() < f64::EPSILON);
        assert!((lamp().with_rated_power(9.5).effective_power_w() - 9.5).abs() < f64::EPSILON);
    }

    #[test]
    fn repair_restores_invariant() {
        let mut d: Device = serde_json::from_value(serde_json::json!({
            "id": DeviceId::new(),
            "feedKey": "fan",
            "name": "Fan",
            "state": "ON"
        }))
        .unwrap();
        assert!(!d.is_consistent());
        assert!(d.repair(t(0)));
        assert!(d.is_consistent());
        assert!(!d.repair(t(1)));
    }

    #[test]
    fn serde_uses_camel_case() {
        let d = lamp().with_rated_power(40.0).with_room("kitchen");
        let json = serde_json::to_value(&d).unwrap();
        assert_eq!(json["feedKey"], "lamp");
        assert_eq!(json["ratedPowerW"], 40.0);
        assert_eq!(json["roomId"], "kitchen");
        assert_eq!(json["cumulativeRuntimeMs"], 0);
    }
}
