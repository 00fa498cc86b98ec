// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Canonical power state and its feed encoding.
//!
//! Devices are either on or off. Historical producers reported this as
//! `"ON"`/`"OFF"` strings, booleans or `"1"`/`"0"`; inside the crate there is
//! exactly one representation, [`PowerState`], and the feed codec
//! ([`PowerState::from_feed`] / [`PowerState::feed_payload`]) is the only
//! place where wire values are interpreted.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ValueError;

/// Represents the power state of an actuator.
///
/// # Examples
///
/// ```
/// use feedlink::types::PowerState;
///
/// assert_eq!(PowerState::On.feed_payload(), "1");
/// assert_eq!(PowerState::from_feed("0").unwrap(), PowerState::Off);
/// assert_eq!(PowerState::from(true), PowerState::On);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PowerState {
    /// Power is off.
    #[default]
    Off,
    /// Power is on.
    On,
}

impl PowerState {
    /// Returns the display string (`"ON"` / `"OFF"`).
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Off => "OFF",
            Self::On => "ON",
        }
    }

    /// Returns the payload published on a feed (`"1"` / `"0"`).
    #[must_use]
    pub const fn feed_payload(&self) -> &'static str {
        match self {
            Self::Off => "0",
            Self::On => "1",
        }
    }

    /// Returns `true` if the state is [`PowerState::On`].
    #[must_use]
    pub const fn is_on(&self) -> bool {
        matches!(self, Self::On)
    }

    /// Returns the opposite state.
    #[must_use]
    pub const fn toggled(&self) -> Self {
        match self {
            Self::Off => Self::On,
            Self::On => Self::Off,
        }
    }

    /// Decodes a raw feed payload.
    ///
    /// Surrounding whitespace is ignored. Besides the canonical `"1"`/`"0"`,
    /// `ON`/`OFF` and `true`/`false` are accepted in any case.
    ///
    /// # Errors
    ///
    /// Returns `ValueError::InvalidPowerState` for any other payload.
    pub fn from_feed(payload: &str) -> Result<Self, ValueError> {
        payload.trim().parse()
    }
}

impl fmt::Display for PowerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PowerState {
    type Err = ValueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "OFF" | "0" | "FALSE" => Ok(Self::Off),
            "ON" | "1" | "TRUE" => Ok(Self::On),
            _ => Err(ValueError::InvalidPowerState(s.to_string())),
        }
    }
}

impl From<bool> for PowerState {
    fn from(value: bool) -> Self {
        if value { Self::On } else { Self::Off }
    }
}

impl From<PowerState> for bool {
    fn from(state: PowerState) -> Self {
        state.is_on()
    }
}

/// Where a state transition came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Origin {
    /// A user-issued toggle.
    Manual,
    /// A schedule edge.
    Scheduled,
    /// A message received on the device feed.
    Feed,
}

impl Origin {
    /// Returns the lowercase wire name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Manual => "manual",
            Self::Scheduled => "scheduled",
            Self::Feed => "feed",
        }
    }
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
