// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Brightness percentage and the formulas mapping it to a feed value.
//!
//! Dimmable devices expose a second feed whose value range depends on the
//! hardware (0-100, 0-255, ...). The mapping is one of a fixed set of
//! parameterized [`BrightnessFormula`]s; arbitrary expressions are not
//! supported.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ValueError;

/// Brightness level as a percentage (0-100).
///
/// # Examples
///
/// ```
/// use feedlink::types::Brightness;
///
/// let b = Brightness::new(75).unwrap();
/// assert_eq!(b.value(), 75);
/// assert!(Brightness::new(101).is_err());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u16", into = "u16")]
pub struct Brightness(u8);

impl Brightness {
    /// Minimum brightness (0%).
    pub const MIN: Self = Self(0);

    /// Maximum brightness (100%).
    pub const MAX: Self = Self(100);

    /// Creates a brightness value.
    ///
    /// # Errors
    ///
    /// Returns `ValueError::InvalidBrightness` if value exceeds 100.
    pub fn new(value: u16) -> Result<Self, ValueError> {
        match u8::try_from(value) {
            Ok(v) if v <= 100 => Ok(Self(v)),
            _ => Err(ValueError::InvalidBrightness(value)),
        }
    }

    /// Returns the percentage value.
    #[must_use]
    pub const fn value(&self) -> u8 {
        self.0
    }

    /// Returns the value as a fraction between 0.0 and 1.0.
    #[must_use]
    pub fn as_fraction(&self) -> f64 {
        f64::from(self.0) / 100.0
    }
}

impl fmt::Display for Brightness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}%", self.0)
    }
}

impl TryFrom<u16> for Brightness {
    type Error = ValueError;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Brightness> for u16 {
    fn from(b: Brightness) -> Self {
        u16::from(b.0)
    }
}

/// Maps a [`Brightness`] percentage to the integer a device feed expects.
///
/// # Examples
///
/// ```
/// use feedlink::types::{Brightness, BrightnessFormula};
///
/// let b = Brightness::new(50).unwrap();
/// assert_eq!(BrightnessFormula::Percent.feed_value(b), 50);
/// assert_eq!(BrightnessFormula::Scale { max: 255 }.feed_value(b), 128);
/// assert_eq!(
///     BrightnessFormula::Linear { factor: 2.0, offset: 10.0 }.feed_value(b),
///     110
/// );
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BrightnessFormula {
    /// The feed takes the percentage unchanged.
    #[default]
    Percent,
    /// The feed takes `0..=max`, scaled proportionally.
    Scale {
        /// Feed value at 100%.
        max: u16,
    },
    /// The feed takes `factor * percent + offset`, floored at zero.
    Linear {
        /// Multiplier applied to the percentage.
        factor: f64,
        /// Constant added after scaling.
        offset: f64,
    },
}

impl BrightnessFormula {
    /// Computes the feed value for a brightness.
    #[must_use]
    pub fn feed_value(&self, brightness: Brightness) -> u32 {
        let percent = f64::from(brightness.value());
        let raw = match *self {
            Self::Percent => percent,
            Self::Scale { max } => brightness.as_fraction() * f64::from(max),
            Self::Linear { factor, offset } => factor * percent + offset,
        };

        if !raw.is_finite() || raw <= 0.0 {
            return 0;
        }
        // Safe: clamped to the u32 range and non-negative
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let value = raw.round().min(f64::from(u32::MAX)) as u32;
        value
    }

    /// Computes the feed payload string for a brightness.
    #[must_use]
    pub fn feed_payload(&self, brightness: Brightness) -> String {
        self.feed_value(brightness).to_string()
    }
}
