// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Identifier types for devices, schedules and feeds.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ValueError;

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// Creates a new random identifier.
            #[must_use]
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            /// Creates an identifier from an existing UUID.
            #[must_use]
            pub fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            /// Returns the underlying UUID.
            #[must_use]
            pub fn as_uuid(&self) -> Uuid {
                self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                // First 8 characters are enough to tell ids apart in logs
                let short = &self.0.to_string()[..8];
                write!(f, "{}({short}...)", stringify!($name))
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s).map(Self)
            }
        }

        impl From<Uuid> for $name {
            fn from(uuid: Uuid) -> Self {
                Self(uuid)
            }
        }
    };
}

uuid_id!(
    /// Unique identifier of a device record.
    ///
    /// # Examples
    ///
    /// ```
    /// use feedlink::types::DeviceId;
    ///
    /// let id = DeviceId::new();
    /// let parsed: DeviceId = id.to_string().parse().unwrap();
    /// assert_eq!(id, parsed);
    /// ```
    DeviceId
);

uuid_id!(
    /// Unique identifier of a schedule.
    ScheduleId
);

/// Key of a pub/sub feed addressing one physical actuator.
///
/// Feed keys become the last segment of an MQTT topic, so they may only
/// contain ASCII letters, digits, `-`, `_` and `.`.
///
/// # Examples
///
/// ```
/// use feedlink::types::FeedKey;
///
/// let key = FeedKey::new("living-room.light").unwrap();
/// assert_eq!(key.as_str(), "living-room.light");
///
/// assert!(FeedKey::new("").is_err());
/// assert!(FeedKey::new("bad/key").is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct FeedKey(String);

impl FeedKey {
    /// Creates a validated feed key.
    ///
    /// # Errors
    ///
    /// Returns `ValueError::InvalidFeedKey` if the key is empty or contains
    /// characters that are not valid in a topic segment.
    pub fn new(key: impl Into<String>) -> Result<Self, ValueError> {
        let key = key.into();
        let valid = !key.is_empty()
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
        if valid {
            Ok(Self(key))
        } else {
            Err(ValueError::InvalidFeedKey(key))
        }
    }

    /// Returns the key as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FeedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for FeedKey {
    type Err = ValueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for FeedKey {
    type Error = ValueError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<FeedKey> for String {
    fn from(key: FeedKey) -> Self {
        key.0
    }
}

impl AsRef<str> for FeedKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
