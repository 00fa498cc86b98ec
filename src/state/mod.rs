// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Device records, schedules, audit entries and runtime accounting.
//!
//! The [`Device`] record owns the power-state invariants; the
//! [`accounting`] functions derive runtime and energy from it.
//!
//! # Examples
//!
//! ```
//! use chrono::Utc;
//! use feedlink::state::{Device, Transition};
//! use feedlink::types::{FeedKey, PowerState};
//!
//! let mut device = Device::new(FeedKey::new("porch").unwrap(), "Porch light");
//!
//! let transition = device.apply_transition(PowerState::On, Utc::now());
//! assert_eq!(transition, Transition::SwitchedOn);
//! assert!(device.last_on_time().is_some());
//! ```

pub mod accounting;
mod audit;
mod device;
mod schedule;

pub use accounting::{PowerFilter, PowerReport};
pub use audit::AuditEvent;
pub use device::{DEFAULT_RATED_POWER_W, Device, Transition};
pub use schedule::{Edge, Schedule};
