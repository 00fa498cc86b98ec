// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Validated value types shared by every component.

mod brightness;
mod ids;
mod power;
mod time_of_day;

pub use brightness::{Brightness, BrightnessFormula};
pub use ids::{DeviceId, FeedKey, ScheduleId};
pub use power::{Origin, PowerState};
pub use time_of_day::TimeOfDay;
