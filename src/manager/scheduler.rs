// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Time-of-day scheduler.
//!
//! Every tick compares the current local `HH:MM` with the `time_on` and
//! `time_off` of each active schedule. A tick interval shorter than a minute
//! sees the same minute several times, so each `(schedule, edge)` pair is
//! remembered once fired and the memory is cleared when the minute changes.

use std::collections::HashSet;
use std::time::Duration;

use chrono::{Local, NaiveDateTime, Timelike};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use super::CommandGateway;
use crate::config::DEFAULT_SCHEDULER_INTERVAL;
use crate::state::Edge;
use crate::types::{DeviceId, Origin, ScheduleId, TimeOfDay};

/// A schedule edge the scheduler issued a command for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FiredEdge {
    /// Schedule that fired.
    pub schedule_id: ScheduleId,
    /// Device commanded.
    pub device_id: DeviceId,
    /// Which edge fired.
    pub edge: Edge,
}

/// Fires schedule edges through the command gateway.
///
/// # Examples
///
/// ```no_run
/// use std::time::Duration;
/// use feedlink::manager::{CommandGateway, Scheduler};
///
/// # fn example(gateway: CommandGateway) {
/// let handle = Scheduler::new(gateway)
///     .with_interval(Duration::from_secs(15))
///     .spawn();
/// # }
/// ```
#[derive(Debug)]
pub struct Scheduler {
    gateway: CommandGateway,
    interval: Duration,
    fired: HashSet<(ScheduleId, Edge)>,
    current_minute: Option<NaiveDateTime>,
}

impl Scheduler {
    /// Creates a scheduler with the default 15 second interval.
    #[must_use]
    pub fn new(gateway: CommandGateway) -> Self {
        Self {
            gateway,
            interval: DEFAULT_SCHEDULER_INTERVAL,
            fired: HashSet::new(),
            current_minute: None,
        }
    }

    /// Sets the tick interval.
    #[must_use]
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Returns the tick interval.
    #[must_use]
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Evaluates all active schedules at `now` (local wall-clock time).
    ///
    /// Returns the edges for which a command was accepted. Edges of
    /// schedules whose device no longer exists are logged and skipped; they
    /// count as fired for the rest of the minute.
    pub async fn tick(&mut self, now: NaiveDateTime) -> Vec<FiredEdge> {
        let minute = now.with_second(0).and_then(|t| t.with_nanosecond(0)).unwrap_or(now);
        if self.current_minute != Some(minute) {
            self.fired.clear();
            self.current_minute = Some(minute);
        }

        let schedules = match self.gateway.bridge().store().repository().active_schedules().await {
            Ok(schedules) => schedules,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to load schedules");
                return Vec::new();
            }
        };

        let time = TimeOfDay::from(now.time());
        let mut issued = Vec::new();

        for schedule in schedules {
            for edge in schedule.edges_at(time) {
                if !self.fired.insert((schedule.id, edge)) {
                    continue;
                }

                match self
                    .gateway
                    .request_toggle(schedule.device_id, edge.target_state(), Origin::Scheduled)
                    .await
                {
                    Ok(_) => {
                        tracing::info!(
                            schedule_id = %schedule.id,
                            device_id = %schedule.device_id,
                            %edge,
                            %time,
                            "Schedule fired"
                        );
                        issued.push(FiredEdge {
                            schedule_id: schedule.id,
                            device_id: schedule.device_id,
                            edge,
                        });
                    }
                    Err(e) if e.is_not_found() => {
                        tracing::warn!(
                            schedule_id = %schedule.id,
                            device_id = %schedule.device_id,
                            %edge,
                            "Schedule references a missing device, skipped"
                        );
                    }
                    Err(e) => {
                        tracing::warn!(
                            schedule_id = %schedule.id,
                            %edge,
                            error = %e,
                            "Failed to fire schedule"
                        );
                    }
                }
            }
        }

        issued
    }

    /// Ticks on the configured interval against the local clock, forever.
    ///
    /// Late ticks are delayed rather than bunched.
    pub async fn run(mut self) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!(interval_secs = self.interval.as_secs(), "Scheduler started");

        loop {
            ticker.tick().await;
            self.tick(Local::now().naive_local()).await;
        }
    }

    /// Spawns [`Scheduler::run`] on the runtime.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;
    use chrono::NaiveDate;

    use super::*;
    use crate::error::TransportError;
    use crate::event::EventBus;
    use crate::guard::EchoGuard;
    use crate::manager::FeedBridge;
    use crate::protocol::FeedPublisher;
    use crate::state::{Device, Schedule};
    use crate::store::{MemoryRepository, Repository, StateStore};
    use crate::types::FeedKey;

    struct Sink;

    #[async_trait]
    impl FeedPublisher for Sink {
        async fn publish(&self, _: &FeedKey, _: &str) -> Result<(), TransportError> {
            Ok(())
        }

        async fn subscribe(&self, _: &FeedKey) -> Result<(), TransportError> {
            Ok(())
        }
    }

    fn at(h: u32, m: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 1)
            .unwrap()
            .and_hms_opt(h, m, s)
            .unwrap()
    }

    async fn scheduler_with(schedules: &[Schedule], devices: &[Device]) -> Scheduler {
        let repo = Arc::new(MemoryRepository::new());
        for device in devices {
            repo.insert_device(device.clone()).await.unwrap();
        }
        for schedule in schedules {
            repo.save_schedule(schedule.clone()).await.unwrap();
        }
        let store = StateStore::new(repo, EventBus::new());
        let bridge = FeedBridge::new(store, EchoGuard::default(), Arc::new(Sink));
        Scheduler::new(CommandGateway::new(bridge))
    }

    fn lamp() -> Device {
        Device::new(FeedKey::new("lamp").unwrap(), "Lamp")
    }

    #[tokio::test]
    async fn fires_once_per_minute() {
        let lamp = lamp();
        let schedule = Schedule::new(lamp.id(), "07:00".parse().unwrap());
        let mut scheduler = scheduler_with(&[schedule.clone()], &[lamp.clone()]).await;

        let first = scheduler.tick(at(7, 0, 5)).await;
        assert_eq!(
            first,
            vec![FiredEdge {
                schedule_id: schedule.id,
                device_id: lamp.id(),
                edge: Edge::On,
            }]
        );
        assert!(scheduler.tick(at(7, 0, 20)).await.is_empty());
        assert!(scheduler.tick(at(7, 0, 59)).await.is_empty());
        assert!(scheduler.tick(at(7, 1, 0)).await.is_empty());
    }

    #[tokio::test]
    async fn fires_again_next_day() {
        let lamp = lamp();
        let schedule = Schedule::new(lamp.id(), "07:00".parse().unwrap());
        let mut scheduler = scheduler_with(&[schedule], &[lamp]).await;

        assert_eq!(scheduler.tick(at(7, 0, 0)).await.len(), 1);
        let next_day = at(7, 0, 10) + chrono::Duration::days(1);
        assert_eq!(scheduler.tick(next_day).await.len(), 1);
    }

    #[tokio::test]
    async fn off_edge_and_inactive_schedules() {
        let lamp = lamp();
        let active = Schedule::new(lamp.id(), "06:00".parse().unwrap()).with_time_off("22:30".parse().unwrap());
        let inactive = Schedule::new(lamp.id(), "22:30".parse().unwrap()).with_active(false);
        let mut scheduler = scheduler_with(&[active, inactive], &[lamp]).await;

        let fired = scheduler.tick(at(22, 30, 1)).await;
        assert_eq!(fired.len(), 1);
        assert_eq!(fired[0].edge, Edge::Off);
    }

    #[tokio::test]
    async fn dangling_device_is_skipped_quietly() {
        let schedule = Schedule::new(DeviceId::new(), "07:00".parse().unwrap());
        let mut scheduler = scheduler_with(&[schedule.clone()], &[]).await;

        assert!(scheduler.tick(at(7, 0, 5)).await.is_empty());
        assert!(scheduler.fired.contains(&(schedule.id, Edge::On)));
    }

    #[test]
    fn default_interval_is_fifteen_seconds() {
        let interval = DEFAULT_SCHEDULER_INTERVAL;
        assert_eq!(interval, Duration::from_secs(15));
    }
}
