// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Durable device state and the single transition routine.
//!
//! [`Repository`] abstracts the storage technology. [`StateStore`] sits on
//! top of it and is the only writer of power state: every component commits
//! transitions through [`StateStore::apply_transition`], which serializes
//! commits per device, appends the audit entry and publishes the resulting
//! [`SyncEvent`].
//!
//! # Examples
//!
//! ```
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> feedlink::Result<()> {
//! use std::sync::Arc;
//! use chrono::Utc;
//! use feedlink::event::EventBus;
//! use feedlink::state::Device;
//! use feedlink::store::{MemoryRepository, Repository, StateStore};
//! use feedlink::types::{FeedKey, Origin, PowerState};
//!
//! let repo = Arc::new(MemoryRepository::new());
//! let lamp = Device::new(FeedKey::new("lamp")?, "Lamp");
//! repo.insert_device(lamp.clone()).await?;
//!
//! let store = StateStore::new(repo, EventBus::new());
//! let commit = store
//!     .apply_transition(lamp.id(), PowerState::On, Origin::Manual, Utc::now(), None)
//!     .await?;
//! assert!(commit.device.is_on());
//! # Ok(())
//! # }
//! ```

mod json_file;
mod memory;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

pub use json_file::JsonFileRepository;
pub use memory::MemoryRepository;

use crate::error::Error;
use crate::event::{EventBus, SyncEvent};
use crate::state::{AuditEvent, Device, PowerFilter, PowerReport, Schedule, Transition, accounting};
use crate::types::{Brightness, DeviceId, FeedKey, Origin, PowerState, ScheduleId};
use crate::Result;

/// Storage for devices, audit entries and schedules.
///
/// Implementations must be safe to share between tasks. Updates replace the
/// whole record; the state store guarantees that at most one update per
/// device is in flight.
#[async_trait]
pub trait Repository: Send + Sync {
    /// Returns a device by identifier.
    async fn device(&self, id: DeviceId) -> Result<Option<Device>>;

    /// Returns the device bound to a feed key.
    async fn device_by_feed(&self, feed_key: &FeedKey) -> Result<Option<Device>>;

    /// Returns all devices.
    async fn devices(&self) -> Result<Vec<Device>>;

    /// Adds a new device.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Duplicate` if the identifier or feed key is taken.
    async fn insert_device(&self, device: Device) -> Result<()>;

    /// Replaces a device record. Returns `false` if the device no longer exists.
    async fn update_device(&self, device: &Device) -> Result<bool>;

    /// Removes a device. Returns `false` if it did not exist.
    async fn remove_device(&self, id: DeviceId) -> Result<bool>;

    /// Appends an audit entry.
    async fn append_audit(&self, event: AuditEvent) -> Result<()>;

    /// Returns a device's audit entries at or after `since`, oldest first.
    async fn audit_history(&self, device_id: DeviceId, since: Option<DateTime<Utc>>) -> Result<Vec<AuditEvent>>;

    /// Returns audit entries newest first, optionally for one device.
    async fn recent_audit(&self, device_id: Option<DeviceId>, limit: Option<usize>) -> Result<Vec<AuditEvent>>;

    /// Returns all schedules.
    async fn schedules(&self) -> Result<Vec<Schedule>>;

    /// Returns schedules with `is_active` set.
    async fn active_schedules(&self) -> Result<Vec<Schedule>> {
        let schedules = self.schedules().await?;
        Ok(schedules.into_iter().filter(|s| s.is_active).collect())
    }

    /// Inserts or replaces a schedule.
    async fn save_schedule(&self, schedule: Schedule) -> Result<()>;

    /// Removes a schedule. Returns `false` if it did not exist.
    async fn remove_schedule(&self, id: ScheduleId) -> Result<bool>;
}

/// Result of a committed transition.
#[derive(Debug, Clone)]
pub struct Commit {
    /// The device record after the commit.
    pub device: Device,
    /// What the commit did to the power state.
    pub transition: Transition,
    /// The event published for the commit.
    pub event: SyncEvent,
}

/// Exclusive hold on one device's commit path.
///
/// Obtained from [`StateStore::lock_device`]; released on drop.
pub struct DeviceLock {
    device_id: DeviceId,
    _guard: tokio::sync::OwnedMutexGuard<()>,
}

impl DeviceLock {
    /// Returns the locked device.
    #[must_use]
    pub fn device_id(&self) -> DeviceId {
        self.device_id
    }
}

impl fmt::Debug for DeviceLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceLock").field("device_id", &self.device_id).finish()
    }
}

/// Serialized access to device state.
///
/// Cloning is cheap and clones share the same repository, locks and bus.
#[derive(Clone)]
pub struct StateStore {
    inner: Arc<StoreInner>,
}

struct StoreInner {
    repo: Arc<dyn Repository>,
    locks: parking_lot::Mutex<HashMap<DeviceId, Arc<tokio::sync::Mutex<()>>>>,
    events: EventBus,
}

impl fmt::Debug for StateStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateStore")
            .field("locked_devices", &self.inner.locks.lock().len())
            .field("subscribers", &self.inner.events.subscriber_count())
            .finish_non_exhaustive()
    }
}

impl StateStore {
    /// Creates a store over `repo` publishing commits on `events`.
    pub fn new(repo: Arc<dyn Repository>, events: EventBus) -> Self {
        Self {
            inner: Arc::new(StoreInner {
                repo,
                locks: parking_lot::Mutex::new(HashMap::new()),
                events,
            }),
        }
    }

    /// Returns the underlying repository.
    #[must_use]
    pub fn repository(&self) -> &Arc<dyn Repository> {
        &self.inner.repo
    }

    /// Returns the bus commits are published on.
    #[must_use]
    pub fn events(&self) -> &EventBus {
        &self.inner.events
    }

    /// Subscribes to committed state changes.
    #[must_use]
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<SyncEvent> {
        self.inner.events.subscribe()
    }

    /// Returns a device.
    ///
    /// # Errors
    ///
    /// Returns `Error::DeviceNotFound` if no such device exists.
    pub async fn device(&self, id: DeviceId) -> Result<Device> {
        self.inner.repo.device(id).await?.ok_or(Error::DeviceNotFound(id))
    }

    /// Returns the device bound to a feed key.
    ///
    /// # Errors
    ///
    /// Returns `Error::FeedNotFound` if no device uses the key.
    pub async fn device_by_feed(&self, feed_key: &FeedKey) -> Result<Device> {
        self.inner
            .repo
            .device_by_feed(feed_key)
            .await?
            .ok_or_else(|| Error::FeedNotFound(feed_key.to_string()))
    }

    /// Returns all devices.
    ///
    /// # Errors
    ///
    /// Returns the repository error, if any.
    pub async fn devices(&self) -> Result<Vec<Device>> {
        self.inner.repo.devices().await
    }

    fn device_lock(&self, id: DeviceId) -> Arc<tokio::sync::Mutex<()>> {
        self.inner.locks.lock().entry(id).or_default().clone()
    }

    fn forget_lock(&self, id: DeviceId) {
        self.inner.locks.lock().remove(&id);
    }

    /// Looks a device up under a held lock, dropping the lock entry of a
    /// device that no longer exists.
    async fn locked_device(&self, held: &DeviceLock) -> Result<Device> {
        match self.inner.repo.device(held.device_id).await? {
            Some(device) => Ok(device),
            None => Err(self.gone(held.device_id)),
        }
    }

    fn gone(&self, id: DeviceId) -> Error {
        self.forget_lock(id);
        Error::DeviceNotFound(id)
    }

    /// Takes exclusive hold of one device's commit path.
    ///
    /// While the returned [`DeviceLock`] is alive no other transition,
    /// brightness or runtime update for the device can commit. Waiters are
    /// served in the order they started waiting.
    ///
    /// # Errors
    ///
    /// Returns `Error::DeviceNotFound` if the device does not exist; no lock
    /// is created for it in that case.
    pub async fn lock_device(&self, device_id: DeviceId) -> Result<DeviceLock> {
        self.device(device_id).await?;
        let guard = self.device_lock(device_id).lock_owned().await;
        Ok(DeviceLock {
            device_id,
            _guard: guard,
        })
    }

    /// Commits a power state for one device.
    ///
    /// Under the device's lock the record is re-read, updated, the audit
    /// entry appended and the event published, so events for one device are
    /// observed in commit order. Applying the current state is a valid
    /// commit that only touches `last_activity`.
    ///
    /// `action` defaults to a label derived from state and origin.
    ///
    /// # Errors
    ///
    /// Returns `Error::DeviceNotFound` if the device does not exist or was
    /// removed before the update landed, and repository errors otherwise.
    pub async fn apply_transition(
        &self,
        device_id: DeviceId,
        new_state: PowerState,
        origin: Origin,
        now: DateTime<Utc>,
        action: Option<String>,
    ) -> Result<Commit> {
        let held = self.lock_device(device_id).await?;
        self.apply_transition_locked(&held, new_state, origin, now, action).await
    }

    /// Same as [`StateStore::apply_transition`] for a device whose lock the
    /// caller already holds.
    ///
    /// # Errors
    ///
    /// See [`StateStore::apply_transition`].
    pub async fn apply_transition_locked(
        &self,
        held: &DeviceLock,
        new_state: PowerState,
        origin: Origin,
        now: DateTime<Utc>,
        action: Option<String>,
    ) -> Result<Commit> {
        let device_id = held.device_id;
        let mut device = self.locked_device(held).await?;
        let transition = device.apply_transition(new_state, now);

        if !self.inner.repo.update_device(&device).await? {
            return Err(self.gone(device_id));
        }

        let action = action.unwrap_or_else(|| AuditEvent::default_action(new_state, origin));
        self.inner
            .repo
            .append_audit(AuditEvent::new(device_id, new_state, origin, now, action))
            .await?;

        let event = SyncEvent::new(device_id, new_state, origin, now);
        self.inner.events.publish(event.clone());

        match transition {
            Transition::SwitchedOff { ran } => tracing::debug!(
                %device_id,
                %origin,
                ran_ms = u64::try_from(ran.as_millis()).unwrap_or(u64::MAX),
                "Device switched off"
            ),
            Transition::SwitchedOn => tracing::debug!(%device_id, %origin, "Device switched on"),
            Transition::Unchanged => {
                tracing::debug!(%device_id, %origin, state = %new_state, "State unchanged");
            }
        }

        Ok(Commit {
            device,
            transition,
            event,
        })
    }

    /// Records the last commanded brightness of a device.
    ///
    /// # Errors
    ///
    /// Returns `Error::DeviceNotFound` if the device does not exist.
    pub async fn set_brightness(&self, device_id: DeviceId, brightness: Brightness) -> Result<Device> {
        let held = self.lock_device(device_id).await?;
        self.set_brightness_locked(&held, brightness).await
    }

    /// Same as [`StateStore::set_brightness`] under a held lock.
    ///
    /// # Errors
    ///
    /// Returns `Error::DeviceNotFound` if the device was removed.
    pub async fn set_brightness_locked(&self, held: &DeviceLock, brightness: Brightness) -> Result<Device> {
        let mut device = self.locked_device(held).await?;
        device.set_brightness(brightness);
        if !self.inner.repo.update_device(&device).await? {
            return Err(self.gone(held.device_id));
        }
        Ok(device)
    }

    /// Clears a device's lifetime runtime counter.
    ///
    /// # Errors
    ///
    /// Returns `Error::DeviceNotFound` if the device does not exist.
    pub async fn reset_runtime(&self, device_id: DeviceId) -> Result<Device> {
        let held = self.lock_device(device_id).await?;

        let mut device = self.locked_device(&held).await?;
        device.reset_runtime();
        if !self.inner.repo.update_device(&device).await? {
            return Err(self.gone(device_id));
        }
        tracing::info!(%device_id, "Runtime counter reset");
        Ok(device)
    }

    /// Computes the power and energy report for all devices at `now`.
    ///
    /// # Errors
    ///
    /// Returns repository errors.
    pub async fn power(&self, filter: PowerFilter, now: DateTime<Utc>) -> Result<PowerReport> {
        let devices = self.inner.repo.devices().await?;

        let mut histories: HashMap<DeviceId, Vec<AuditEvent>> = HashMap::new();
        if let Some(start) = filter.window_start(now) {
            for device in &devices {
                let events = self.inner.repo.audit_history(device.id(), Some(start)).await?;
                histories.insert(device.id(), events);
            }
        }

        Ok(accounting::build_report(&devices, filter, now, |device| {
            histories.remove(&device.id()).unwrap_or_default()
        }))
    }

    /// Returns audit entries across all devices, newest first.
    ///
    /// # Errors
    ///
    /// Returns repository errors.
    pub async fn history(&self, limit: Option<usize>) -> Result<Vec<AuditEvent>> {
        self.inner.repo.recent_audit(None, limit).await
    }

    /// Returns one device's audit entries, newest first.
    ///
    /// # Errors
    ///
    /// Returns `Error::DeviceNotFound` if the device does not exist.
    pub async fn device_history(&self, device_id: DeviceId, limit: Option<usize>) -> Result<Vec<AuditEvent>> {
        self.device(device_id).await?;
        self.inner.repo.recent_audit(Some(device_id), limit).await
    }
}
