// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! In-memory repository and the snapshot shared with the file repository.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use super::Repository;
use crate::Result;
use crate::error::StoreError;
use crate::state::{AuditEvent, Device, Schedule};
use crate::types::{DeviceId, FeedKey, ScheduleId};

/// Complete repository contents.
///
/// The JSON file repository stores `devices` and `schedules` in its state
/// file and `audit` in a separate log; older state files also carry `audit`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub(crate) struct Snapshot {
    #[serde(default)]
    pub(crate) devices: Vec<Device>,
    #[serde(default)]
    pub(crate) schedules: Vec<Schedule>,
    #[serde(default)]
    pub(crate) audit: Vec<AuditEvent>,
}

impl Snapshot {
    pub(crate) fn device(&self, id: DeviceId) -> Option<Device> {
        self.devices.iter().find(|d| d.id() == id).cloned()
    }

    pub(crate) fn device_by_feed(&self, feed_key: &FeedKey) -> Option<Device> {
        self.devices.iter().find(|d| d.feed_key() == feed_key).cloned()
    }

    pub(crate) fn insert_device(&mut self, device: Device) -> std::result::Result<(), StoreError> {
        if self.devices.iter().any(|d| d.id() == device.id()) {
            return Err(StoreError::Duplicate(format!("device {}", device.id())));
        }
        if self.devices.iter().any(|d| d.feed_key() == device.feed_key()) {
            return Err(StoreError::Duplicate(format!("feed '{}'", device.feed_key())));
        }
        self.devices.push(device);
        Ok(())
    }

    pub(crate) fn update_device(&mut self, device: &Device) -> bool {
        match self.devices.iter_mut().find(|d| d.id() == device.id()) {
            Some(slot) => {
                *slot = device.clone();
                true
            }
            None => false,
        }
    }

    pub(crate) fn remove_device(&mut self, id: DeviceId) -> bool {
        let before = self.devices.len();
        self.devices.retain(|d| d.id() != id);
        self.devices.len() != before
    }

    pub(crate) fn audit_history(&self, device_id: DeviceId, since: Option<DateTime<Utc>>) -> Vec<AuditEvent> {
        let mut events: Vec<AuditEvent> = self
            .audit
            .iter()
            .filter(|e| e.device_id == device_id && since.is_none_or(|s| e.time >= s))
            .cloned()
            .collect();
        // Stable, so same-instant events keep append order
        events.sort_by_key(|e| e.time);
        events
    }

    pub(crate) fn recent_audit(&self, device_id: Option<DeviceId>, limit: Option<usize>) -> Vec<AuditEvent> {
        let mut events: Vec<AuditEvent> = self
            .audit
            .iter()
            .filter(|e| device_id.is_none_or(|id| e.device_id == id))
            .cloned()
            .collect();
        events.sort_by_key(|e| e.time);
        events.reverse();
        if let Some(limit) = limit {
            events.truncate(limit);
        }
        events
    }

    pub(crate) fn save_schedule(&mut self, schedule: Schedule) {
        match self.schedules.iter_mut().find(|s| s.id == schedule.id) {
            Some(slot) => *slot = schedule,
            None => self.schedules.push(schedule),
        }
    }

    pub(crate) fn remove_schedule(&mut self, id: ScheduleId) -> bool {
        let before = self.schedules.len();
        self.schedules.retain(|s| s.id != id);
        self.schedules.len() != before
    }
}

/// Repository kept entirely in memory.
///
/// Intended as a test double and for short-lived tools; nothing survives the
/// process. Use [`JsonFileRepository`](super::JsonFileRepository) for
/// durable state.
///
/// # Examples
///
/// ```
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> feedlink::Result<()> {
/// use feedlink::state::Device;
/// use feedlink::store::{MemoryRepository, Repository};
/// use feedlink::types::FeedKey;
///
/// let repo = MemoryRepository::new();
/// let device = Device::new(FeedKey::new("lamp")?, "Lamp");
/// repo.insert_device(device.clone()).await?;
///
/// assert_eq!(repo.device(device.id()).await?, Some(device));
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Default)]
pub struct MemoryRepository {
    snapshot: RwLock<Snapshot>,
}

impl MemoryRepository {
    /// Creates an empty repository.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Repository for MemoryRepository {
    async fn device(&self, id: DeviceId) -> Result<Option<Device>> {
        Ok(self.snapshot.read().device(id))
    }

    async fn device_by_feed(&self, feed_key: &FeedKey) -> Result<Option<Device>> {
        Ok(self.snapshot.read().device_by_feed(feed_key))
    }

    async fn devices(&self) -> Result<Vec<Device>> {
        Ok(self.snapshot.read().devices.clone())
    }

    async fn insert_device(&self, device: Device) -> Result<()> {
        Ok(self.snapshot.write().insert_device(device)?)
    }

    async fn update_device(&self, device: &Device) -> Result<bool> {
        Ok(self.snapshot.write().update_device(device))
    }

    async fn remove_device(&self, id: DeviceId) -> Result<bool> {
        Ok(self.snapshot.write().remove_device(id))
    }

    async fn append_audit(&self, event: AuditEvent) -> Result<()> {
        self.snapshot.write().audit.push(event);
        Ok(())
    }

    async fn audit_history(&self, device_id: DeviceId, since: Option<DateTime<Utc>>) -> Result<Vec<AuditEvent>> {
        Ok(self.snapshot.read().audit_history(device_id, since))
    }

    async fn recent_audit(&self, device_id: Option<DeviceId>, limit: Option<usize>) -> Result<Vec<AuditEvent>> {
        Ok(self.snapshot.read().recent_audit(device_id, limit))
    }

    async fn schedules(&self) -> Result<Vec<Schedule>> {
        Ok(self.snapshot.read().schedules.clone())
    }

    async fn save_schedule(&self, schedule: Schedule) -> Result<()> {
        self.snapshot.write().save_schedule(schedule);
        Ok(())
    }

    async fn remove_schedule(&self, id: ScheduleId) -> Result<bool> {
        Ok(self.snapshot.write().remove_schedule(id))
    }
}
