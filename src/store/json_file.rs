// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Durable repository backed by a JSON state file and a JSON-lines audit log.

use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use super::Repository;
use super::memory::Snapshot;
use crate::Result;
use crate::error::StoreError;
use crate::state::{AuditEvent, Device, Schedule};
use crate::types::{DeviceId, FeedKey, ScheduleId};

/// On-disk form of the state file.
#[derive(Serialize)]
struct StateFile<'a> {
    devices: &'a [Device],
    schedules: &'a [Schedule],
}

/// Repository persisting devices and schedules to a JSON file.
///
/// Device and schedule mutations rewrite the state file through a temporary
/// sibling followed by a rename, so a crash leaves either the old or the new
/// contents on disk. Audit entries go to a separate append-only log next to
/// it (`feedlink.json` keeps its history in `feedlink.audit.jsonl`), one JSON
/// object per line.
///
/// # Examples
///
/// ```no_run
/// # async fn example() -> feedlink::Result<()> {
/// use feedlink::store::JsonFileRepository;
///
/// let repo = JsonFileRepository::open("state/feedlink.json").await?;
/// assert!(repo.audit_path().ends_with("feedlink.audit.jsonl"));
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct JsonFileRepository {
    path: PathBuf,
    audit_path: PathBuf,
    snapshot: Mutex<Snapshot>,
}

impl JsonFileRepository {
    /// Opens the repository at `path`, creating it empty if the file is absent.
    ///
    /// Device records whose power state disagrees with their on-interval
    /// start are repaired and logged. Audit log lines that do not parse,
    /// such as a tail cut short by a crash, are skipped with a warning.
    /// Audit entries embedded in a state file written by an older version
    /// are moved to the log.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Io` if a file cannot be read and
    /// `StoreError::Serialization` if the state file is not valid.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let audit_path = path.with_extension("audit.jsonl");

        let mut snapshot = match tokio::fs::read(&path).await {
            Ok(bytes) => {
                let mut snapshot: Snapshot = serde_json::from_slice(&bytes).map_err(StoreError::from)?;
                repair(&mut snapshot, Utc::now());
                tracing::info!(
                    path = %path.display(),
                    devices = snapshot.devices.len(),
                    schedules = snapshot.schedules.len(),
                    "Loaded state file"
                );
                snapshot
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                tracing::info!(path = %path.display(), "No state file found, starting empty");
                Snapshot::default()
            }
            Err(e) => return Err(StoreError::from(e).into()),
        };

        let legacy = std::mem::take(&mut snapshot.audit);
        snapshot.audit = read_audit_log(&audit_path).await?;

        let repo = Self {
            path,
            audit_path,
            snapshot: Mutex::new(snapshot),
        };

        if !legacy.is_empty() {
            let mut snapshot = repo.snapshot.lock().await;
            repo.append_lines(&legacy).await?;
            repo.persist(&snapshot).await?;
            tracing::info!(entries = legacy.len(), "Moved audit entries to the audit log");
            let newer = std::mem::replace(&mut snapshot.audit, legacy);
            snapshot.audit.extend(newer);
        }

        Ok(repo)
    }

    /// Returns the state file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the audit log path.
    #[must_use]
    pub fn audit_path(&self) -> &Path {
        &self.audit_path
    }

    async fn create_parent(&self) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(StoreError::from)?;
        }
        Ok(())
    }

    async fn persist(&self, snapshot: &Snapshot) -> Result<()> {
        let state = StateFile {
            devices: &snapshot.devices,
            schedules: &snapshot.schedules,
        };
        let bytes = serde_json::to_vec_pretty(&state).map_err(StoreError::from)?;
        self.create_parent().await?;

        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        tokio::fs::write(&tmp, bytes).await.map_err(StoreError::from)?;
        tokio::fs::rename(&tmp, &self.path).await.map_err(StoreError::from)?;

        tracing::trace!(path = %self.path.display(), "State file written");
        Ok(())
    }

    async fn append_lines(&self, events: &[AuditEvent]) -> Result<()> {
        let mut buf = Vec::new();
        for event in events {
            serde_json::to_writer(&mut buf, event).map_err(StoreError::from)?;
            buf.push(b'\n');
        }
        self.create_parent().await?;

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.audit_path)
            .await
            .map_err(StoreError::from)?;
        file.write_all(&buf).await.map_err(StoreError::from)?;
        file.flush().await.map_err(StoreError::from)?;

        tracing::trace!(path = %self.audit_path.display(), entries = events.len(), "Audit log appended");
        Ok(())
    }
}

async fn read_audit_log(path: &Path) -> Result<Vec<AuditEvent>> {
    let text = match tokio::fs::read_to_string(path).await {
        Ok(text) => text,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(StoreError::from(e).into()),
    };

    let mut events = Vec::new();
    for (index, line) in text.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<AuditEvent>(line) {
            Ok(event) => events.push(event),
            Err(e) => tracing::warn!(
                path = %path.display(),
                line = index + 1,
                error = %e,
                "Skipping unreadable audit log line"
            ),
        }
    }
    Ok(events)
}

fn repair(snapshot: &mut Snapshot, now: DateTime<Utc>) {
    for device in &mut snapshot.devices {
        if device.repair(now) {
            tracing::warn!(
                device_id = %device.id(),
                feed = %device.feed_key(),
                state = %device.state(),
                "Repaired inconsistent device record"
            );
        }
    }
}

#[async_trait]
impl Repository for JsonFileRepository {
    async fn device(&self, id: DeviceId) -> Result<Option<Device>> {
        Ok(self.snapshot.lock().await.device(id))
    }

    async fn device_by_feed(&self, feed_key: &FeedKey) -> Result<Option<Device>> {
        Ok(self.snapshot.lock().await.device_by_feed(feed_key))
    }

    async fn devices(&self) -> Result<Vec<Device>> {
        Ok(self.snapshot.lock().await.devices.clone())
    }

    async fn insert_device(&self, device: Device) -> Result<()> {
        let mut snapshot = self.snapshot.lock().await;
        snapshot.insert_device(device)?;
        self.persist(&snapshot).await
    }

    async fn update_device(&self, device: &Device) -> Result<bool> {
        let mut snapshot = self.snapshot.lock().await;
        if !snapshot.update_device(device) {
            return Ok(false);
        }
        self.persist(&snapshot).await?;
        Ok(true)
    }

    async fn remove_device(&self, id: DeviceId) -> Result<bool> {
        let mut snapshot = self.snapshot.lock().await;
        if !snapshot.remove_device(id) {
            return Ok(false);
        }
        self.persist(&snapshot).await?;
        Ok(true)
    }

    async fn append_audit(&self, event: AuditEvent) -> Result<()> {
        let mut snapshot = self.snapshot.lock().await;
        self.append_lines(std::slice::from_ref(&event)).await?;
        snapshot.audit.push(event);
        Ok(())
    }

    async fn audit_history(&self, device_id: DeviceId, since: Option<DateTime<Utc>>) -> Result<Vec<AuditEvent>> {
        Ok(self.snapshot.lock().await.audit_history(device_id, since))
    }

    async fn recent_audit(&self, device_id: Option<DeviceId>, limit: Option<usize>) -> Result<Vec<AuditEvent>> {
        Ok(self.snapshot.lock().await.recent_audit(device_id, limit))
    }

    async fn schedules(&self) -> Result<Vec<Schedule>> {
        Ok(self.snapshot.lock().await.schedules.clone())
    }

    async fn save_schedule(&self, schedule: Schedule) -> Result<()> {
        let mut snapshot = self.snapshot.lock().await;
        snapshot.save_schedule(schedule);
        self.persist(&snapshot).await
    }

    async fn remove_schedule(&self, id: ScheduleId) -> Result<bool> {
        let mut snapshot = self.snapshot.lock().await;
        if !snapshot.remove_schedule(id) {
            return Ok(false);
        }
        self.persist(&snapshot).await?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Origin, PowerState};

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir()
            .join(format!("feedlink-{}", uuid::Uuid::new_v4()))
            .join(name)
    }

    #[tokio::test]
    async fn missing_file_opens_empty() {
        let repo = JsonFileRepository::open(temp_path("state.json")).await.unwrap();
        assert!(repo.devices().await.unwrap().is_empty());
        assert!(!repo.path().exists());
    }

    #[tokio::test]
    async fn mutations_survive_reopen() {
        let path = temp_path("state.json");
        let repo = JsonFileRepository::open(&path).await.unwrap();

        let mut lamp = Device::new(FeedKey::new("lamp").unwrap(), "Lamp");
        repo.insert_device(lamp.clone()).await.unwrap();
        lamp.apply_transition(PowerState::On, Utc::now());
        assert!(repo.update_device(&lamp).await.unwrap());
        repo.append_audit(AuditEvent::new(lamp.id(), PowerState::On, Origin::Manual, Utc::now(), "manual ON"))
            .await
            .unwrap();
        drop(repo);

        let reopened = JsonFileRepository::open(&path).await.unwrap();
        let loaded = reopened.device(lamp.id()).await.unwrap().unwrap();
        assert_eq!(loaded.state(), PowerState::On);
        assert_eq!(loaded.last_on_time(), lamp.last_on_time());
        assert_eq!(reopened.recent_audit(None, None).await.unwrap().len(), 1);

        let mut tmp = path.clone().into_os_string();
        tmp.push(".tmp");
        assert!(!PathBuf::from(tmp).exists());
    }

    #[tokio::test]
    async fn audit_is_appended_to_its_own_log() {
        let path = temp_path("state.json");
        let repo = JsonFileRepository::open(&path).await.unwrap();
        assert_eq!(repo.audit_path(), path.with_file_name("state.audit.jsonl"));

        let lamp = Device::new(FeedKey::new("lamp").unwrap(), "Lamp");
        repo.insert_device(lamp.clone()).await.unwrap();
        let state_before = tokio::fs::read(&path).await.unwrap();

        for state in [PowerState::On, PowerState::Off, PowerState::On] {
            repo.append_audit(AuditEvent::new(lamp.id(), state, Origin::Manual, Utc::now(), "manual"))
                .await
                .unwrap();
        }

        assert_eq!(tokio::fs::read(&path).await.unwrap(), state_before);
        let state: serde_json::Value = serde_json::from_slice(&state_before).unwrap();
        assert!(state.get("audit").is_none());

        let log = tokio::fs::read_to_string(repo.audit_path()).await.unwrap();
        assert_eq!(log.lines().count(), 3);
        drop(repo);

        let reopened = JsonFileRepository::open(&path).await.unwrap();
        let history = reopened.audit_history(lamp.id(), None).await.unwrap();
        let states: Vec<PowerState> = history.iter().map(|e| e.state).collect();
        assert_eq!(states, vec![PowerState::On, PowerState::Off, PowerState::On]);
    }

    #[tokio::test]
    async fn truncated_audit_line_is_skipped() {
        let path = temp_path("state.json");
        let repo = JsonFileRepository::open(&path).await.unwrap();
        let id = DeviceId::new();
        repo.append_audit(AuditEvent::new(id, PowerState::On, Origin::Feed, Utc::now(), "feed ON"))
            .await
            .unwrap();

        let mut log = tokio::fs::read_to_string(repo.audit_path()).await.unwrap();
        log.push_str("{\"id\":\"");
        tokio::fs::write(repo.audit_path(), log).await.unwrap();
        drop(repo);

        let reopened = JsonFileRepository::open(&path).await.unwrap();
        assert_eq!(reopened.recent_audit(Some(id), None).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn embedded_audit_moves_to_log() {
        let path = temp_path("state.json");
        tokio::fs::create_dir_all(path.parent().unwrap()).await.unwrap();
        let id = DeviceId::new();
        let entry = AuditEvent::new(id, PowerState::On, Origin::Scheduled, Utc::now(), "scheduled ON");
        let raw = serde_json::json!({
            "devices": [{ "id": id, "feedKey": "fan", "name": "Fan" }],
            "audit": [entry],
        });
        tokio::fs::write(&path, raw.to_string()).await.unwrap();

        let repo = JsonFileRepository::open(&path).await.unwrap();
        assert_eq!(repo.recent_audit(Some(id), None).await.unwrap().len(), 1);

        let state: serde_json::Value = serde_json::from_slice(&tokio::fs::read(&path).await.unwrap()).unwrap();
        assert!(state.get("audit").is_none());
        let log = tokio::fs::read_to_string(repo.audit_path()).await.unwrap();
        assert_eq!(log.lines().count(), 1);
        drop(repo);

        let reopened = JsonFileRepository::open(&path).await.unwrap();
        assert_eq!(reopened.recent_audit(Some(id), None).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn inconsistent_record_is_repaired_on_open() {
        let path = temp_path("state.json");
        tokio::fs::create_dir_all(path.parent().unwrap()).await.unwrap();
        let id = DeviceId::new();
        let raw = serde_json::json!({
            "devices": [{ "id": id, "feedKey": "fan", "name": "Fan", "state": "ON" }]
        });
        tokio::fs::write(&path, raw.to_string()).await.unwrap();

        let repo = JsonFileRepository::open(&path).await.unwrap();
        let fan = repo.device(id).await.unwrap().unwrap();
        assert!(fan.is_consistent());
    }

    #[tokio::test]
    async fn corrupt_file_is_serialization_error() {
        let path = temp_path("state.json");
        tokio::fs::create_dir_all(path.parent().unwrap()).await.unwrap();
        tokio::fs::write(&path, "{not json").await.unwrap();

        let err = JsonFileRepository::open(&path).await.unwrap_err();
        assert!(matches!(err, crate::Error::Store(StoreError::Serialization(_))));
    }
}
