// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Expiring per-device leases used to recognize feed echoes.
//!
//! Publishing a value to a device feed causes the broker to deliver the same
//! value back to every subscriber, including this process. A lease marks a
//! device as "recently commanded from here" for a short TTL; inbound messages
//! for a leased device are treated as echoes and dropped.
//!
//! Leases expire by time only. Expiry is evaluated lazily against
//! [`tokio::time::Instant`], so no timer task exists per lease and paused-clock
//! tests can step through expiry with `tokio::time::advance`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;

use crate::types::DeviceId;

/// Default lease duration.
pub const DEFAULT_ECHO_TTL: Duration = Duration::from_secs(3);

/// Registry of active device leases.
///
/// Cloning is cheap and clones share the registry.
///
/// # Examples
///
/// ```
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// use std::time::Duration;
/// use feedlink::guard::EchoGuard;
/// use feedlink::types::DeviceId;
///
/// let guard = EchoGuard::new(Duration::from_secs(3));
/// let id = DeviceId::new();
///
/// assert!(!guard.is_leased(id));
/// guard.lease(id);
/// assert!(guard.is_leased(id));
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct EchoGuard {
    inner: Arc<GuardInner>,
}

#[derive(Debug)]
struct GuardInner {
    ttl: Duration,
    leases: Mutex<HashMap<DeviceId, Instant>>,
}

impl EchoGuard {
    /// Creates a guard whose leases last `ttl`.
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            inner: Arc::new(GuardInner {
                ttl,
                leases: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Returns the lease duration.
    #[must_use]
    pub fn ttl(&self) -> Duration {
        self.inner.ttl
    }

    /// Leases a device for one TTL from now.
    ///
    /// An existing lease is replaced, so the most recent command decides when
    /// the device stops being guarded.
    pub fn lease(&self, device_id: DeviceId) {
        let expires_at = Instant::now() + self.inner.ttl;
        self.inner.leases.lock().insert(device_id, expires_at);
        tracing::trace!(%device_id, ttl_ms = self.inner.ttl.as_millis(), "Device leased");
    }

    /// Returns `true` if the device holds an unexpired lease.
    pub fn is_leased(&self, device_id: DeviceId) -> bool {
        self.remaining(device_id).is_some()
    }

    /// Returns the time left on a device lease, if one is active.
    ///
    /// An expired lease found here is removed.
    pub fn remaining(&self, device_id: DeviceId) -> Option<Duration> {
        let now = Instant::now();
        let mut leases = self.inner.leases.lock();
        match leases.get(&device_id) {
            Some(&expires_at) if expires_at > now => Some(expires_at - now),
            Some(_) => {
                leases.remove(&device_id);
                None
            }
            None => None,
        }
    }

    /// Returns the number of unexpired leases.
    pub fn active_count(&self) -> usize {
        let now = Instant::now();
        self.inner
            .leases
            .lock()
            .values()
            .filter(|&&expires_at| expires_at > now)
            .count()
    }

    /// Drops every expired lease and returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut leases = self.inner.leases.lock();
        let before = leases.len();
        leases.retain(|_, expires_at| *expires_at > now);
        before - leases.len()
    }
}

impl Default for EchoGuard {
    fn default() -> Self {
        Self::new(DEFAULT_ECHO_TTL)
    }
}
