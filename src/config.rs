// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Runtime configuration.
//!
//! [`SyncConfig`] gathers every tunable of the synchronization service. It
//! can be built in code, deserialized from JSON, or read from the
//! environment with [`SyncConfig::from_env`].

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, ParseError, ValueError};
use crate::event::DEFAULT_EVENT_CAPACITY;
use crate::guard::DEFAULT_ECHO_TTL;

/// Default feed service host.
pub const DEFAULT_FEED_HOST: &str = "io.adafruit.com";

/// Default feed service REST base URL.
pub const DEFAULT_REST_BASE_URL: &str = "https://io.adafruit.com/api/v2";

/// Default scheduler tick interval.
pub const DEFAULT_SCHEDULER_INTERVAL: Duration = Duration::from_secs(15);

// ============================================================================
// ReconnectionPolicy
// ============================================================================

/// How the MQTT feed retries after losing the broker.
///
/// Loaded from the `reconnection` object of the configuration file. The
/// wait before retry `n` is `initial_delay * backoff_multiplier^n`, capped
/// at `max_delay`.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use feedlink::config::ReconnectionPolicy;
///
/// let policy = ReconnectionPolicy {
///     max_retries: Some(5),
///     initial_delay: Duration::from_millis(500),
///     ..ReconnectionPolicy::default()
/// };
/// assert_eq!(policy.backoff(2), Duration::from_secs(2));
/// assert!(!policy.should_retry(5));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ReconnectionPolicy {
    /// Whether to reconnect at all.
    pub enabled: bool,
    /// Retries allowed before giving up; `None` retries forever.
    pub max_retries: Option<u32>,
    /// Wait before the first retry.
    #[serde(rename = "initialDelayMs", with = "duration_ms")]
    pub initial_delay: Duration,
    /// Upper bound on any wait.
    #[serde(rename = "maxDelayMs", with = "duration_ms")]
    pub max_delay: Duration,
    /// Growth factor between consecutive waits.
    pub backoff_multiplier: f64,
}

impl ReconnectionPolicy {
    /// A policy that never reconnects.
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    /// Wait before retry number `attempt`, counting from zero.
    #[must_use]
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let secs = self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(exponent);
        Duration::try_from_secs_f64(secs).map_or(self.max_delay, |delay| delay.min(self.max_delay))
    }

    /// Whether retry number `attempt` is allowed.
    #[must_use]
    pub fn should_retry(&self, attempt: u32) -> bool {
        self.enabled && self.max_retries.is_none_or(|max| attempt < max)
    }
}

impl Default for ReconnectionPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            max_retries: None,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            backoff_multiplier: 2.0,
        }
    }
}

// ============================================================================
// FeedConnection
// ============================================================================

/// Connection parameters for the feed service.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct FeedConnection {
    /// Broker host name.
    pub host: String,
    /// Broker port.
    pub port: u16,
    /// Account name; also the first topic segment.
    pub username: String,
    /// Account key, used as the MQTT password and REST API key.
    pub key: String,
    /// Whether to connect over TLS.
    pub use_tls: bool,
    /// MQTT keep-alive interval.
    #[serde(rename = "keepAliveMs", with = "duration_ms")]
    pub keep_alive: Duration,
}

impl FeedConnection {
    /// Plain MQTT port.
    pub const DEFAULT_PORT: u16 = 1883;
    /// MQTT over TLS port.
    pub const DEFAULT_TLS_PORT: u16 = 8883;

    /// Creates connection parameters for the default host over TLS.
    #[must_use]
    pub fn new(username: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            key: key.into(),
            ..Self::default()
        }
    }

    /// Checks that credentials are present.
    ///
    /// # Errors
    ///
    /// Returns `ValueError::MissingField` naming the empty field.
    pub fn validate(&self) -> Result<(), ValueError> {
        if self.host.is_empty() {
            return Err(ValueError::MissingField("host"));
        }
        if self.username.is_empty() {
            return Err(ValueError::MissingField("username"));
        }
        if self.key.is_empty() {
            return Err(ValueError::MissingField("key"));
        }
        Ok(())
    }
}

impl Default for FeedConnection {
    fn default() -> Self {
        Self {
            host: DEFAULT_FEED_HOST.to_string(),
            port: Self::DEFAULT_TLS_PORT,
            username: String::new(),
            key: String::new(),
            use_tls: true,
            keep_alive: Duration::from_secs(30),
        }
    }
}

// Keep the account key out of logs
impl std::fmt::Debug for FeedConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeedConnection")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("key", &"<redacted>")
            .field("use_tls", &self.use_tls)
            .field("keep_alive", &self.keep_alive)
            .finish()
    }
}

// ============================================================================
// SyncConfig
// ============================================================================

/// Configuration of the synchronization service.
///
/// # Examples
///
/// ```
/// use feedlink::config::SyncConfig;
///
/// let config = SyncConfig::from_json_str(r#"{
///     "feed": { "username": "alice", "key": "aio_xxx" },
///     "echoTtlMs": 5000
/// }"#).unwrap();
///
/// assert_eq!(config.feed.username, "alice");
/// assert_eq!(config.echo_ttl.as_secs(), 5);
/// assert_eq!(config.scheduler_interval.as_secs(), 15);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SyncConfig {
    /// Feed service connection.
    pub feed: FeedConnection,
    /// Reconnection policy for the feed transport.
    pub reconnection: ReconnectionPolicy,
    /// How long a published value is treated as an echo when it comes back.
    #[serde(rename = "echoTtlMs", with = "duration_ms")]
    pub echo_ttl: Duration,
    /// Scheduler tick interval.
    #[serde(rename = "schedulerIntervalMs", with = "duration_ms")]
    pub scheduler_interval: Duration,
    /// Event bus capacity.
    pub event_capacity: usize,
    /// Inbound message queue capacity between transport and bridge.
    pub inbound_capacity: usize,
    /// Endpoint receiving state changes, if any.
    pub webhook_url: Option<String>,
    /// Path of the JSON state file.
    pub store_path: PathBuf,
    /// Feed service REST API base URL.
    pub rest_base_url: String,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            feed: FeedConnection::default(),
            reconnection: ReconnectionPolicy::default(),
            echo_ttl: DEFAULT_ECHO_TTL,
            scheduler_interval: DEFAULT_SCHEDULER_INTERVAL,
            event_capacity: DEFAULT_EVENT_CAPACITY,
            inbound_capacity: 64,
            webhook_url: None,
            store_path: PathBuf::from("feedlink.json"),
            rest_base_url: DEFAULT_REST_BASE_URL.to_string(),
        }
    }
}

impl SyncConfig {
    /// Parses a JSON document. Missing fields take their defaults.
    ///
    /// # Errors
    ///
    /// Returns `ParseError::Json` if the document is malformed.
    pub fn from_json_str(json: &str) -> Result<Self, ParseError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Loads a JSON configuration file.
    ///
    /// # Errors
    ///
    /// Returns a store error if the file cannot be read and a parse error if
    /// it is malformed.
    pub async fn load(path: impl AsRef<Path>) -> crate::Result<Self> {
        let raw = tokio::fs::read_to_string(path.as_ref())
            .await
            .map_err(crate::error::StoreError::from)?;
        Ok(Self::from_json_str(&raw)?)
    }

    /// Reads the configuration from process environment variables.
    ///
    /// | Variable | Field |
    /// |---|---|
    /// | `FEEDLINK_USERNAME` or `AIO_USERNAME` | `feed.username` (required) |
    /// | `FEEDLINK_KEY` or `AIO_KEY` | `feed.key` (required) |
    /// | `FEEDLINK_HOST` | `feed.host` |
    /// | `FEEDLINK_PORT` | `feed.port` |
    /// | `FEEDLINK_TLS` | `feed.use_tls` |
    /// | `FEEDLINK_ECHO_TTL_MS` | `echo_ttl` |
    /// | `FEEDLINK_SCHEDULER_INTERVAL_SECS` | `scheduler_interval` |
    /// | `FEEDLINK_EVENT_CAPACITY` | `event_capacity` |
    /// | `FEEDLINK_WEBHOOK_URL` | `webhook_url` |
    /// | `FEEDLINK_STORE_PATH` | `store_path` |
    /// | `FEEDLINK_REST_URL` | `rest_base_url` |
    ///
    /// # Errors
    ///
    /// Returns `ValueError::MissingField` if credentials are absent and a
    /// parse error for malformed numeric or boolean values.
    pub fn from_env() -> crate::Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds the configuration from an arbitrary variable lookup.
    ///
    /// # Errors
    ///
    /// See [`SyncConfig::from_env`].
    pub fn from_lookup<F>(lookup: F) -> crate::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |names: &[&str]| {
            names
                .iter()
                .find_map(|name| lookup(name).filter(|v| !v.trim().is_empty()))
        };

        let mut config = Self::default();

        config.feed.username =
            var(&["FEEDLINK_USERNAME", "AIO_USERNAME"]).ok_or(ValueError::MissingField("AIO_USERNAME"))?;
        config.feed.key = var(&["FEEDLINK_KEY", "AIO_KEY"]).ok_or(ValueError::MissingField("AIO_KEY"))?;

        if let Some(host) = var(&["FEEDLINK_HOST"]) {
            config.feed.host = host;
        }
        if let Some(tls) = var(&["FEEDLINK_TLS"]) {
            config.feed.use_tls = parse_bool("FEEDLINK_TLS", &tls)?;
            if !config.feed.use_tls {
                config.feed.port = FeedConnection::DEFAULT_PORT;
            }
        }
        if let Some(port) = var(&["FEEDLINK_PORT"]) {
            config.feed.port = parse_number("FEEDLINK_PORT", &port)?;
        }
        if let Some(ttl) = var(&["FEEDLINK_ECHO_TTL_MS"]) {
            config.echo_ttl = Duration::from_millis(parse_number("FEEDLINK_ECHO_TTL_MS", &ttl)?);
        }
        if let Some(secs) = var(&["FEEDLINK_SCHEDULER_INTERVAL_SECS"]) {
            config.scheduler_interval =
                Duration::from_secs(parse_number("FEEDLINK_SCHEDULER_INTERVAL_SECS", &secs)?);
        }
        if let Some(capacity) = var(&["FEEDLINK_EVENT_CAPACITY"]) {
            config.event_capacity = parse_number("FEEDLINK_EVENT_CAPACITY", &capacity)?;
        }
        config.webhook_url = var(&["FEEDLINK_WEBHOOK_URL"]);
        if let Some(path) = var(&["FEEDLINK_STORE_PATH"]) {
            config.store_path = PathBuf::from(path);
        }
        if let Some(url) = var(&["FEEDLINK_REST_URL"]) {
            config.rest_base_url = url;
        }

        Ok(config)
    }
}

fn parse_number<T: std::str::FromStr>(name: &str, value: &str) -> Result<T, Error> {
    value
        .trim()
        .parse()
        .map_err(|_| ParseError::UnexpectedFormat(format!("{name}={value}")).into())
}

fn parse_bool(name: &str, value: &str) -> Result<bool, Error> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ParseError::UnexpectedFormat(format!("{name}={value}")).into()),
    }
}

/// Serializes a [`Duration`] as whole milliseconds.
mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn reconnection_policy_default_retries_forever() {
        let policy = ReconnectionPolicy::default();
        assert!(policy.enabled);
        assert_eq!(policy.max_retries, None);
        assert!(policy.should_retry(u32::MAX));
    }

    #[test]
    fn reconnection_policy_disabled() {
        assert!(!ReconnectionPolicy::disabled().should_retry(0));
    }

    #[test]
    fn backoff_doubles_up_to_the_cap() {
        let policy = ReconnectionPolicy {
            max_delay: Duration::from_secs(10),
            ..ReconnectionPolicy::default()
        };

        let waits: Vec<u64> = (0..6).map(|n| policy.backoff(n).as_secs()).collect();
        assert_eq!(waits, vec![1, 2, 4, 8, 10, 10]);
        assert_eq!(policy.backoff(u32::MAX), Duration::from_secs(10));
    }

    #[test]
    fn backoff_with_unusable_multiplier_waits_the_cap() {
        let policy = ReconnectionPolicy {
            backoff_multiplier: -2.0,
            ..ReconnectionPolicy::default()
        };
        assert_eq!(policy.backoff(1), policy.max_delay);
    }

    #[test]
    fn retries_stop_at_the_limit() {
        let policy = ReconnectionPolicy {
            max_retries: Some(3),
            ..ReconnectionPolicy::default()
        };
        assert!(policy.should_retry(2));
        assert!(!policy.should_retry(3));
    }

    #[test]
    fn json_defaults_fill_missing_fields() {
        let config = SyncConfig::from_json_str("{}").unwrap();
        assert_eq!(config, SyncConfig::default());
        assert_eq!(config.echo_ttl, Duration::from_secs(3));
        assert_eq!(config.event_capacity, 256);
        assert_eq!(config.feed.port, 8883);
    }

    #[test]
    fn json_reconnection_fields() {
        let config = SyncConfig::from_json_str(
            r#"{"reconnection": {"maxRetries": 4, "initialDelayMs": 250}}"#,
        )
        .unwrap();
        assert_eq!(config.reconnection.max_retries, Some(4));
        assert_eq!(config.reconnection.initial_delay, Duration::from_millis(250));
        assert_eq!(config.reconnection.max_delay, Duration::from_secs(60));
    }

    #[test]
    fn json_malformed_is_parse_error() {
        assert!(matches!(
            SyncConfig::from_json_str("{"),
            Err(ParseError::Json(_))
        ));
    }

    #[test]
    fn env_requires_credentials() {
        let err = SyncConfig::from_lookup(lookup(&[("AIO_USERNAME", "alice")])).unwrap_err();
        assert!(matches!(err, Error::Value(ValueError::MissingField("AIO_KEY"))));
    }

    #[test]
    fn env_reads_adafruit_names_and_overrides() {
        let config = SyncConfig::from_lookup(lookup(&[
            ("AIO_USERNAME", "alice"),
            ("AIO_KEY", "secret"),
            ("FEEDLINK_TLS", "false"),
            ("FEEDLINK_ECHO_TTL_MS", "1500"),
            ("FEEDLINK_WEBHOOK_URL", "http://localhost:5000/device_update"),
        ]))
        .unwrap();

        assert_eq!(config.feed.username, "alice");
        assert_eq!(config.feed.key, "secret");
        assert!(!config.feed.use_tls);
        assert_eq!(config.feed.port, 1883);
        assert_eq!(config.echo_ttl, Duration::from_millis(1500));
        assert_eq!(
            config.webhook_url.as_deref(),
            Some("http://localhost:5000/device_update")
        );
    }

    #[test]
    fn env_prefers_feedlink_names() {
        let config = SyncConfig::from_lookup(lookup(&[
            ("FEEDLINK_USERNAME", "bob"),
            ("AIO_USERNAME", "alice"),
            ("AIO_KEY", "k"),
        ]))
        .unwrap();
        assert_eq!(config.feed.username, "bob");
    }

    #[test]
    fn env_rejects_bad_number() {
        let err = SyncConfig::from_lookup(lookup(&[
            ("AIO_USERNAME", "alice"),
            ("AIO_KEY", "k"),
            ("FEEDLINK_PORT", "eighty"),
        ]))
        .unwrap_err();
        assert!(matches!(err, Error::Parse(ParseError::UnexpectedFormat(_))));
    }

    #[test]
    fn debug_redacts_key() {
        let conn = FeedConnection::new("alice", "super-secret");
        let debug = format!("{conn:?}");
        assert!(!debug.contains("super-secret"));
        assert!(conn.validate().is_ok());
        assert!(FeedConnection::default().validate().is_err());
    }
}
