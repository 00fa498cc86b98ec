// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Error types for the `feedlink` library.
//!
//! The hierarchy separates failures the caller can act on synchronously
//! (unknown devices, invalid command fields) from failures that only occur
//! on the background path (feed transport, persistence) and are therefore
//! logged rather than returned to the original requester.

use thiserror::Error;

use crate::types::{DeviceId, ScheduleId};

/// The main error type for this library.
#[derive(Debug, Error)]
pub enum Error {
    /// A command or record failed validation.
    #[error("validation error: {0}")]
    Value(#[from] ValueError),

    /// The pub/sub feed transport failed.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// The persistent store failed.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// A payload could not be parsed.
    #[error("parse error: {0}")]
    Parse(#[from] ParseError),

    /// No device exists with the given identifier.
    #[error("device {0} not found")]
    DeviceNotFound(DeviceId),

    /// No device is bound to the given feed key.
    #[error("no device bound to feed '{0}'")]
    FeedNotFound(String),

    /// No schedule exists with the given identifier.
    #[error("schedule {0} not found")]
    ScheduleNotFound(ScheduleId),
}

impl Error {
    /// Returns `true` if this error reports a missing device, feed or schedule.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::DeviceNotFound(_) | Self::FeedNotFound(_) | Self::ScheduleNotFound(_)
        )
    }

    /// Returns `true` if the error was caused by the caller's input.
    ///
    /// Client errors are surfaced synchronously by the command path; every
    /// other error can only happen once the request has been acknowledged.
    #[must_use]
    pub fn is_client_error(&self) -> bool {
        self.is_not_found() || matches!(self, Self::Value(_))
    }
}

/// Errors related to value validation and constraints.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValueError {
    /// A required command field was not provided.
    #[error("missing required field: {0}")]
    MissingField(&'static str),

    /// An invalid power state string was provided.
    #[error("invalid power state: {0}")]
    InvalidPowerState(String),

    /// A brightness value is outside the valid range (0-100).
    #[error("brightness value {0} is out of range [0, 100]")]
    InvalidBrightness(u16),

    /// A time of day is not a valid 24-hour `HH:MM` string.
    #[error("invalid time of day: '{0}' (expected HH:MM)")]
    InvalidTimeOfDay(String),

    /// A feed key is empty or contains characters not allowed in a topic.
    #[error("invalid feed key: '{0}'")]
    InvalidFeedKey(String),

    /// A command was issued with an origin that only the feed may use.
    #[error("origin '{0}' cannot issue commands")]
    InvalidOrigin(String),

    /// An analytics filter name was not recognized.
    #[error("unknown power filter: '{0}'")]
    InvalidFilter(String),
}

/// Errors related to the pub/sub feed transport.
#[derive(Debug, Error)]
pub enum TransportError {
    /// HTTP request to the feed service failed.
    #[cfg(feature = "http")]
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// MQTT client request failed.
    #[cfg(feature = "mqtt")]
    #[error("MQTT error: {0}")]
    Mqtt(#[from] rumqttc::ClientError),

    /// Connection to the broker failed.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// Invalid URL or address.
    #[error("invalid address: {0}")]
    InvalidAddress(String),

    /// The feed service answered with a non-success status.
    #[error("unexpected HTTP status {0}")]
    UnexpectedStatus(u16),

    /// Internal channel was closed.
    #[error("channel closed: {0}")]
    ChannelClosed(String),
}

/// Errors raised by a [`Repository`](crate::store::Repository) backend.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Reading or writing the backing file failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The stored snapshot could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A record with the same key already exists.
    #[error("duplicate record: {0}")]
    Duplicate(String),
}

/// Errors related to parsing payloads from the feed service.
#[derive(Debug, Error)]
pub enum ParseError {
    /// JSON parsing failed.
    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    /// Unexpected payload format.
    #[error("unexpected payload format: {0}")]
    UnexpectedFormat(String),
}

/// A specialized Result type for this library.
pub type Result<T> = std::result::Result<T, Error>;
