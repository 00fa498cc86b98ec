// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! REST access to feed values.

use std::time::Duration;

use reqwest::Client;
use serde::Deserialize;

use crate::config::{DEFAULT_REST_BASE_URL, FeedConnection};
use crate::error::{ParseError, TransportError};
use crate::types::FeedKey;

/// Header carrying the account key.
const KEY_HEADER: &str = "X-AIO-Key";

/// One stored feed value.
#[derive(Debug, Deserialize)]
struct DataPoint {
    value: serde_json::Value,
}

impl DataPoint {
    fn into_payload(self) -> String {
        match self.value {
            serde_json::Value::String(s) => s,
            other => other.to_string(),
        }
    }
}

/// Reads the latest stored value of a feed over HTTP.
///
/// The broker only delivers values published while connected; this client
/// fills the gap after startup or a long disconnection.
///
/// # Examples
///
/// ```no_run
/// use feedlink::protocol::FeedRestClient;
/// use feedlink::types::FeedKey;
///
/// # async fn example() -> feedlink::Result<()> {
/// let client = FeedRestClient::new("https://io.adafruit.com/api/v2", "alice", "aio_key")?;
/// let value = client.latest_value(&FeedKey::new("porch-light")?).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct FeedRestClient {
    base_url: String,
    username: String,
    key: String,
    client: Client,
}

impl FeedRestClient {
    /// Default request timeout.
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

    /// Creates a client for an account.
    ///
    /// # Errors
    ///
    /// Returns `TransportError::InvalidAddress` if the base URL is not
    /// http(s), or `TransportError::Http` if the client cannot be created.
    pub fn new(
        base_url: impl Into<String>,
        username: impl Into<String>,
        key: impl Into<String>,
    ) -> Result<Self, TransportError> {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
            return Err(TransportError::InvalidAddress(base_url));
        }

        let client = Client::builder().timeout(Self::DEFAULT_TIMEOUT).build()?;

        Ok(Self {
            base_url,
            username: username.into(),
            key: key.into(),
            client,
        })
    }

    /// Creates a client from feed connection settings.
    ///
    /// # Errors
    ///
    /// See [`FeedRestClient::new`].
    pub fn from_connection(base_url: Option<&str>, connection: &FeedConnection) -> Result<Self, TransportError> {
        Self::new(
            base_url.unwrap_or(DEFAULT_REST_BASE_URL),
            connection.username.clone(),
            connection.key.clone(),
        )
    }

    /// Returns the API base URL.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn data_url(&self, feed_key: &FeedKey) -> String {
        format!(
            "{}/{}/feeds/{}/data?limit=1",
            self.base_url,
            urlencoding::encode(&self.username),
            urlencoding::encode(feed_key.as_str())
        )
    }

    /// Returns the most recent value stored on a feed, if any.
    ///
    /// # Errors
    ///
    /// Returns a transport error on request failure or a non-success status,
    /// and `ParseError::Json` if the body is not a list of data points.
    pub async fn latest_value(&self, feed_key: &FeedKey) -> crate::Result<Option<String>> {
        let url = self.data_url(feed_key);
        tracing::debug!(feed = %feed_key, "Fetching latest feed value");

        let response = self
            .client
            .get(&url)
            .header(KEY_HEADER, &self.key)
            .send()
            .await
            .map_err(TransportError::from)?;

        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::UnexpectedStatus(status.as_u16()).into());
        }

        let body = response.text().await.map_err(TransportError::from)?;
        let points: Vec<DataPoint> = serde_json::from_str(&body).map_err(ParseError::from)?;

        Ok(points.into_iter().next().map(DataPoint::into_payload))
    }
}

// Keep the account key out of logs
impl std::fmt::Debug for FeedRestClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeedRestClient")
            .field("base_url", &self.base_url)
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_url_layout() {
        let client = FeedRestClient::new("https://io.adafruit.com/api/v2/", "alice", "k").unwrap();
        let url = client.data_url(&FeedKey::new("porch-light").unwrap());
        assert_eq!(url, "https://io.adafruit.com/api/v2/alice/feeds/porch-light/data?limit=1");
    }

    #[test]
    fn rejects_non_http_base() {
        assert!(matches!(
            FeedRestClient::new("io.adafruit.com", "alice", "k"),
            Err(TransportError::InvalidAddress(_))
        ));
    }

    #[test]
    fn debug_hides_key() {
        let client = FeedRestClient::new("http://localhost", "alice", "very-secret").unwrap();
        assert!(!format!("{client:?}").contains("very-secret"));
    }
}
