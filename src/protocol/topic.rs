// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Feed topic layout.

use crate::types::FeedKey;

/// Maps feed keys to broker topics for one account.
///
/// Topics follow the `{owner}/feeds/{key}` layout. The short form
/// `{owner}/f/{key}` is also recognized on inbound messages.
///
/// # Examples
///
/// ```
/// use feedlink::protocol::FeedTopic;
/// use feedlink::types::FeedKey;
///
/// let topics = FeedTopic::new("alice");
/// let key = FeedKey::new("porch-light").unwrap();
///
/// assert_eq!(topics.topic(&key), "alice/feeds/porch-light");
/// assert_eq!(topics.parse("alice/f/porch-light"), Some(key));
/// assert_eq!(topics.parse("bob/feeds/porch-light"), None);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedTopic {
    owner: String,
}

impl FeedTopic {
    /// Creates the topic layout for an account.
    #[must_use]
    pub fn new(owner: impl Into<String>) -> Self {
        Self { owner: owner.into() }
    }

    /// Returns the account name.
    #[must_use]
    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// Returns the topic carrying a feed.
    #[must_use]
    pub fn topic(&self, feed_key: &FeedKey) -> String {
        format!("{}/feeds/{}", self.owner, feed_key)
    }

    /// Extracts the feed key from an inbound topic of this account.
    #[must_use]
    pub fn parse(&self, topic: &str) -> Option<FeedKey> {
        let rest = topic.strip_prefix(self.owner.as_str())?.strip_prefix('/')?;
        let key = rest
            .strip_prefix("feeds/")
            .or_else(|| rest.strip_prefix("f/"))?;
        FeedKey::new(key).ok()
    }
}
