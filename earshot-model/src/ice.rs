//! Relay (STUN/TURN) server entries handed to the media transport.

use serde::{Deserialize, Serialize};

/// A relay server usable by the media transport for NAT traversal.
///
/// Entries arrive from configuration and from third-party credential
/// endpoints; anything not matching this shape is filtered out wherever the
/// list appears. Use [`is_valid`] before trusting an entry.
///
/// [`is_valid`]: Self::is_valid
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IceServer {
    pub urls: IceUrls,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
}

impl IceServer {
    /// Create an entry with a single URL and no credentials.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            urls: IceUrls::One(url.into()),
            username: None,
            credential: None,
        }
    }

    /// Whether the entry carries at least one non-empty URL.
    pub fn is_valid(&self) -> bool {
        match &self.urls {
            IceUrls::One(url) => !url.is_empty(),
            IceUrls::Many(urls) => !urls.is_empty() && urls.iter().all(|url| !url.is_empty()),
        }
    }
}

/// One URL or several; both shapes appear in the wild.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(untagged)]
pub enum IceUrls {
    One(String),
    Many(Vec<String>),
}
