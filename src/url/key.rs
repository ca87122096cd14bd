//! Cache keys for logical requests

use crate::url::normalize_url;
use crate::UrlError;
use sha2::{Digest, Sha256};
use std::fmt;

/// Unique identifier of a logical request in the cache
///
/// A key is the normalized URL, optionally followed by `" POST "` and the
/// hex SHA-256 of the request body so that different form submissions to
/// the same URL are cached separately.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(String);

impl CacheKey {
    /// Builds the key for a URL and optional POST body
    pub fn new(url: &str, post_data: Option<&[u8]>) -> Result<Self, UrlError> {
        let normalized = normalize_url(url)?;
        Ok(Self::from_normalized(normalized.as_str(), post_data))
    }

    /// Builds the key for a URL that is already normalized
    pub fn from_normalized(url: &str, post_data: Option<&[u8]>) -> Self {
        match post_data {
            Some(data) => {
                let digest = Sha256::digest(data);
                Self(format!("{} POST {}", url, hex::encode(digest)))
            }
            None => Self(url.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
