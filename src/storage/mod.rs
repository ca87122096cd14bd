//! Storage module for persisting crawl data
//!
//! This module handles all database operations for the crawler, including:
//! - The durable response cache (read-through / write-back for the fetcher)
//! - Crawl run tracking
//! - The journal of permanently failed URLs

mod schema;
mod sqlite;
mod traits;

pub use sqlite::SqliteStorage;
pub use traits::{CacheStore, StorageError, StorageResult};

use crate::url::CacheKey;
use chrono::{DateTime, Utc};
use std::path::Path;

/// Opens (creating if needed) the storage database at `path`
///
/// Missing parent directories are created first.
pub fn open_storage(path: &Path) -> StorageResult<SqliteStorage> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    SqliteStorage::new(path)
}

/// A cached HTTP response
///
/// Records are immutable; a re-fetch replaces the record for the key.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheRecord {
    pub key: CacheKey,
    /// URL the response was served from, after redirects
    pub url: String,
    pub status: u16,
    pub headers: Vec<(String, String)>,
    /// Raw body bytes after transport decompression
    pub body: Vec<u8>,
    pub fetched_at: DateTime<Utc>,
}

impl CacheRecord {
    /// Case-insensitive lookup of a response header
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Represents a crawl run
#[derive(Debug, Clone)]
pub struct RunRecord {
    pub id: i64,
    pub started_at: String,
    pub finished_at: Option<String>,
    pub config_hash: String,
    pub status: RunStatus,
    pub fetched: u64,
    pub cache_hits: u64,
    pub processed: u64,
    pub failed: u64,
}

/// A URL that could not be processed during a run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureRecord {
    pub url: String,
    pub depth: u32,
    pub reason: String,
    pub attempts: u32,
}

/// Status of a crawl run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Running,
    Completed,
    Stopped,
    Failed,
}

impl RunStatus {
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Stopped => "stopped",
            Self::Failed => "failed",
        }
    }

    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "stopped" => Some(Self::Stopped),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}
