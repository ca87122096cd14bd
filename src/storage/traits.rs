//! Storage traits and error types
//!
//! This module defines the cache store interface shared by the fetcher and
//! the associated error types.

use crate::storage::CacheRecord;
use crate::url::CacheKey;
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Run not found: {0}")]
    RunNotFound(i64),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Durable key-value store of fetched responses
///
/// Implementations must be safe to share between workers. `put` replaces
/// the whole record atomically so readers never see a partial write. A
/// record that cannot be read back intact is reported as absent by `get`
/// rather than as an error; errors mean the store itself is unusable.
pub trait CacheStore: Send + Sync {
    /// Returns the record stored under `key`, if present and intact
    fn get(&self, key: &CacheKey) -> StorageResult<Option<CacheRecord>>;

    /// Stores `record` under its key, replacing any previous record
    fn put(&self, record: &CacheRecord) -> StorageResult<()>;

    /// Returns true if a row exists for `key` (without verifying it)
    fn has(&self, key: &CacheKey) -> StorageResult<bool>;

    /// Removes the record for `key`, returning whether one existed
    fn remove(&self, key: &CacheKey) -> StorageResult<bool>;

    /// Number of stored records
    fn len(&self) -> StorageResult<u64>;

    fn is_empty(&self) -> StorageResult<bool> {
        Ok(self.len()? == 0)
    }
}
