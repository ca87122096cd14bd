//! SQLite storage implementation
//!
//! This module provides the SQLite-backed cache store and run journal.

use crate::storage::schema::initialize_schema;
use crate::storage::traits::{CacheStore, StorageError, StorageResult};
use crate::storage::{CacheRecord, FailureRecord, RunRecord, RunStatus};
use crate::url::CacheKey;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use sha2::{Digest, Sha256};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

/// SQLite storage backend
///
/// The connection sits behind a mutex so one storage handle can be shared by
/// every worker; each statement runs to completion while the lock is held.
pub struct SqliteStorage {
    conn: Mutex<Connection>,
}

impl SqliteStorage {
    /// Creates a new SqliteStorage instance
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the SQLite database file
    ///
    /// # Returns
    ///
    /// * `Ok(SqliteStorage)` - Successfully opened/created database
    /// * `Err(StorageError)` - Failed to open database
    pub fn new(path: &Path) -> StorageResult<Self> {
        let conn = Connection::open(path)?;

        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA foreign_keys = ON;
            PRAGMA temp_store = MEMORY;
        ",
        )?;

        initialize_schema(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Creates an in-memory database (contents are lost on drop)
    pub fn new_in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> StorageResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| StorageError::Database("connection lock poisoned".to_string()))
    }

    // ===== Run Management =====

    /// Starts a new crawl run and returns its ID
    pub fn create_run(&self, config_hash: &str) -> StorageResult<i64> {
        let conn = self.conn()?;
        let now = Utc::now().to_rfc3339();
        conn.execute(
            "INSERT INTO runs (started_at, config_hash, status) VALUES (?1, ?2, ?3)",
            params![now, config_hash, RunStatus::Running.to_db_string()],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Marks a run as finished and stores its counters
    pub fn finish_run(
        &self,
        run_id: i64,
        status: RunStatus,
        fetched: u64,
        cache_hits: u64,
        processed: u64,
        failed: u64,
    ) -> StorageResult<()> {
        let conn = self.conn()?;
        let now = Utc::now().to_rfc3339();
        let updated = conn.execute(
            "UPDATE runs SET status = ?1, finished_at = ?2, fetched = ?3, cache_hits = ?4,
             processed = ?5, failed = ?6 WHERE id = ?7",
            params![
                status.to_db_string(),
                now,
                fetched as i64,
                cache_hits as i64,
                processed as i64,
                failed as i64,
                run_id
            ],
        )?;

        if updated == 0 {
            return Err(StorageError::RunNotFound(run_id));
        }
        Ok(())
    }

    /// Gets a run by ID
    pub fn get_run(&self, run_id: i64) -> StorageResult<RunRecord> {
        let conn = self.conn()?;
        conn.query_row(
            "SELECT id, started_at, finished_at, config_hash, status, fetched, cache_hits,
             processed, failed FROM runs WHERE id = ?1",
            params![run_id],
            run_from_row,
        )
        .optional()?
        .ok_or(StorageError::RunNotFound(run_id))
    }

    /// Gets the most recent runs, newest first
    pub fn recent_runs(&self, limit: usize) -> StorageResult<Vec<RunRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, started_at, finished_at, config_hash, status, fetched, cache_hits,
             processed, failed FROM runs ORDER BY id DESC LIMIT ?1",
        )?;
        let runs = stmt
            .query_map(params![limit as i64], run_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(runs)
    }

    // ===== Failure Journal =====

    /// Records a permanently failed URL for a run
    pub fn record_failure(&self, run_id: i64, failure: &FailureRecord) -> StorageResult<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO failures (run_id, url, depth, reason, attempts, recorded_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                run_id,
                failure.url,
                failure.depth,
                failure.reason,
                failure.attempts,
                Utc::now().to_rfc3339()
            ],
        )?;
        Ok(())
    }

    /// Gets every failure recorded for a run, in the order they happened
    pub fn get_failures(&self, run_id: i64) -> StorageResult<Vec<FailureRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT url, depth, reason, attempts FROM failures WHERE run_id = ?1 ORDER BY id",
        )?;
        let failures = stmt
            .query_map(params![run_id], |row| {
                Ok(FailureRecord {
                    url: row.get(0)?,
                    depth: row.get(1)?,
                    reason: row.get(2)?,
                    attempts: row.get(3)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(failures)
    }

    // ===== Statistics =====

    /// Counts cached records grouped by HTTP status, most common first
    pub fn count_by_status(&self) -> StorageResult<Vec<(u16, u64)>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT status, COUNT(*) FROM cache_entries GROUP BY status ORDER BY COUNT(*) DESC",
        )?;
        let counts = stmt
            .query_map([], |row| {
                Ok((row.get::<_, u16>(0)?, row.get::<_, i64>(1)? as u64))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(counts)
    }

    /// Total size of all cached bodies in bytes
    pub fn total_body_bytes(&self) -> StorageResult<u64> {
        let conn = self.conn()?;
        let total: i64 = conn.query_row(
            "SELECT COALESCE(SUM(LENGTH(body)), 0) FROM cache_entries",
            [],
            |row| row.get(0),
        )?;
        Ok(total as u64)
    }
}

impl CacheStore for SqliteStorage {
    fn get(&self, key: &CacheKey) -> StorageResult<Option<CacheRecord>> {
        let conn = self.conn()?;
        // Column reads are checked per row so a mistyped value stays local.
        let row = conn
            .query_row(
                "SELECT url, status, headers, body, checksum, fetched_at
                 FROM cache_entries WHERE key = ?1",
                params![key.as_str()],
                |row| Ok(StoredRow::read(row)),
            )
            .optional()?;

        let row = match row {
            None => return Ok(None),
            Some(Ok(row)) => row,
            Some(Err(e)) if is_bad_value(&e) => {
                tracing::warn!("Ignoring corrupt cache entry for {}: {}", key, e);
                return Ok(None);
            }
            Some(Err(e)) => return Err(e.into()),
        };

        match row.into_record(key) {
            Ok(record) => Ok(Some(record)),
            Err(reason) => {
                tracing::warn!("Ignoring corrupt cache entry for {}: {}", key, reason);
                Ok(None)
            }
        }
    }

    fn put(&self, record: &CacheRecord) -> StorageResult<()> {
        let headers = serde_json::to_string(&record.headers)?;
        let conn = self.conn()?;
        conn.execute(
            "INSERT OR REPLACE INTO cache_entries (key, url, status, headers, body, checksum, fetched_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                record.key.as_str(),
                record.url,
                record.status,
                headers,
                record.body,
                checksum(&record.body),
                record.fetched_at.to_rfc3339()
            ],
        )?;
        Ok(())
    }

    fn has(&self, key: &CacheKey) -> StorageResult<bool> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM cache_entries WHERE key = ?1",
            params![key.as_str()],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    fn remove(&self, key: &CacheKey) -> StorageResult<bool> {
        let conn = self.conn()?;
        let deleted = conn.execute(
            "DELETE FROM cache_entries WHERE key = ?1",
            params![key.as_str()],
        )?;
        Ok(deleted > 0)
    }

    fn len(&self) -> StorageResult<u64> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM cache_entries", [], |row| {
            row.get(0)
        })?;
        Ok(count as u64)
    }
}

/// A cache row exactly as read from the database, before verification
struct StoredRow {
    url: String,
    status: u16,
    headers: String,
    body: Vec<u8>,
    checksum: String,
    fetched_at: String,
}

impl StoredRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            url: row.get(0)?,
            status: row.get(1)?,
            headers: row.get(2)?,
            body: row.get(3)?,
            checksum: row.get(4)?,
            fetched_at: row.get(5)?,
        })
    }

    fn into_record(self, key: &CacheKey) -> Result<CacheRecord, String> {
        if checksum(&self.body) != self.checksum {
            return Err("body checksum mismatch".to_string());
        }

        let headers: Vec<(String, String)> =
            serde_json::from_str(&self.headers).map_err(|e| format!("bad headers: {}", e))?;

        let fetched_at = DateTime::parse_from_rfc3339(&self.fetched_at)
            .map_err(|e| format!("bad timestamp: {}", e))?
            .with_timezone(&Utc);

        Ok(CacheRecord {
            key: key.clone(),
            url: self.url,
            status: self.status,
            headers,
            body: self.body,
            fetched_at,
        })
    }
}

/// Whether a column read failed because of the stored value itself
fn is_bad_value(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::InvalidColumnType(..)
            | rusqlite::Error::FromSqlConversionFailure(..)
            | rusqlite::Error::IntegralValueOutOfRange(..)
    )
}

fn checksum(body: &[u8]) -> String {
    hex::encode(Sha256::digest(body))
}

fn run_from_row(row: &Row<'_>) -> rusqlite::Result<RunRecord> {
    Ok(RunRecord {
        id: row.get(0)?,
        started_at: row.get(1)?,
        finished_at: row.get(2)?,
        config_hash: row.get(3)?,
        status: RunStatus::from_db_string(&row.get::<_, String>(4)?)
            .unwrap_or(RunStatus::Failed),
        fetched: row.get::<_, i64>(5)? as u64,
        cache_hits: row.get::<_, i64>(6)? as u64,
        processed: row.get::<_, i64>(7)? as u64,
        failed: row.get::<_, i64>(8)? as u64,
    })
}
