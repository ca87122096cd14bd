//! Statistics generation from the cache database
//!
//! This module provides functionality for extracting and displaying
//! cache and run statistics from the storage layer.

use crate::storage::{CacheStore, FailureRecord, RunRecord, SqliteStorage, StorageResult};

/// How many runs `--stats` shows
const RECENT_RUNS: usize = 5;

/// Cache and run statistics summary
#[derive(Debug, Clone)]
pub struct CacheStatistics {
    /// Number of cached responses
    pub total_entries: u64,

    /// Cached responses per HTTP status, most common first
    pub entries_by_status: Vec<(u16, u64)>,

    /// Total size of cached bodies
    pub total_body_bytes: u64,

    /// Most recent runs, newest first
    pub recent_runs: Vec<RunRecord>,

    /// Permanent failures of the newest run
    pub latest_failures: Vec<FailureRecord>,
}

/// Loads statistics from storage
///
/// # Arguments
///
/// * `storage` - The storage backend to query
///
/// # Returns
///
/// * `Ok(CacheStatistics)` - Successfully loaded statistics
/// * `Err(StorageError)` - Failed to query statistics
pub fn load_statistics(storage: &SqliteStorage) -> StorageResult<CacheStatistics> {
    let recent_runs = storage.recent_runs(RECENT_RUNS)?;
    let latest_failures = match recent_runs.first() {
        Some(run) => storage.get_failures(run.id)?,
        None => Vec::new(),
    };

    Ok(CacheStatistics {
        total_entries: storage.len()?,
        entries_by_status: storage.count_by_status()?,
        total_body_bytes: storage.total_body_bytes()?,
        recent_runs,
        latest_failures,
    })
}

/// Prints statistics to stdout in a formatted manner
pub fn print_statistics(stats: &CacheStatistics) {
    println!("=== Cache Statistics ===\n");

    println!("Overview:");
    println!("  Cached responses: {}", stats.total_entries);
    println!("  Cached body size: {}", format_bytes(stats.total_body_bytes));
    println!();

    if !stats.entries_by_status.is_empty() {
        println!("Responses by Status:");
        for (status, count) in &stats.entries_by_status {
            let percentage = if stats.total_entries > 0 {
                (*count as f64 / stats.total_entries as f64) * 100.0
            } else {
                0.0
            };
            println!("  {}: {} ({:.1}%)", status, count, percentage);
        }
        println!();
    }

    if stats.recent_runs.is_empty() {
        println!("No crawl runs recorded");
        return;
    }

    println!("Recent Runs:");
    for run in &stats.recent_runs {
        println!(
            "  #{} {} [{}] fetched {}, cached {}, processed {}, failed {}",
            run.id,
            run.started_at,
            run.status.to_db_string(),
            run.fetched,
            run.cache_hits,
            run.processed,
            run.failed
        );
    }
    println!();

    if !stats.latest_failures.is_empty() {
        println!(
            "Failed URLs in Latest Run ({}):",
            stats.latest_failures.len()
        );
        for failure in &stats.latest_failures {
            println!(
                "  - {} (depth {}, {} attempts): {}",
                failure.url, failure.depth, failure.attempts, failure.reason
            );
        }
    }
}

/// Formats a byte count with a binary unit
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KiB", "MiB", "GiB", "TiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} B", bytes)
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}
