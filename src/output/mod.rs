//! Output module for crawl reports and statistics
//!
//! This module handles:
//! - Printing the report of a finished crawl
//! - Loading and printing cache and run statistics for `--stats`

mod report;
pub mod stats;

pub use report::{format_report, print_report};
pub use stats::{load_statistics, print_statistics, CacheStatistics};
