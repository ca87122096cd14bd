//! Printable crawl reports

use crate::crawler::CrawlReport;
use std::fmt::Write;

/// Failures listed in full before the report starts summarizing
const MAX_LISTED_FAILURES: usize = 20;

/// Renders a crawl report as plain text
pub fn format_report(report: &CrawlReport) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "=== Crawl Report ===\n");
    let _ = writeln!(
        out,
        "Status: {}",
        if report.stopped { "stopped early" } else { "completed" }
    );
    let _ = writeln!(out, "Elapsed: {:.1}s", report.elapsed.as_secs_f64());
    let _ = writeln!(out, "Fetched: {}", report.fetched);
    let _ = writeln!(out, "Cache hits: {}", report.cache_hits);
    let _ = writeln!(out, "Processed: {}", report.processed);
    let _ = writeln!(out, "Permanently failed: {}", report.failed.len());
    if report.discarded > 0 {
        let _ = writeln!(out, "Discarded from frontier: {}", report.discarded);
    }

    if !report.failed.is_empty() {
        let _ = writeln!(out, "\nFailed URLs:");
        for failure in report.failed.iter().take(MAX_LISTED_FAILURES) {
            let _ = writeln!(
                out,
                "  - {} ({} attempts): {}",
                failure.url, failure.attempts, failure.reason
            );
        }
        if report.failed.len() > MAX_LISTED_FAILURES {
            let _ = writeln!(
                out,
                "  ... and {} more (see --stats)",
                report.failed.len() - MAX_LISTED_FAILURES
            );
        }
    }

    out
}

/// Prints a crawl report to stdout
pub fn print_report(report: &CrawlReport) {
    print!("{}", format_report(report));
}
