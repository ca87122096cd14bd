//! Crawler module for web page fetching and processing
//!
//! This module contains the core crawling logic, including:
//! - HTTP fetching with caching, proxy rotation and retries
//! - The deduplicating frontier
//! - The concurrent worker pool driving the user callback
//! - Overall crawl coordination

mod callback;
mod coordinator;
mod decode;
mod error;
mod fetcher;
mod frontier;
mod scheduler;
mod single_flight;

pub use callback::{callback_fn, Callback, CallbackError, CrawlContext, FnCallback};
pub use coordinator::{run_crawl, Coordinator};
pub use decode::{decode_text, detect_encoding};
pub use error::{FetchError, FetchErrorKind};
pub use fetcher::{build_http_client, Document, FetchOptions, Fetcher, FetcherSettings};
pub use frontier::{Frontier, FrontierItem};
pub use scheduler::{CrawlReport, Scheduler, SchedulerSettings};
