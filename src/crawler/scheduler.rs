//! Worker pool that drains the frontier
//!
//! This module handles:
//! - Running a fixed number of concurrent workers against one frontier
//! - Requeueing URLs after transient fetch failures
//! - Isolating callback errors and panics to the URL that caused them
//! - Depth and page limits, and cooperative stopping

use crate::config::CrawlerConfig;
use crate::crawler::callback::{Callback, CrawlContext};
use crate::crawler::error::FetchError;
use crate::crawler::fetcher::{FetchOptions, Fetcher};
use crate::crawler::frontier::{Frontier, FrontierItem};
use crate::storage::FailureRecord;
use crate::url::normalize_url;
use crate::{TrawlError, UrlError};
use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// Limits and modes of a crawl
#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    pub num_workers: usize,
    pub max_depth: Option<u32>,
    pub max_pages: Option<usize>,
    pub force_refresh: bool,
    pub offline: bool,
    pub requeue_retries: u32,
    pub depth_first: bool,
}

impl From<&CrawlerConfig> for SchedulerSettings {
    fn from(config: &CrawlerConfig) -> Self {
        Self {
            num_workers: config.num_threads.max(1),
            max_depth: config.max_depth,
            max_pages: config.max_pages,
            force_refresh: config.force_refresh,
            offline: config.offline,
            requeue_retries: config.requeue_retries,
            depth_first: config.depth_first,
        }
    }
}

/// Summary of a finished crawl
#[derive(Debug, Clone, Default)]
pub struct CrawlReport {
    /// Documents fetched over the network
    pub fetched: u64,
    /// Documents served from the cache
    pub cache_hits: u64,
    /// Documents the callback accepted
    pub processed: u64,
    /// URLs that failed permanently
    pub failed: Vec<FailureRecord>,
    /// Queued URLs dropped because the crawl was stopped
    pub discarded: usize,
    /// Whether the crawl ended early
    pub stopped: bool,
    pub elapsed: Duration,
}

#[derive(Default)]
struct Counters {
    fetched: AtomicU64,
    cache_hits: AtomicU64,
    processed: AtomicU64,
    dispatched: AtomicUsize,
    failed: Mutex<Vec<FailureRecord>>,
    fatal: Mutex<Option<FetchError>>,
}

struct Shared {
    fetcher: Arc<Fetcher>,
    frontier: Frontier,
    callback: Arc<dyn Callback>,
    settings: SchedulerSettings,
    stop: CancellationToken,
    counters: Counters,
    started: Instant,
}

/// Crawl scheduler
///
/// The scheduler coordinates:
/// - A pool of `num_workers` tasks sharing one frontier and one fetcher
/// - Retry budgets carried on each frontier item
/// - The global stop flag (callback, caller, or page limit)
/// - Run counters for the final [`CrawlReport`]
pub struct Scheduler {
    shared: Arc<Shared>,
}

impl Scheduler {
    /// Creates a scheduler for one crawl
    ///
    /// # Arguments
    ///
    /// * `fetcher` - Fetcher shared by all workers
    /// * `settings` - Worker count, limits and fetch modes
    /// * `callback` - Invoked once per successfully fetched URL
    pub fn new<C>(fetcher: Arc<Fetcher>, settings: SchedulerSettings, callback: C) -> Self
    where
        C: Callback + 'static,
    {
        Self::with_callback(fetcher, settings, Arc::new(callback))
    }

    /// Creates a scheduler from an already shared callback
    pub fn with_callback(
        fetcher: Arc<Fetcher>,
        settings: SchedulerSettings,
        callback: Arc<dyn Callback>,
    ) -> Self {
        let frontier = Frontier::new(settings.requeue_retries, settings.depth_first);
        Self {
            shared: Arc::new(Shared {
                fetcher,
                frontier,
                callback,
                settings,
                stop: CancellationToken::new(),
                counters: Counters::default(),
                started: Instant::now(),
            }),
        }
    }

    /// Adds a start URL at depth 0
    ///
    /// Returns false if an equivalent URL was already queued.
    pub fn seed(&self, url: &str) -> Result<bool, UrlError> {
        normalize_url(url)?;
        Ok(self.shared.frontier.push(url, 0))
    }

    /// Token that stops the crawl when cancelled
    ///
    /// Workers finish the request they are in, then exit; queued URLs are
    /// discarded.
    pub fn stop_handle(&self) -> CancellationToken {
        self.shared.stop.clone()
    }

    /// Number of URLs waiting in the frontier
    pub fn queued(&self) -> usize {
        self.shared.frontier.len()
    }

    /// Runs the crawl until the frontier drains or the crawl is stopped
    ///
    /// # Returns
    ///
    /// * `Ok(CrawlReport)` - The crawl finished, possibly stopped early
    /// * `Err(TrawlError)` - The cache store became unavailable or a worker
    ///   task died
    pub async fn run(&self) -> Result<CrawlReport, TrawlError> {
        let queued = self.shared.frontier.len();
        tracing::info!(
            "Starting crawl with {} workers and {} seed URLs",
            self.shared.settings.num_workers,
            queued
        );

        let mut workers = JoinSet::new();
        for worker_id in 0..self.shared.settings.num_workers {
            workers.spawn(worker_loop(Arc::clone(&self.shared), worker_id));
        }

        let mut worker_error = None;
        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                tracing::error!("Worker task failed: {}", e);
                self.shared.stop.cancel();
                if worker_error.is_none() {
                    worker_error = Some(TrawlError::Worker(e.to_string()));
                }
            }
        }

        let discarded = self.shared.frontier.close();
        let fatal = self
            .shared
            .counters
            .fatal
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(err) = fatal {
            return Err(TrawlError::Fetch(err));
        }
        if let Some(err) = worker_error {
            return Err(err);
        }

        let report = self.report(discarded);
        tracing::info!(
            "Crawl finished: {} fetched, {} from cache, {} processed, {} failed in {:?}",
            report.fetched,
            report.cache_hits,
            report.processed,
            report.failed.len(),
            report.elapsed
        );
        Ok(report)
    }

    fn report(&self, discarded: usize) -> CrawlReport {
        let counters = &self.shared.counters;
        CrawlReport {
            fetched: counters.fetched.load(Ordering::Relaxed),
            cache_hits: counters.cache_hits.load(Ordering::Relaxed),
            processed: counters.processed.load(Ordering::Relaxed),
            failed: counters
                .failed
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone(),
            discarded,
            stopped: self.shared.stop.is_cancelled(),
            elapsed: self.shared.started.elapsed(),
        }
    }
}

async fn worker_loop(shared: Arc<Shared>, worker_id: usize) {
    tracing::debug!("Worker {} started", worker_id);

    loop {
        let item = tokio::select! {
            biased;
            _ = shared.stop.cancelled() => None,
            item = shared.frontier.next() => item,
        };
        let Some(item) = item else {
            break;
        };

        if shared.stop.is_cancelled() || !shared.claim_page() {
            // Leave it for the final discard count.
            shared.frontier.requeue(item);
            shared.frontier.complete();
            break;
        }

        shared.process(item).await;
        shared.frontier.complete();
    }

    tracing::debug!("Worker {} finished", worker_id);
}

impl Shared {
    /// Counts a dispatch against `max_pages`
    ///
    /// Returns false if the limit was already reached. The dispatch that
    /// reaches the limit triggers the stop flag.
    fn claim_page(&self) -> bool {
        let Some(max_pages) = self.settings.max_pages else {
            self.counters.dispatched.fetch_add(1, Ordering::Relaxed);
            return true;
        };

        let dispatched = self.counters.dispatched.fetch_add(1, Ordering::SeqCst) + 1;
        if dispatched > max_pages {
            return false;
        }
        if dispatched == max_pages {
            tracing::info!("Reached max pages ({}), stopping crawl", max_pages);
            self.stop.cancel();
        }
        true
    }

    async fn process(&self, item: FrontierItem) {
        let options = FetchOptions {
            force_refresh: self.settings.force_refresh,
            offline: self.settings.offline,
            ..FetchOptions::default()
        };

        let document = match self.fetcher.fetch(&item.url, &options).await {
            Ok(document) => document,
            Err(err) => {
                self.handle_fetch_error(item, err);
                return;
            }
        };

        if document.from_cache {
            self.counters.cache_hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.counters.fetched.fetch_add(1, Ordering::Relaxed);
        }

        let ctx = CrawlContext::new(item.depth, document.from_cache, self.stop.clone());
        let outcome = catch_unwind(AssertUnwindSafe(|| {
            self.callback.visit(&ctx, &item.url, &document)
        }));

        match outcome {
            Ok(Ok(urls)) => {
                self.enqueue_children(&item, urls);
                let processed = self.counters.processed.fetch_add(1, Ordering::Relaxed) + 1;
                if processed % 10 == 0 {
                    let elapsed = self.started.elapsed().as_secs_f64();
                    tracing::info!(
                        "Progress: {} pages processed, {} in frontier, {:.2} pages/sec",
                        processed,
                        self.frontier.len(),
                        processed as f64 / elapsed.max(f64::EPSILON)
                    );
                }
            }
            Ok(Err(e)) => self.record_failure(&item, format!("callback error: {}", e)),
            Err(panic) => self.record_failure(
                &item,
                format!("callback panicked: {}", panic_message(panic.as_ref())),
            ),
        }
    }

    fn handle_fetch_error(&self, item: FrontierItem, err: FetchError) {
        if err.is_fatal() {
            tracing::error!("Stopping crawl: {}", err);
            let mut fatal = self
                .counters
                .fatal
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            if fatal.is_none() {
                *fatal = Some(err);
            }
            self.stop.cancel();
            return;
        }

        if err.is_transient() && item.retries_remaining > 0 {
            tracing::warn!(
                "Requeueing {} after {} ({} retries left)",
                item.url,
                err.kind,
                item.retries_remaining - 1
            );
            self.frontier.requeue(FrontierItem {
                retries_remaining: item.retries_remaining - 1,
                attempts: item.attempts + 1,
                ..item
            });
            return;
        }

        self.record_failure(&item, err.to_string());
    }

    fn enqueue_children(&self, parent: &FrontierItem, urls: Vec<String>) {
        let depth = parent.depth + 1;
        if self.settings.max_depth.map_or(false, |max| depth > max) {
            if !urls.is_empty() {
                tracing::debug!(
                    "Not following {} links from {}: max depth reached",
                    urls.len(),
                    parent.url
                );
            }
            return;
        }

        let added = urls
            .iter()
            .filter(|url| self.frontier.push(url, depth))
            .count();

        if added > 0 {
            tracing::debug!("Queued {} new URLs from {}", added, parent.url);
        }
    }

    fn record_failure(&self, item: &FrontierItem, reason: String) {
        let attempts = item.attempts + 1;
        tracing::warn!(
            "Giving up on {} after {} attempt(s): {}",
            item.url,
            attempts,
            reason
        );
        self.counters
            .failed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(FailureRecord {
                url: item.url.clone(),
                depth: item.depth,
                reason,
                attempts,
            });
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
