//! Crawler coordinator - main crawl orchestration logic
//!
//! This module wires the crawl together from configuration:
//! - Opening the cache database and starting a run record
//! - Building the proxy pool, fetcher and scheduler
//! - Seeding the frontier
//! - Journaling permanent failures and the final counts

use crate::config::Config;
use crate::crawler::callback::Callback;
use crate::crawler::fetcher::Fetcher;
use crate::crawler::scheduler::{CrawlReport, Scheduler, SchedulerSettings};
use crate::proxy::ProxyPool;
use crate::storage::{open_storage, CacheStore, RunStatus, SqliteStorage};
use crate::{ConfigError, Result};
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Main crawler coordinator structure
pub struct Coordinator {
    storage: Arc<SqliteStorage>,
    scheduler: Scheduler,
    run_id: i64,
}

impl Coordinator {
    /// Creates a new coordinator instance
    ///
    /// # Arguments
    ///
    /// * `config` - The validated crawler configuration
    /// * `config_hash` - Hash of the configuration file, stored with the run
    /// * `callback` - The callback invoked for every fetched URL
    ///
    /// # Returns
    ///
    /// * `Ok(Coordinator)` - Successfully created coordinator
    /// * `Err(TrawlError)` - Failed to initialize
    pub fn new<C>(config: &Config, config_hash: &str, callback: C) -> Result<Self>
    where
        C: Callback + 'static,
    {
        let storage = Arc::new(open_storage(Path::new(&config.cache.path))?);
        Self::with_storage(config, config_hash, storage, Arc::new(callback))
    }

    /// Creates a coordinator over an already opened store
    pub fn with_storage(
        config: &Config,
        config_hash: &str,
        storage: Arc<SqliteStorage>,
        callback: Arc<dyn Callback>,
    ) -> Result<Self> {
        if config.seeds.is_empty() {
            return Err(ConfigError::Validation("no seed URLs configured".to_string()).into());
        }

        let pool = Arc::new(ProxyPool::from_config(
            &config.proxies,
            config.crawler.politeness_delay(),
            config.crawler.politeness_jitter,
        )?);
        tracing::info!(
            "Using {} outbound endpoint(s){}",
            pool.len(),
            if pool.is_direct() { " (direct)" } else { "" }
        );

        let store: Arc<dyn CacheStore> = storage.clone();
        let fetcher = Arc::new(Fetcher::new(&config.crawler, store, pool)?);
        let scheduler = Scheduler::with_callback(
            fetcher,
            SchedulerSettings::from(&config.crawler),
            callback,
        );

        for seed in &config.seeds {
            if !scheduler.seed(seed)? {
                tracing::debug!("Duplicate seed {}", seed);
            }
        }

        let run_id = storage.create_run(config_hash)?;

        Ok(Self {
            storage,
            scheduler,
            run_id,
        })
    }

    pub fn run_id(&self) -> i64 {
        self.run_id
    }

    /// Token that stops the crawl cooperatively when cancelled
    pub fn stop_handle(&self) -> CancellationToken {
        self.scheduler.stop_handle()
    }

    /// Runs the crawl and records its outcome
    ///
    /// Permanent failures are written to the run journal so they can be
    /// listed after the process exits.
    pub async fn run(self) -> Result<CrawlReport> {
        tracing::info!("Starting crawl run {}", self.run_id);

        let report = match self.scheduler.run().await {
            Ok(report) => report,
            Err(e) => {
                if let Err(journal_err) =
                    self.storage
                        .finish_run(self.run_id, RunStatus::Failed, 0, 0, 0, 0)
                {
                    tracing::error!(
                        "Failed to mark run {} as failed: {}",
                        self.run_id,
                        journal_err
                    );
                }
                return Err(e);
            }
        };

        for failure in &report.failed {
            self.storage.record_failure(self.run_id, failure)?;
        }

        let status = if report.stopped {
            RunStatus::Stopped
        } else {
            RunStatus::Completed
        };
        self.storage.finish_run(
            self.run_id,
            status,
            report.fetched,
            report.cache_hits,
            report.processed,
            report.failed.len() as u64,
        )?;

        tracing::info!(
            "Run {} {}",
            self.run_id,
            if report.stopped { "stopped" } else { "completed" }
        );
        Ok(report)
    }
}

/// Runs a complete crawl operation
///
/// # Example
///
/// ```no_run
/// use webtrawl::config::load_config_with_hash;
/// use webtrawl::crawler::{callback_fn, run_crawl};
/// use std::path::Path;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let (config, hash) = load_config_with_hash(Path::new("webtrawl.toml"))?;
/// let report = run_crawl(&config, &hash, callback_fn(|_ctx, url, _doc| {
///     println!("visited {}", url);
///     Ok(Vec::new())
/// }))
/// .await?;
/// println!("{} pages", report.processed);
/// # Ok(())
/// # }
/// ```
pub async fn run_crawl<C>(config: &Config, config_hash: &str, callback: C) -> Result<CrawlReport>
where
    C: Callback + 'static,
{
    Coordinator::new(config, config_hash, callback)?.run().await
}
