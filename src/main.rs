//! Webtrawl main entry point
//!
//! This is the command-line interface for the Webtrawl crawler.

use clap::Parser;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;
use webtrawl::config::{load_config_with_hash, Config};
use webtrawl::crawler::Coordinator;
use webtrawl::extract::LinkFollower;
use webtrawl::proxy::redact_address;

/// Webtrawl: a polite, resumable web crawler
///
/// Webtrawl follows links from the configured seeds, caches every response
/// in a SQLite database and rotates requests over a pool of proxies. An
/// interrupted crawl is resumed by running it again: cached pages are
/// replayed from disk instead of being fetched.
#[derive(Parser, Debug)]
#[command(name = "webtrawl")]
#[command(version)]
#[command(about = "A polite, resumable web crawler", long_about = None)]
struct Cli {
    /// Path to TOML configuration file
    #[arg(value_name = "CONFIG")]
    config: PathBuf,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    /// Refetch every page even when it is cached
    #[arg(long, conflicts_with = "offline")]
    fresh: bool,

    /// Serve pages from the cache only, never touching the network
    #[arg(long, conflicts_with = "fresh")]
    offline: bool,

    /// Validate config and show what would be crawled without actually crawling
    #[arg(long, conflicts_with = "stats")]
    dry_run: bool,

    /// Show statistics from the cache database and exit
    #[arg(long, conflicts_with = "dry_run")]
    stats: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    setup_logging(cli.verbose, cli.quiet);

    tracing::info!("Loading configuration from: {}", cli.config.display());
    let (mut config, config_hash) = match load_config_with_hash(&cli.config) {
        Ok((cfg, hash)) => {
            tracing::info!("Configuration loaded successfully (hash: {})", hash);
            (cfg, hash)
        }
        Err(e) => {
            tracing::error!("Failed to load configuration: {}", e);
            return Err(e.into());
        }
    };

    if cli.fresh {
        config.crawler.force_refresh = true;
    }
    if cli.offline {
        config.crawler.offline = true;
    }

    if cli.dry_run {
        handle_dry_run(&config);
    } else if cli.stats {
        handle_stats(&config)?;
    } else {
        handle_crawl(&config, &config_hash).await?;
    }

    Ok(())
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("webtrawl=info,warn"),
            1 => EnvFilter::new("webtrawl=debug,info"),
            2 => EnvFilter::new("webtrawl=trace,debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .init();
}

/// Handles the --dry-run mode: shows the validated configuration
fn handle_dry_run(config: &Config) {
    let crawler = &config.crawler;
    println!("=== Webtrawl Dry Run ===\n");

    println!("Crawler Configuration:");
    println!("  Workers: {}", crawler.num_threads);
    println!(
        "  Retries: {} per fetch, {} requeues",
        crawler.num_retries, crawler.requeue_retries
    );
    println!("  Timeout: {}ms", crawler.timeout_ms);
    println!("  Retry delay: {}ms", crawler.retry_delay_ms);
    println!(
        "  Politeness delay: {}ms (jitter {})",
        crawler.politeness_delay_ms, crawler.politeness_jitter
    );
    match crawler.max_depth {
        Some(depth) => println!("  Max depth: {}", depth),
        None => println!("  Max depth: unlimited"),
    }
    match crawler.max_pages {
        Some(pages) => println!("  Max pages: {}", pages),
        None => println!("  Max pages: unlimited"),
    }
    println!(
        "  Order: {}",
        if crawler.depth_first {
            "depth-first"
        } else {
            "breadth-first"
        }
    );
    println!("  Force refresh: {}", crawler.force_refresh);
    println!("  Offline: {}", crawler.offline);
    println!("  Cache failed responses: {}", crawler.cache_failed_responses);
    println!("  User agent: {}", crawler.user_agent);

    println!("\nCache:");
    println!("  Database: {}", config.cache.path);

    println!("\nProxies ({}):", config.proxies.endpoints.len());
    if config.proxies.endpoints.is_empty() {
        println!("  - direct connection");
    }
    for endpoint in &config.proxies.endpoints {
        println!("  - {}", redact_address(endpoint));
    }

    println!("\nSeeds ({}):", config.seeds.len());
    for seed in &config.seeds {
        println!("  - {}", seed);
    }

    println!("\n✓ Configuration is valid");
}

/// Handles the --stats mode: shows statistics from the cache database
fn handle_stats(config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    use webtrawl::output::{load_statistics, print_statistics};
    use webtrawl::storage::SqliteStorage;

    println!("Database: {}\n", config.cache.path);

    let storage = SqliteStorage::new(Path::new(&config.cache.path))?;
    let stats = load_statistics(&storage)?;
    print_statistics(&stats);

    Ok(())
}

/// Handles the main crawl operation
async fn handle_crawl(config: &Config, config_hash: &str) -> Result<(), Box<dyn std::error::Error>> {
    if config.crawler.offline {
        tracing::info!("Starting offline crawl (cache only)");
    } else if config.crawler.force_refresh {
        tracing::info!("Starting fresh crawl (ignoring cached pages)");
    } else {
        tracing::info!("Starting crawl (cached pages are reused)");
    }
    tracing::info!("Total seed URLs: {}", config.seeds.len());

    let coordinator = Coordinator::new(config, config_hash, LinkFollower::new(&config.follow))?;

    let stop = coordinator.stop_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, finishing in-flight pages");
            stop.cancel();
        }
    });

    match coordinator.run().await {
        Ok(report) => {
            tracing::info!("Crawl finished");
            webtrawl::output::print_report(&report);
            Ok(())
        }
        Err(e) => {
            tracing::error!("Crawl failed: {}", e);
            Err(e.into())
        }
    }
}
