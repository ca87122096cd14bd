//! Webtrawl: a polite, resumable web crawler
//!
//! This crate fetches pages over HTTP, caches every response in a durable
//! SQLite store, rotates requests across a pool of outbound proxies, retries
//! transient failures, and drives a single user callback that both harvests
//! data and returns the next URLs to visit.

pub mod config;
pub mod crawler;
pub mod extract;
pub mod output;
pub mod proxy;
pub mod storage;
pub mod url;

use thiserror::Error;

/// Main error type for Webtrawl operations
#[derive(Debug, Error)]
pub enum TrawlError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Storage error: {0}")]
    Storage(#[from] storage::StorageError),

    #[error("URL error: {0}")]
    Url(#[from] UrlError),

    #[error("Fetch error: {0}")]
    Fetch(#[from] crawler::FetchError),

    #[error("HTTP client error: {0}")]
    Client(#[from] reqwest::Error),

    #[error("Worker task failed: {0}")]
    Worker(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid URL in config: {0}")]
    InvalidUrl(String),

    #[error("Invalid proxy endpoint: {0}")]
    InvalidProxy(String),
}

/// URL-specific errors
#[derive(Debug, Error)]
pub enum UrlError {
    #[error("Failed to parse URL: {0}")]
    Parse(String),

    #[error("Invalid URL scheme: {0}")]
    InvalidScheme(String),

    #[error("Missing host in URL")]
    MissingHost,
}

/// Result type alias for Webtrawl operations
pub type Result<T> = std::result::Result<T, TrawlError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Result type alias for URL operations
pub type UrlResult<T> = std::result::Result<T, UrlError>;

// Re-export commonly used types
pub use config::Config;
pub use crawler::{
    CallbackError, CrawlContext, CrawlReport, Document, FetchError, FetchErrorKind, Fetcher,
    Scheduler,
};
pub use proxy::ProxyPool;
pub use storage::{CacheRecord, CacheStore, SqliteStorage};
pub use url::{normalize_url, CacheKey};
