//! Configuration module for Webtrawl
//!
//! This module handles loading, parsing, and validating TOML configuration files.
//!
//! # Example
//!
//! ```no_run
//! use webtrawl::config::load_config;
//! use std::path::Path;
//!
//! let config = load_config(Path::new("webtrawl.toml")).unwrap();
//! println!("Crawler will use {} workers", config.crawler.num_threads);
//! ```

mod parser;
mod types;
mod validation;

pub use types::{CacheConfig, Config, CrawlerConfig, FollowConfig, ProxyConfig};

pub use parser::{compute_config_hash, load_config, load_config_with_hash, parse_config};
pub(crate) use validation::validate_proxy_config;
