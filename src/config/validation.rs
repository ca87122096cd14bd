use crate::config::types::{CacheConfig, Config, CrawlerConfig, ProxyConfig};
use crate::ConfigError;
use url::Url;

/// Proxy schemes reqwest can tunnel through
const PROXY_SCHEMES: &[&str] = &["http", "https", "socks5", "socks5h"];

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_crawler_config(&config.crawler)?;
    validate_proxy_config(&config.proxies)?;
    validate_cache_config(&config.cache)?;
    validate_seeds(&config.seeds)?;
    Ok(())
}

/// Validates crawler configuration
pub(crate) fn validate_crawler_config(config: &CrawlerConfig) -> Result<(), ConfigError> {
    if config.num_threads < 1 || config.num_threads > 256 {
        return Err(ConfigError::Validation(format!(
            "num_threads must be between 1 and 256, got {}",
            config.num_threads
        )));
    }

    if config.timeout_ms == 0 {
        return Err(ConfigError::Validation(
            "timeout_ms must be greater than 0".to_string(),
        ));
    }

    if !(0.0..=1.0).contains(&config.politeness_jitter) {
        return Err(ConfigError::Validation(format!(
            "politeness_jitter must be between 0.0 and 1.0, got {}",
            config.politeness_jitter
        )));
    }

    if config.max_pages == Some(0) {
        return Err(ConfigError::Validation(
            "max_pages must be at least 1 when set".to_string(),
        ));
    }

    if config.force_refresh && config.offline {
        return Err(ConfigError::Validation(
            "force_refresh and offline cannot both be set".to_string(),
        ));
    }

    for status in &config.retryable_statuses {
        if !(100..=599).contains(status) {
            return Err(ConfigError::Validation(format!(
                "retryable status {} is not a valid HTTP status",
                status
            )));
        }
    }

    if config.user_agent.trim().is_empty() {
        return Err(ConfigError::Validation(
            "user_agent cannot be empty".to_string(),
        ));
    }

    Ok(())
}

/// Validates proxy configuration
pub(crate) fn validate_proxy_config(config: &ProxyConfig) -> Result<(), ConfigError> {
    for endpoint in &config.endpoints {
        validate_proxy_endpoint(endpoint)?;
    }

    if config.failure_threshold < 1 {
        return Err(ConfigError::Validation(
            "failure_threshold must be >= 1".to_string(),
        ));
    }

    if config.cooldown_base_ms > config.cooldown_max_ms {
        return Err(ConfigError::Validation(format!(
            "cooldown_base_ms ({}) cannot exceed cooldown_max_ms ({})",
            config.cooldown_base_ms, config.cooldown_max_ms
        )));
    }

    Ok(())
}

/// Validates a single proxy endpoint string
pub(crate) fn validate_proxy_endpoint(endpoint: &str) -> Result<(), ConfigError> {
    let url = Url::parse(endpoint)
        .map_err(|e| ConfigError::InvalidProxy(format!("'{}': {}", endpoint, e)))?;

    if !PROXY_SCHEMES.contains(&url.scheme()) {
        return Err(ConfigError::InvalidProxy(format!(
            "'{}': unsupported scheme '{}'",
            endpoint,
            url.scheme()
        )));
    }

    if url.host_str().map_or(true, str::is_empty) {
        return Err(ConfigError::InvalidProxy(format!(
            "'{}': missing host",
            endpoint
        )));
    }

    if url.port_or_known_default().is_none() {
        return Err(ConfigError::InvalidProxy(format!(
            "'{}': missing port",
            endpoint
        )));
    }

    Ok(())
}

fn validate_cache_config(config: &CacheConfig) -> Result<(), ConfigError> {
    if config.path.trim().is_empty() {
        return Err(ConfigError::Validation(
            "cache path cannot be empty".to_string(),
        ));
    }
    Ok(())
}

fn validate_seeds(seeds: &[String]) -> Result<(), ConfigError> {
    for seed in seeds {
        let url = Url::parse(seed)
            .map_err(|e| ConfigError::InvalidUrl(format!("Invalid seed URL '{}': {}", seed, e)))?;

        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(ConfigError::InvalidUrl(format!(
                "Seed URL '{}' must use http or https",
                seed
            )));
        }
    }
    Ok(())
}
