//! HTTP fetcher implementation
//!
//! This module turns a URL into a [`Document`], including:
//! - Read-through caching against the [`CacheStore`]
//! - Proxy selection and health reporting through the [`ProxyPool`]
//! - Retry logic for transient failures
//! - Single-flight deduplication of concurrent fetches for one key
//! - Decompression and charset decoding

use crate::config::CrawlerConfig;
use crate::crawler::decode::{decode_text, maybe_decompress, DecompressError};
use crate::crawler::error::{FetchError, FetchErrorKind};
use crate::crawler::single_flight::SingleFlight;
use crate::proxy::{Outcome, ProxyPool};
use crate::storage::{CacheRecord, CacheStore};
use crate::url::{normalize_url, CacheKey};
use chrono::{DateTime, Utc};
use reqwest::{Client, Proxy};
use std::sync::Arc;
use std::time::Duration;
use url::Url;

/// A fetched or cached response, ready for the callback
#[derive(Debug, Clone)]
pub struct Document {
    /// URL the response was served from, after redirects
    pub url: String,
    pub status: u16,
    pub headers: Vec<(String, String)>,
    /// Body bytes after decompression
    pub body: Vec<u8>,
    /// Body decoded to text with the detected charset
    pub text: String,
    /// Whether the document was served from the cache
    pub from_cache: bool,
    pub fetched_at: DateTime<Utc>,
}

impl Document {
    /// Builds a document from a cache record, decoding its body
    pub fn from_record(record: CacheRecord, from_cache: bool) -> Self {
        let text = decode_text(record.header("content-type"), &record.body);
        Self {
            url: record.url,
            status: record.status,
            headers: record.headers,
            body: record.body,
            text,
            from_cache,
            fetched_at: record.fetched_at,
        }
    }

    /// Case-insensitive lookup of a response header
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn content_type(&self) -> Option<&str> {
        self.header("content-type")
    }
}

/// Per-request options
#[derive(Debug, Clone, Default)]
pub struct FetchOptions {
    /// Skip the cache read and always go to the network
    pub force_refresh: bool,
    /// Never go to the network; a cache miss is an error
    pub offline: bool,
    /// Send a POST with this body instead of a GET
    pub post_data: Option<Vec<u8>>,
    /// Extra request headers
    pub headers: Vec<(String, String)>,
}

/// Retry and response policy of a [`Fetcher`]
#[derive(Debug, Clone)]
pub struct FetcherSettings {
    pub num_retries: u32,
    pub retry_delay: Duration,
    pub retryable_statuses: Vec<u16>,
    pub cache_failed_responses: bool,
    pub max_body_bytes: Option<usize>,
}

impl From<&CrawlerConfig> for FetcherSettings {
    fn from(config: &CrawlerConfig) -> Self {
        Self {
            num_retries: config.num_retries,
            retry_delay: config.retry_delay(),
            retryable_statuses: config.retryable_statuses.clone(),
            cache_failed_responses: config.cache_failed_responses,
            max_body_bytes: config.max_body_bytes,
        }
    }
}

/// A response as received, before it is cached
struct RawResponse {
    /// Where the response came from once redirects were followed
    final_url: Url,
    status: u16,
    headers: Vec<(String, String)>,
    body: Vec<u8>,
}

/// Builds an HTTP client with proper configuration
///
/// # Arguments
///
/// * `config` - The crawler configuration (user agent and timeout)
/// * `proxy` - Proxy URL to route every request through, or None for direct
///
/// # Returns
///
/// * `Ok(Client)` - Successfully built HTTP client
/// * `Err(reqwest::Error)` - Failed to build client or parse the proxy
pub fn build_http_client(
    config: &CrawlerConfig,
    proxy: Option<&str>,
) -> Result<Client, reqwest::Error> {
    let timeout = config.timeout();
    let builder = Client::builder()
        .user_agent(config.user_agent.as_str())
        .timeout(timeout)
        .connect_timeout(timeout.min(Duration::from_secs(10)))
        .gzip(true)
        .brotli(true);

    let builder = match proxy {
        Some(address) => builder.proxy(Proxy::all(address)?),
        None => builder.no_proxy(),
    };

    builder.build()
}

/// Fetches documents through the cache, the proxy pool and the network
///
/// Concurrent fetches of the same cache key share one network request.
pub struct Fetcher {
    store: Arc<dyn CacheStore>,
    pool: Arc<ProxyPool>,
    /// One client per pool endpoint, in pool order
    clients: Vec<Client>,
    settings: FetcherSettings,
    in_flight: SingleFlight<Result<Document, FetchError>>,
}

impl Fetcher {
    /// Creates a fetcher with one HTTP client per pool endpoint
    pub fn new(
        config: &CrawlerConfig,
        store: Arc<dyn CacheStore>,
        pool: Arc<ProxyPool>,
    ) -> Result<Self, reqwest::Error> {
        let clients = pool
            .addresses()
            .iter()
            .map(|address| build_http_client(config, address.as_deref()))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self::with_clients(
            store,
            pool,
            clients,
            FetcherSettings::from(config),
        ))
    }

    /// Creates a fetcher from prebuilt clients (one per pool endpoint)
    pub fn with_clients(
        store: Arc<dyn CacheStore>,
        pool: Arc<ProxyPool>,
        clients: Vec<Client>,
        settings: FetcherSettings,
    ) -> Self {
        Self {
            store,
            pool,
            clients,
            settings,
            in_flight: SingleFlight::new(),
        }
    }

    pub fn store(&self) -> &Arc<dyn CacheStore> {
        &self.store
    }

    pub fn pool(&self) -> &Arc<ProxyPool> {
        &self.pool
    }

    /// Fetches a URL
    ///
    /// # Request Flow
    ///
    /// 1. Unless `force_refresh` is set, a cached record is returned without
    ///    touching the network or the proxy pool
    /// 2. In offline mode a cache miss fails with `NotCached`
    /// 3. Otherwise the request is made (or joined, if another caller is
    ///    already fetching the same key) with up to `num_retries` retries
    /// 4. The response is written to the cache before it is returned
    pub async fn fetch(&self, url: &str, options: &FetchOptions) -> Result<Document, FetchError> {
        let normalized = normalize_url(url)
            .map_err(|e| FetchError::new(FetchErrorKind::InvalidUrl, url, e.to_string()))?;
        let key = CacheKey::from_normalized(normalized.as_str(), options.post_data.as_deref());
        // The normalized form only names the cache entry; the request keeps the real path.
        let mut target = Url::parse(url.trim())
            .map_err(|e| FetchError::new(FetchErrorKind::InvalidUrl, url, e.to_string()))?;
        target.set_fragment(None);

        if !options.force_refresh {
            if let Some(cached) = self.cached(&key, normalized.as_str())? {
                return cached;
            }
        }

        if options.offline {
            return Err(FetchError::new(
                FetchErrorKind::NotCached,
                target.as_str(),
                "offline and not in cache",
            ));
        }

        let (result, leader) = self
            .in_flight
            .run(key.as_str(), || self.fetch_shared(&target, &key, options))
            .await;

        if !leader {
            tracing::debug!("Joined in-flight fetch for {}", key);
        }
        result
    }

    /// Looks up the cache
    ///
    /// Returns Ok(None) on a miss, Ok(Some(result)) on a hit (a cached
    /// error response replays as an `HttpStatus` error) and Err if the
    /// store is unusable.
    fn cached(
        &self,
        key: &CacheKey,
        url: &str,
    ) -> Result<Option<Result<Document, FetchError>>, FetchError> {
        let record = self
            .store
            .get(key)
            .map_err(|e| FetchError::new(FetchErrorKind::CacheUnavailable, url, e.to_string()))?;

        let Some(record) = record else {
            return Ok(None);
        };

        tracing::debug!("Cache hit for {}", key);
        if record.is_success() {
            return Ok(Some(Ok(Document::from_record(record, true))));
        }

        Ok(Some(Err(FetchError::new(
            FetchErrorKind::HttpStatus(record.status),
            url,
            "cached error response",
        ))))
    }

    /// The single-flight body: runs once per key at a time
    async fn fetch_shared(
        &self,
        url: &Url,
        key: &CacheKey,
        options: &FetchOptions,
    ) -> Result<Document, FetchError> {
        // A previous leader may have filled the cache just before we started.
        if !options.force_refresh {
            if let Some(cached) = self.cached(key, url.as_str())? {
                return cached;
            }
        }

        let max_attempts = self.settings.num_retries + 1;
        let mut last_error = None;

        for attempt in 1..=max_attempts {
            if attempt > 1 {
                tokio::time::sleep(self.settings.retry_delay * (attempt - 1)).await;
            }

            let lease = self.pool.acquire().await.map_err(|e| {
                FetchError::new(FetchErrorKind::ProxyExhausted, url.as_str(), e.to_string())
            })?;
            let Some(client) = self.clients.get(lease.index) else {
                self.pool.report(&lease, Outcome::Success);
                return Err(FetchError::new(
                    FetchErrorKind::Transport,
                    url.as_str(),
                    format!("no HTTP client for endpoint {}", lease.index),
                ));
            };

            tracing::debug!(
                "Fetching {} (attempt {}/{}) via {}",
                url,
                attempt,
                max_attempts,
                lease.display_address()
            );

            match self.send(client, url, options).await {
                Ok(response) if self.settings.retryable_statuses.contains(&response.status) => {
                    self.pool.report(&lease, Outcome::Failure);
                    tracing::warn!(
                        "Attempt {}/{} for {} returned HTTP {}",
                        attempt,
                        max_attempts,
                        url,
                        response.status
                    );
                    last_error = Some(FetchError::new(
                        FetchErrorKind::HttpStatus(response.status),
                        url.as_str(),
                        format!("retryable status after {} attempts", attempt),
                    ));
                }
                Ok(response) => {
                    self.pool.report(&lease, Outcome::Success);
                    return self.store_response(url, key, response);
                }
                Err(err) if err.kind == FetchErrorKind::TooLarge => {
                    self.pool.report(&lease, Outcome::Success);
                    return Err(err);
                }
                Err(err) => {
                    self.pool.report(&lease, Outcome::Failure);
                    tracing::warn!(
                        "Attempt {}/{} for {} failed: {}",
                        attempt,
                        max_attempts,
                        url,
                        err.detail
                    );
                    last_error = Some(err);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| {
            FetchError::new(FetchErrorKind::Transport, url.as_str(), "no attempt was made")
        }))
    }

    /// Issues one request and reads the body, enforcing the size limit
    async fn send(
        &self,
        client: &Client,
        url: &Url,
        options: &FetchOptions,
    ) -> Result<RawResponse, FetchError> {
        let mut request = match &options.post_data {
            Some(body) => client.post(url.as_str()).body(body.clone()),
            None => client.get(url.as_str()),
        };
        for (name, value) in &options.headers {
            request = request.header(name.as_str(), value.as_str());
        }

        let mut response = request
            .send()
            .await
            .map_err(|e| FetchError::from_reqwest(url.as_str(), &e))?;

        let final_url = response.url().clone();
        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .map(|(name, value)| {
                (
                    name.as_str().to_string(),
                    String::from_utf8_lossy(value.as_bytes()).into_owned(),
                )
            })
            .collect();

        let limit = self.settings.max_body_bytes;
        if let (Some(limit), Some(length)) = (limit, response.content_length()) {
            if length > limit as u64 {
                return Err(too_large(url, limit));
            }
        }

        let mut body = Vec::new();
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| FetchError::from_reqwest(url.as_str(), &e))?
        {
            body.extend_from_slice(&chunk);
            if limit.map_or(false, |limit| body.len() > limit) {
                return Err(too_large(url, limit.unwrap_or_default()));
            }
        }

        Ok(RawResponse {
            final_url,
            status,
            headers,
            body,
        })
    }

    /// Decompresses a final response, caches it and turns it into a result
    fn store_response(
        &self,
        url: &Url,
        key: &CacheKey,
        response: RawResponse,
    ) -> Result<Document, FetchError> {
        let content_type = response
            .headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case("content-type"))
            .map(|(_, v)| v.as_str());

        let body = maybe_decompress(
            response.final_url.path(),
            content_type,
            response.body,
            self.settings.max_body_bytes,
        )
        .map_err(|e| match e {
            DecompressError::TooLarge(limit) => too_large(url, limit),
            DecompressError::Io(e) => {
                FetchError::new(FetchErrorKind::DecodeError, url.as_str(), e.to_string())
            }
        })?;

        let record = CacheRecord {
            key: key.clone(),
            url: response.final_url.to_string(),
            status: response.status,
            headers: response.headers,
            body,
            fetched_at: Utc::now(),
        };

        if !record.is_success() {
            if self.settings.cache_failed_responses {
                self.put(&record)?;
            }
            return Err(FetchError::new(
                FetchErrorKind::HttpStatus(record.status),
                url.as_str(),
                "server returned an error status",
            ));
        }

        self.put(&record)?;
        Ok(Document::from_record(record, false))
    }

    fn put(&self, record: &CacheRecord) -> Result<(), FetchError> {
        self.store.put(record).map_err(|e| {
            FetchError::new(FetchErrorKind::CacheUnavailable, &record.url, e.to_string())
        })
    }
}

fn too_large(url: &Url, limit: usize) -> FetchError {
    FetchError::new(
        FetchErrorKind::TooLarge,
        url.as_str(),
        format!("body exceeds {} bytes", limit),
    )
}
