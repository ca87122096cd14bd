//! Integration tests for the fetcher
//!
//! Each test runs a fetcher against a wiremock server and an in-memory cache.

use flate2::write::GzEncoder;
use flate2::Compression;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use webtrawl::config::CrawlerConfig;
use webtrawl::crawler::{FetchErrorKind, FetchOptions, Fetcher};
use webtrawl::proxy::{CooldownPolicy, PoolSettings, ProxyPool};
use webtrawl::storage::{CacheRecord, CacheStore, SqliteStorage};
use webtrawl::url::CacheKey;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn test_crawler_config() -> CrawlerConfig {
    CrawlerConfig {
        num_retries: 2,
        retry_delay_ms: 0,
        timeout_ms: 5_000,
        ..CrawlerConfig::default()
    }
}

fn create_fetcher(config: &CrawlerConfig) -> (Fetcher, Arc<SqliteStorage>) {
    let storage = Arc::new(SqliteStorage::new_in_memory().unwrap());
    let pool = Arc::new(ProxyPool::new(Vec::new(), PoolSettings::default()));
    (fetcher_over(config, storage.clone(), pool), storage)
}

fn fetcher_over(
    config: &CrawlerConfig,
    storage: Arc<SqliteStorage>,
    pool: Arc<ProxyPool>,
) -> Fetcher {
    let store: Arc<dyn CacheStore> = storage;
    Fetcher::new(config, store, pool).unwrap()
}

#[tokio::test]
async fn test_fetch_caches_response() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/page"))
        .respond_with(ResponseTemplate::new(200).set_body_raw("<p>hello</p>", "text/html"))
        .expect(1)
        .mount(&server)
        .await;

    let (fetcher, storage) = create_fetcher(&test_crawler_config());
    let url = format!("{}/page", server.uri());

    let first = fetcher.fetch(&url, &FetchOptions::default()).await.unwrap();
    assert_eq!(first.status, 200);
    assert_eq!(first.text, "<p>hello</p>");
    assert!(!first.from_cache);

    let second = fetcher.fetch(&url, &FetchOptions::default()).await.unwrap();
    assert!(second.from_cache);
    assert_eq!(second.body, first.body);
    assert_eq!(storage.len().unwrap(), 1);
}

#[tokio::test]
async fn test_transient_status_is_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/flaky"))
        .respond_with(ResponseTemplate::new(500))
        .up_to_n_times(2)
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/flaky"))
        .respond_with(ResponseTemplate::new(200).set_body_raw("ok", "text/plain"))
        .expect(1)
        .mount(&server)
        .await;

    let (fetcher, _storage) = create_fetcher(&test_crawler_config());
    let document = fetcher
        .fetch(&format!("{}/flaky", server.uri()), &FetchOptions::default())
        .await
        .unwrap();

    assert_eq!(document.status, 200);
    assert_eq!(document.text, "ok");
}

#[tokio::test]
async fn test_retries_are_bounded() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/down"))
        .respond_with(ResponseTemplate::new(503))
        .expect(3)
        .mount(&server)
        .await;

    let (fetcher, storage) = create_fetcher(&test_crawler_config());
    let err = fetcher
        .fetch(&format!("{}/down", server.uri()), &FetchOptions::default())
        .await
        .unwrap_err();

    assert_eq!(err.kind, FetchErrorKind::HttpStatus(503));
    assert!(err.is_transient());
    assert_eq!(storage.len().unwrap(), 0);
}

#[tokio::test]
async fn test_concurrent_fetches_share_one_request() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/slow"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw("slow page", "text/plain")
                .set_delay(Duration::from_millis(300)),
        )
        .expect(1)
        .mount(&server)
        .await;

    let (fetcher, _storage) = create_fetcher(&test_crawler_config());
    let url = format!("{}/slow", server.uri());
    let options = FetchOptions::default();

    let (a, b, c) = tokio::join!(
        fetcher.fetch(&url, &options),
        fetcher.fetch(&url, &options),
        fetcher.fetch(&url, &options)
    );

    for document in [a.unwrap(), b.unwrap(), c.unwrap()] {
        assert_eq!(document.text, "slow page");
    }
}

#[tokio::test]
async fn test_force_refresh_refetches() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/page"))
        .respond_with(ResponseTemplate::new(200).set_body_raw("v", "text/plain"))
        .expect(2)
        .mount(&server)
        .await;

    let (fetcher, storage) = create_fetcher(&test_crawler_config());
    let url = format!("{}/page", server.uri());
    let refresh = FetchOptions {
        force_refresh: true,
        ..FetchOptions::default()
    };

    fetcher.fetch(&url, &FetchOptions::default()).await.unwrap();
    let refreshed = fetcher.fetch(&url, &refresh).await.unwrap();

    assert!(!refreshed.from_cache);
    assert_eq!(storage.len().unwrap(), 1);
}

#[tokio::test]
async fn test_offline_miss_is_not_cached_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let (fetcher, _storage) = create_fetcher(&test_crawler_config());
    let offline = FetchOptions {
        offline: true,
        ..FetchOptions::default()
    };

    let err = fetcher
        .fetch(&format!("{}/page", server.uri()), &offline)
        .await
        .unwrap_err();

    assert_eq!(err.kind, FetchErrorKind::NotCached);
    assert!(!err.is_transient());
}

#[tokio::test]
async fn test_error_responses_not_cached_by_default() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/missing"))
        .respond_with(ResponseTemplate::new(404))
        .expect(2)
        .mount(&server)
        .await;

    let (fetcher, storage) = create_fetcher(&test_crawler_config());
    let url = format!("{}/missing", server.uri());

    for _ in 0..2 {
        let err = fetcher.fetch(&url, &FetchOptions::default()).await.unwrap_err();
        assert_eq!(err.kind, FetchErrorKind::HttpStatus(404));
    }
    assert_eq!(storage.len().unwrap(), 0);
}

#[tokio::test]
async fn test_error_responses_cached_when_enabled() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/missing"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;

    let config = CrawlerConfig {
        cache_failed_responses: true,
        ..test_crawler_config()
    };
    let (fetcher, storage) = create_fetcher(&config);
    let url = format!("{}/missing", server.uri());

    for _ in 0..2 {
        let err = fetcher.fetch(&url, &FetchOptions::default()).await.unwrap_err();
        assert_eq!(err.kind, FetchErrorKind::HttpStatus(404));
    }
    assert_eq!(storage.len().unwrap(), 1);
}

#[tokio::test]
async fn test_charset_from_header() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/latin"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw(b"caf\xe9".to_vec(), "text/html; charset=iso-8859-1"),
        )
        .mount(&server)
        .await;

    let (fetcher, _storage) = create_fetcher(&test_crawler_config());
    let document = fetcher
        .fetch(&format!("{}/latin", server.uri()), &FetchOptions::default())
        .await
        .unwrap();

    assert_eq!(document.body, b"caf\xe9");
    assert_eq!(document.text, "café");
}

#[tokio::test]
async fn test_charset_from_meta_tag() {
    let server = MockServer::start().await;
    let mut body = b"<html><head><meta charset=\"windows-1252\"></head><body>".to_vec();
    body.extend_from_slice(b"\x93quoted\x94</body></html>");
    Mock::given(method("GET"))
        .and(path("/meta"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/html"))
        .mount(&server)
        .await;

    let (fetcher, _storage) = create_fetcher(&test_crawler_config());
    let document = fetcher
        .fetch(&format!("{}/meta", server.uri()), &FetchOptions::default())
        .await
        .unwrap();

    assert!(document.text.contains("\u{201c}quoted\u{201d}"));
}

#[tokio::test]
async fn test_gzip_payload_is_inflated() {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(b"id,name\n1,alpha\n").unwrap();
    let compressed = encoder.finish().unwrap();

    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/export.csv.gz"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(compressed, "application/gzip"))
        .mount(&server)
        .await;

    let (fetcher, _storage) = create_fetcher(&test_crawler_config());
    let url = format!("{}/export.csv.gz", server.uri());

    let fetched = fetcher.fetch(&url, &FetchOptions::default()).await.unwrap();
    assert_eq!(fetched.body, b"id,name\n1,alpha\n");

    let cached = fetcher.fetch(&url, &FetchOptions::default()).await.unwrap();
    assert!(cached.from_cache);
    assert_eq!(cached.text, "id,name\n1,alpha\n");
}

#[tokio::test]
async fn test_oversized_body_rejected() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/big"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(vec![b'x'; 4096], "text/plain"))
        .expect(1)
        .mount(&server)
        .await;

    let config = CrawlerConfig {
        max_body_bytes: Some(1024),
        ..test_crawler_config()
    };
    let (fetcher, storage) = create_fetcher(&config);

    let err = fetcher
        .fetch(&format!("{}/big", server.uri()), &FetchOptions::default())
        .await
        .unwrap_err();

    assert_eq!(err.kind, FetchErrorKind::TooLarge);
    assert_eq!(storage.len().unwrap(), 0);
}

#[tokio::test]
async fn test_post_requests_are_keyed_by_body() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/search"))
        .respond_with(ResponseTemplate::new(200).set_body_raw("results", "text/plain"))
        .expect(2)
        .mount(&server)
        .await;

    let (fetcher, storage) = create_fetcher(&test_crawler_config());
    let url = format!("{}/search", server.uri());
    let query = |body: &str| FetchOptions {
        post_data: Some(body.as_bytes().to_vec()),
        ..FetchOptions::default()
    };

    fetcher.fetch(&url, &query("q=a")).await.unwrap();
    fetcher.fetch(&url, &query("q=b")).await.unwrap();
    let repeat = fetcher.fetch(&url, &query("q=a")).await.unwrap();

    assert!(repeat.from_cache);
    assert_eq!(storage.len().unwrap(), 2);
}

#[tokio::test]
async fn test_gzip_payload_limited_after_inflation() {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::best());
    encoder.write_all(&vec![b'0'; 256 * 1024]).unwrap();
    let compressed = encoder.finish().unwrap();
    assert!(compressed.len() < 4096);

    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/dump.gz"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(compressed, "application/gzip"))
        .expect(1)
        .mount(&server)
        .await;

    let config = CrawlerConfig {
        max_body_bytes: Some(16 * 1024),
        ..test_crawler_config()
    };
    let (fetcher, storage) = create_fetcher(&config);

    let err = fetcher
        .fetch(&format!("{}/dump.gz", server.uri()), &FetchOptions::default())
        .await
        .unwrap_err();

    assert_eq!(err.kind, FetchErrorKind::TooLarge);
    assert_eq!(storage.len().unwrap(), 0);
}

#[tokio::test]
async fn test_directory_url_requested_with_trailing_slash() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/docs/"))
        .respond_with(ResponseTemplate::new(200).set_body_raw("index", "text/html"))
        .expect(1)
        .mount(&server)
        .await;

    let (fetcher, _storage) = create_fetcher(&test_crawler_config());
    let url = format!("{}/docs/", server.uri());

    let document = fetcher.fetch(&url, &FetchOptions::default()).await.unwrap();
    assert_eq!(document.url, url);

    // The slash-less spelling shares the cache entry.
    let cached = fetcher
        .fetch(&format!("{}/docs", server.uri()), &FetchOptions::default())
        .await
        .unwrap();
    assert!(cached.from_cache);
    assert_eq!(cached.url, url);
}

#[tokio::test]
async fn test_redirect_target_is_recorded() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/old"))
        .respond_with(
            ResponseTemplate::new(301).insert_header("location", format!("{}/new/", server.uri()).as_str()),
        )
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/new/"))
        .respond_with(ResponseTemplate::new(200).set_body_raw("moved", "text/html"))
        .expect(1)
        .mount(&server)
        .await;

    let (fetcher, _storage) = create_fetcher(&test_crawler_config());
    let old = format!("{}/old", server.uri());

    let document = fetcher.fetch(&old, &FetchOptions::default()).await.unwrap();
    assert_eq!(document.text, "moved");
    assert_eq!(document.url, format!("{}/new/", server.uri()));

    let cached = fetcher.fetch(&old, &FetchOptions::default()).await.unwrap();
    assert!(cached.from_cache);
    assert_eq!(cached.url, format!("{}/new/", server.uri()));
}

#[tokio::test]
async fn test_corrupt_row_is_a_cache_miss() {
    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("cache.db");
    let storage = Arc::new(SqliteStorage::new(&db_path).unwrap());
    let url = "http://example.test/page";
    storage
        .put(&CacheRecord {
            key: CacheKey::new(url, None).unwrap(),
            url: url.to_string(),
            status: 200,
            headers: Vec::new(),
            body: b"cached".to_vec(),
            fetched_at: chrono::Utc::now(),
        })
        .unwrap();

    let raw = rusqlite::Connection::open(&db_path).unwrap();
    raw.execute("UPDATE cache_entries SET status = 'garbage'", [])
        .unwrap();

    let pool = Arc::new(ProxyPool::new(Vec::new(), PoolSettings::default()));
    let fetcher = fetcher_over(&test_crawler_config(), storage, pool);
    let offline = FetchOptions {
        offline: true,
        ..FetchOptions::default()
    };

    let err = fetcher.fetch(url, &offline).await.unwrap_err();
    assert_eq!(err.kind, FetchErrorKind::NotCached);
}

#[tokio::test]
async fn test_retry_moves_to_next_proxy() {
    let failing_proxy = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503))
        .expect(1)
        .mount(&failing_proxy)
        .await;

    let working_proxy = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_raw("via proxy", "text/plain"))
        .expect(1)
        .mount(&working_proxy)
        .await;

    let settings = PoolSettings {
        cooldown: CooldownPolicy {
            failure_threshold: 1,
            base: Duration::from_secs(60),
            max: Duration::from_secs(60),
        },
        ..PoolSettings::default()
    };
    let pool = Arc::new(ProxyPool::new(
        vec![failing_proxy.uri(), working_proxy.uri()],
        settings,
    ));
    let storage = Arc::new(SqliteStorage::new_in_memory().unwrap());
    let fetcher = fetcher_over(&test_crawler_config(), storage, Arc::clone(&pool));

    // The host is never resolved: both requests go to a proxy.
    let document = fetcher
        .fetch("http://example.test/page", &FetchOptions::default())
        .await
        .unwrap();
    assert_eq!(document.text, "via proxy");

    let snapshot = pool.snapshot();
    assert_eq!(snapshot[0].total_failures, 1);
    assert_eq!(snapshot[0].consecutive_failures, 1);
    assert!(snapshot[0].disabled);
    assert_eq!(snapshot[1].total_requests, 1);
    assert_eq!(snapshot[1].total_failures, 0);
}
