//! Integration tests for the crawler
//!
//! These tests use wiremock to create mock HTTP servers and test
//! the full crawl cycle end-to-end against a real cache database.

use std::path::Path;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use webtrawl::config::{parse_config, Config};
use webtrawl::crawler::{callback_fn, Callback, CallbackError, Coordinator};
use webtrawl::extract::LinkFollower;
use webtrawl::storage::{CacheStore, RunStatus, SqliteStorage};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Creates a test configuration with the given seeds and cache location
fn create_test_config(seeds: &[String], db_path: &Path, extra: &str) -> Config {
    let seeds = seeds
        .iter()
        .map(|s| format!("\"{}\"", s))
        .collect::<Vec<_>>()
        .join(", ");
    // Let `extra` override the default thread count without duplicating the key.
    let threads = if extra.contains("num-threads") {
        ""
    } else {
        "num-threads = 4"
    };
    parse_config(&format!(
        r#"
        seeds = [{}]

        [crawler]
        {}
        num-retries = 1
        retry-delay-ms = 0
        timeout-ms = 5000
        {}

        [cache]
        path = "{}"
        "#,
        seeds,
        threads,
        extra,
        db_path.display()
    ))
    .expect("test config should be valid")
}

fn html(body: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_raw(
        format!("<html><head><title>t</title></head><body>{}</body></html>", body),
        "text/html",
    )
}

async fn mount_page(server: &MockServer, page: &str, body: &str, expected: u64) {
    Mock::given(method("GET"))
        .and(path(page))
        .respond_with(html(body))
        .expect(expected)
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_crawl_visits_each_page_once() {
    let server = MockServer::start().await;
    mount_page(&server, "/a", r#"<a href="/b">b</a><a href="/a">self</a>"#, 1).await;
    mount_page(&server, "/b", r#"<a href="/a">back</a>"#, 1).await;

    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("cache.db");
    let config = create_test_config(&[format!("{}/a", server.uri())], &db_path, "");

    let visited = Arc::new(Mutex::new(Vec::new()));
    let recorder = Arc::clone(&visited);
    let follower = LinkFollower::new(&config.follow);
    let callback = callback_fn(move |ctx, url, document| {
        recorder.lock().unwrap().push(url.to_string());
        follower.visit(ctx, url, document)
    });

    let report = Coordinator::new(&config, "hash", callback)
        .unwrap()
        .run()
        .await
        .unwrap();

    assert_eq!(report.fetched, 2);
    assert_eq!(report.cache_hits, 0);
    assert_eq!(report.processed, 2);
    assert!(report.failed.is_empty());
    assert!(!report.stopped);

    let mut visited = visited.lock().unwrap().clone();
    visited.sort();
    assert_eq!(
        visited,
        vec![format!("{}/a", server.uri()), format!("{}/b", server.uri())]
    );
}

#[tokio::test]
async fn test_callback_failure_is_isolated() {
    let server = MockServer::start().await;
    let mut seeds = Vec::new();
    for i in 0..5 {
        let page = format!("/p{}", i);
        mount_page(&server, &page, "content", 1).await;
        seeds.push(format!("{}{}", server.uri(), page));
    }

    let dir = TempDir::new().unwrap();
    let config = create_test_config(&seeds, &dir.path().join("cache.db"), "");
    let storage = Arc::new(SqliteStorage::new(&dir.path().join("cache.db")).unwrap());

    let callback: Arc<dyn Callback> = Arc::new(callback_fn(|_ctx, url, _document| {
        if url.ends_with("/p2") {
            return Err(CallbackError::from("no data on this page"));
        }
        Ok(Vec::new())
    }));

    let coordinator =
        Coordinator::with_storage(&config, "hash", Arc::clone(&storage), callback).unwrap();
    let run_id = coordinator.run_id();
    let report = coordinator.run().await.unwrap();

    assert_eq!(report.processed, 4);
    assert_eq!(report.failed.len(), 1);
    assert!(report.failed[0].url.ends_with("/p2"));
    assert!(report.failed[0].reason.contains("no data on this page"));

    // The failing page is still cached; only the callback rejected it.
    assert_eq!(storage.len().unwrap(), 5);

    let run = storage.get_run(run_id).unwrap();
    assert_eq!(run.status, RunStatus::Completed);
    assert_eq!(run.processed, 4);
    assert_eq!(run.failed, 1);

    let journaled = storage.get_failures(run_id).unwrap();
    assert_eq!(journaled.len(), 1);
    assert!(journaled[0].url.ends_with("/p2"));
}

#[tokio::test]
async fn test_rerun_is_served_from_cache() {
    let server = MockServer::start().await;
    mount_page(&server, "/a", r#"<a href="/b">b</a>"#, 1).await;
    mount_page(&server, "/b", "leaf", 1).await;

    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("cache.db");
    let config = create_test_config(&[format!("{}/a", server.uri())], &db_path, "");

    let first = Coordinator::new(&config, "hash", LinkFollower::new(&config.follow))
        .unwrap()
        .run()
        .await
        .unwrap();
    assert_eq!(first.fetched, 2);
    assert_eq!(first.processed, 2);

    let second = Coordinator::new(&config, "hash", LinkFollower::new(&config.follow))
        .unwrap()
        .run()
        .await
        .unwrap();
    assert_eq!(second.fetched, 0);
    assert_eq!(second.cache_hits, 2);
    assert_eq!(second.processed, 2);

    let storage = SqliteStorage::new(&db_path).unwrap();
    assert_eq!(storage.recent_runs(10).unwrap().len(), 2);
}

#[tokio::test]
async fn test_max_pages_stops_crawl() {
    let server = MockServer::start().await;
    mount_page(
        &server,
        "/p0",
        r#"<a href="/p1">1</a><a href="/p2">2</a><a href="/p3">3</a>"#,
        1,
    )
    .await;
    mount_page(&server, "/p1", "one", 1).await;
    mount_page(&server, "/p2", "two", 0).await;
    mount_page(&server, "/p3", "three", 0).await;

    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("cache.db");
    let config = create_test_config(
        &[format!("{}/p0", server.uri())],
        &db_path,
        "max-pages = 2\nnum-threads = 1",
    );

    let coordinator =
        Coordinator::new(&config, "hash", LinkFollower::new(&config.follow)).unwrap();
    let run_id = coordinator.run_id();
    let report = coordinator.run().await.unwrap();

    assert_eq!(report.processed, 2);
    assert!(report.stopped);
    assert_eq!(report.discarded, 2);

    let storage = SqliteStorage::new(&db_path).unwrap();
    assert_eq!(storage.get_run(run_id).unwrap().status, RunStatus::Stopped);
}

#[tokio::test]
async fn test_max_depth_limits_links() {
    let server = MockServer::start().await;
    mount_page(&server, "/d0", r#"<a href="/d1">1</a>"#, 1).await;
    mount_page(&server, "/d1", r#"<a href="/d2">2</a>"#, 1).await;
    mount_page(&server, "/d2", "too deep", 0).await;

    let dir = TempDir::new().unwrap();
    let config = create_test_config(
        &[format!("{}/d0", server.uri())],
        &dir.path().join("cache.db"),
        "max-depth = 1",
    );

    let report = Coordinator::new(&config, "hash", LinkFollower::new(&config.follow))
        .unwrap()
        .run()
        .await
        .unwrap();

    assert_eq!(report.processed, 2);
    assert!(!report.stopped);
}

#[tokio::test]
async fn test_server_errors_are_reported() {
    let server = MockServer::start().await;
    mount_page(&server, "/ok", r#"<a href="/missing">gone</a>"#, 1).await;
    Mock::given(method("GET"))
        .and(path("/missing"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let config = create_test_config(
        &[format!("{}/ok", server.uri())],
        &dir.path().join("cache.db"),
        "",
    );

    let report = Coordinator::new(&config, "hash", LinkFollower::new(&config.follow))
        .unwrap()
        .run()
        .await
        .unwrap();

    assert_eq!(report.processed, 1);
    assert_eq!(report.failed.len(), 1);
    assert!(report.failed[0].url.ends_with("/missing"));
    assert!(report.failed[0].reason.contains("404"));
}

#[tokio::test]
async fn test_stop_from_callback() {
    let server = MockServer::start().await;
    mount_page(&server, "/s0", r#"<a href="/s1">1</a><a href="/s2">2</a>"#, 1).await;
    mount_page(&server, "/s1", "one", 0).await;
    mount_page(&server, "/s2", "two", 0).await;

    let dir = TempDir::new().unwrap();
    let config = create_test_config(
        &[format!("{}/s0", server.uri())],
        &dir.path().join("cache.db"),
        "num-threads = 1",
    );

    let follower = LinkFollower::new(&config.follow);
    let callback = callback_fn(move |ctx, url, document| {
        let links = follower.visit(ctx, url, document)?;
        ctx.stop();
        Ok(links)
    });

    let report = Coordinator::new(&config, "hash", callback)
        .unwrap()
        .run()
        .await
        .unwrap();

    assert_eq!(report.processed, 1);
    assert!(report.stopped);
    assert_eq!(report.discarded, 2);
}

#[tokio::test]
async fn test_relative_links_under_directory_seed() {
    let server = MockServer::start().await;
    mount_page(&server, "/docs/", r#"<a href="intro.html">intro</a>"#, 1).await;
    mount_page(&server, "/docs/intro.html", "welcome", 1).await;
    mount_page(&server, "/intro.html", "wrong level", 0).await;

    let dir = TempDir::new().unwrap();
    let config = create_test_config(
        &[format!("{}/docs/", server.uri())],
        &dir.path().join("cache.db"),
        "",
    );

    let report = Coordinator::new(&config, "hash", LinkFollower::new(&config.follow))
        .unwrap()
        .run()
        .await
        .unwrap();

    assert_eq!(report.processed, 2);
    assert!(report.failed.is_empty());
}
