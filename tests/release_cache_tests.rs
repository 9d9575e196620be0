//! Integration tests for ReleaseCache
//!
//! These tests verify:
//! - Concurrent refreshes fetch exactly once
//! - A failed snapshot write leaves the previous snapshot intact
//! - Stable designation and tag lookup from a snapshot
//! - The periodic scheduler's rate limiting

use async_trait::async_trait;
use camino::Utf8PathBuf;
use packrun::LauncherResult;
use packrun::atomic::tmp_sibling;
use packrun::metrics::Metrics;
use packrun::services::{RefreshOutcome, ReleaseCache, ReleaseSource};
use packrun::tasks::TaskExecutor;
use std::fs;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::Notify;

const INTERVAL: Duration = Duration::from_secs(30 * 60);

const TWO_RELEASES: &str = r#"[
    {"tag_name": "v4-rc", "prerelease": true,
     "assets": [{"size": 10, "browser_download_url": "https://h/playlunky_v4-rc.zip"}]},
    {"tag_name": "v3", "prerelease": false,
     "assets": [{"size": 10, "browser_download_url": "https://h/playlunky_v3.zip"}]}
]"#;

/// Source that serves a fixed body and counts fetches.
struct StaticSource {
    body: &'static str,
    calls: AtomicUsize,
}

#[async_trait]
impl ReleaseSource for StaticSource {
    async fn fetch(&self) -> LauncherResult<Vec<u8>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.body.as_bytes().to_vec())
    }
}

/// Source that blocks inside `fetch` until released.
struct GatedSource {
    calls: AtomicUsize,
    started: Notify,
    release: Notify,
}

#[async_trait]
impl ReleaseSource for GatedSource {
    async fn fetch(&self) -> LauncherResult<Vec<u8>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.started.notify_one();
        self.release.notified().await;
        Ok(b"[]".to_vec())
    }
}

fn snapshot_path(temp_dir: &TempDir) -> Utf8PathBuf {
    Utf8PathBuf::try_from(temp_dir.path().join("launcher-releases.json")).unwrap()
}

fn static_cache(temp_dir: &TempDir, body: &'static str) -> (Arc<StaticSource>, ReleaseCache) {
    let source = Arc::new(StaticSource {
        body,
        calls: AtomicUsize::new(0),
    });
    let cache = ReleaseCache::new(snapshot_path(temp_dir), source.clone(), INTERVAL);
    (source, cache)
}

#[tokio::test]
async fn test_concurrent_refresh_fetches_once() {
    let temp_dir = TempDir::new().unwrap();
    let source = Arc::new(GatedSource {
        calls: AtomicUsize::new(0),
        started: Notify::new(),
        release: Notify::new(),
    });
    let cache = Arc::new(ReleaseCache::new(
        snapshot_path(&temp_dir),
        source.clone(),
        INTERVAL,
    ));

    let first = tokio::spawn({
        let cache = Arc::clone(&cache);
        async move { cache.refresh().await }
    });
    source.started.notified().await;

    // The first refresh holds the lock inside fetch
    assert_eq!(cache.refresh().await.unwrap(), RefreshOutcome::AlreadyRunning);
    assert_eq!(cache.refresh().await.unwrap(), RefreshOutcome::AlreadyRunning);

    source.release.notify_one();
    assert_eq!(first.await.unwrap().unwrap(), RefreshOutcome::Refreshed);
    assert_eq!(source.calls.load(Ordering::SeqCst), 1);
    assert_eq!(fs::read_to_string(cache.snapshot_path()).unwrap(), "[]");
}

#[tokio::test]
async fn test_failed_write_keeps_previous_snapshot() {
    let temp_dir = TempDir::new().unwrap();
    let (source, cache) = static_cache(&temp_dir, TWO_RELEASES);
    fs::write(cache.snapshot_path(), "[]").unwrap();

    // Occupy the temporary sibling so the write fails before the rename
    fs::create_dir(tmp_sibling(cache.snapshot_path())).unwrap();

    assert!(cache.refresh().await.is_err());
    assert_eq!(source.calls.load(Ordering::SeqCst), 1);
    assert_eq!(fs::read_to_string(cache.snapshot_path()).unwrap(), "[]");
    assert!(cache.get_available().is_empty());
    assert!(!cache.get_available().needs_refresh);
}

#[tokio::test]
async fn test_stable_designation_from_snapshot() {
    let temp_dir = TempDir::new().unwrap();
    let (_source, cache) = static_cache(&temp_dir, TWO_RELEASES);
    cache.refresh().await.unwrap();

    let catalog = cache.get_available();
    assert_eq!(catalog.len(), 3);
    assert_eq!(catalog.stable_tag(), Some("v3"));
    assert_eq!(catalog.get("stable").unwrap().tag, "v3");
    assert_eq!(catalog.get("v3").unwrap().tag, "v3");

    let rc = catalog.get("v4-rc").unwrap();
    assert!(rc.is_prerelease);
    assert_eq!(
        catalog.tags().filter(|tag| *tag == "v4-rc").count(),
        1,
        "prerelease must not be aliased"
    );
}

#[tokio::test(start_paused = true)]
async fn test_scheduler_refreshes_immediately_without_snapshot() {
    let temp_dir = TempDir::new().unwrap();
    let (_source, cache) = static_cache(&temp_dir, TWO_RELEASES);
    let cache = Arc::new(cache);
    let mut executor = TaskExecutor::new(
        tokio::runtime::Handle::current(),
        Arc::new(Metrics::new()),
    );

    let scheduler = cache.spawn_periodic(executor.invoker());
    tokio::time::sleep(Duration::from_millis(10)).await;

    // One RefreshReleases request queued (no handler registered, so ignored)
    assert_eq!(executor.pump(), 1);

    tokio::time::sleep(INTERVAL).await;
    assert_eq!(executor.pump(), 1);
    scheduler.abort();
}

#[tokio::test(start_paused = true)]
async fn test_scheduler_waits_for_fresh_snapshot() {
    let temp_dir = TempDir::new().unwrap();
    let (_source, cache) = static_cache(&temp_dir, TWO_RELEASES);
    fs::write(cache.snapshot_path(), TWO_RELEASES).unwrap();
    let cache = Arc::new(cache);
    let mut executor = TaskExecutor::new(
        tokio::runtime::Handle::current(),
        Arc::new(Metrics::new()),
    );

    let scheduler = cache.spawn_periodic(executor.invoker());
    tokio::time::sleep(Duration::from_secs(60)).await;

    assert_eq!(executor.pump(), 0);
    scheduler.abort();
}
