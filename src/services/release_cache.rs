use crate::atomic::{tmp_sibling, write_atomic};
use crate::error::{LauncherError, LauncherResult};
use crate::models::{LauncherConfig, Release, ReleaseAsset, ReleaseCatalog};
use crate::tasks::{TaskInvoker, TaskRequest};
use async_trait::async_trait;
use camino::{Utf8Path, Utf8PathBuf};
use serde_json::Value;
use std::collections::BTreeSet;
use std::fs;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

/// Slack subtracted from the refresh interval when judging snapshot age.
pub const REFRESH_SAFETY_MARGIN: Duration = Duration::from_secs(1);

/// Where the raw release listing comes from.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ReleaseSource: Send + Sync {
    /// Fetch the release listing body. Non-success responses are errors.
    async fn fetch(&self) -> LauncherResult<Vec<u8>>;
}

/// Release listing served over HTTP (GitHub releases API shape).
pub struct HttpReleaseSource {
    client: reqwest::Client,
    url: String,
}

impl HttpReleaseSource {
    pub fn new(client: reqwest::Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }
}

#[async_trait]
impl ReleaseSource for HttpReleaseSource {
    async fn fetch(&self) -> LauncherResult<Vec<u8>> {
        tracing::debug!("Fetching releases from {}", self.url);
        let response = self.client.get(&self.url).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(LauncherError::HttpStatus {
                url: self.url.clone(),
                status: status.as_u16(),
            });
        }

        Ok(response.bytes().await?.to_vec())
    }
}

/// Result of a refresh request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// The snapshot was replaced.
    Refreshed,
    /// Another refresh held the lock; nothing was done.
    AlreadyRunning,
}

/// On-disk snapshot of the remote release listing.
///
/// Owns the snapshot path, its source, the refresh lock and the refresh
/// interval. Share it behind an `Arc`.
pub struct ReleaseCache {
    snapshot_path: Utf8PathBuf,
    source: Arc<dyn ReleaseSource>,
    refresh_lock: Mutex<()>,
    interval: Duration,
}

impl ReleaseCache {
    pub fn new(
        snapshot_path: impl Into<Utf8PathBuf>,
        source: Arc<dyn ReleaseSource>,
        interval: Duration,
    ) -> Self {
        Self {
            snapshot_path: snapshot_path.into(),
            source,
            refresh_lock: Mutex::new(()),
            interval,
        }
    }

    /// Cache reading from `config.releases_url` over HTTP.
    pub fn from_config(config: &LauncherConfig, client: reqwest::Client) -> Self {
        Self::new(
            config.snapshot_path(),
            Arc::new(HttpReleaseSource::new(client, config.releases_url.clone())),
            config.refresh_interval(),
        )
    }

    pub fn snapshot_path(&self) -> &Utf8Path {
        &self.snapshot_path
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Fetch the listing and atomically replace the snapshot.
    ///
    /// Never waits for a running refresh: if one holds the lock this returns
    /// [`RefreshOutcome::AlreadyRunning`] without any I/O. On a fetch failure
    /// the previous snapshot is left untouched.
    pub async fn refresh(&self) -> LauncherResult<RefreshOutcome> {
        let Ok(_guard) = self.refresh_lock.try_lock() else {
            tracing::warn!("Attempted to refresh releases while another refresh is running");
            return Ok(RefreshOutcome::AlreadyRunning);
        };

        let body = match self.source.fetch().await {
            Ok(body) => body,
            Err(e) => {
                tracing::warn!("Failed to refresh releases, will try again later: {}", e);
                return Err(e);
            }
        };

        tracing::debug!(
            "Writing {} bytes to {}",
            body.len(),
            tmp_sibling(&self.snapshot_path)
        );
        write_atomic(&self.snapshot_path, &body)?;
        tracing::info!("Release snapshot updated at {}", self.snapshot_path);

        Ok(RefreshOutcome::Refreshed)
    }

    /// Releases advertised by the current snapshot.
    ///
    /// An absent snapshot gives an empty catalogue. An unreadable one gives an
    /// empty catalogue with `needs_refresh` set.
    pub fn get_available(&self) -> ReleaseCatalog {
        if !self.snapshot_path.exists() {
            return ReleaseCatalog::default();
        }

        let parsed = fs::read_to_string(&self.snapshot_path)
            .map_err(|e| LauncherError::io(&self.snapshot_path, e))
            .and_then(|contents| serde_json::from_str::<Value>(&contents).map_err(Into::into));

        let entries = match parsed {
            Ok(Value::Array(entries)) => entries,
            Ok(_) => {
                tracing::warn!("Release snapshot {} is not a list", self.snapshot_path);
                return ReleaseCatalog::stale();
            }
            Err(e) => {
                tracing::warn!("Failed to read cached releases: {}", e);
                return ReleaseCatalog::stale();
            }
        };

        ReleaseCatalog::from_releases(entries.iter().filter_map(parse_release))
    }

    /// Ordered version selector entries.
    pub fn version_choices(&self, installed: &BTreeSet<String>) -> Vec<String> {
        self.get_available().version_choices(installed)
    }

    /// How long to wait before the next refresh, or `None` if one is due.
    ///
    /// A snapshot younger than `interval - 1s` postpones the refresh until it
    /// reaches `interval`, which rate-limits across restarts.
    pub fn next_refresh_delay(&self) -> Option<Duration> {
        let modified = fs::metadata(&self.snapshot_path)
            .and_then(|meta| meta.modified())
            .ok()?;
        let age = SystemTime::now()
            .duration_since(modified)
            .unwrap_or(Duration::ZERO);

        if age < self.interval.saturating_sub(REFRESH_SAFETY_MARGIN) {
            Some(self.interval - age)
        } else {
            None
        }
    }

    /// Keep the snapshot fresh by posting refresh requests to the executor.
    ///
    /// The loop stops when the executor is gone.
    pub fn spawn_periodic(self: &Arc<Self>, invoker: TaskInvoker) -> JoinHandle<()> {
        let cache = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                let wait = match cache.next_refresh_delay() {
                    Some(delay) => {
                        tracing::debug!(
                            "Releases were retrieved too recently, retrying in {:.0}s",
                            delay.as_secs_f64()
                        );
                        delay
                    }
                    None => {
                        if !invoker.invoke(TaskRequest::RefreshReleases) {
                            break;
                        }
                        tracing::debug!(
                            "Scheduling next release refresh in {:.0}s",
                            cache.interval.as_secs_f64()
                        );
                        cache.interval
                    }
                };
                tokio::time::sleep(wait).await;
            }
            tracing::debug!("Release refresh scheduler stopped");
        })
    }

    /// Delete the snapshot. Returns `false` if there was none.
    pub fn clear(&self) -> LauncherResult<bool> {
        if !self.snapshot_path.exists() {
            return Ok(false);
        }
        fs::remove_file(&self.snapshot_path)
            .map_err(|e| LauncherError::io(&self.snapshot_path, e))?;
        tracing::info!("Removed release snapshot {}", self.snapshot_path);
        Ok(true)
    }
}

/// Keep entries carrying a string `tag_name` and a boolean `prerelease`.
fn parse_release(entry: &Value) -> Option<Release> {
    let tag = entry.get("tag_name")?.as_str()?;
    let is_prerelease = entry.get("prerelease")?.as_bool()?;

    let assets = entry
        .get("assets")
        .and_then(Value::as_array)
        .map(|assets| {
            assets
                .iter()
                .filter_map(|asset| {
                    Some(ReleaseAsset {
                        download_url: asset.get("browser_download_url")?.as_str()?.to_string(),
                        size_bytes: asset.get("size").and_then(Value::as_u64).unwrap_or(0),
                    })
                })
                .collect()
        })
        .unwrap_or_default();

    Some(Release {
        tag: tag.to_string(),
        is_prerelease,
        assets,
    })
}
