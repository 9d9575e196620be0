use crate::error::{LauncherError, LauncherResult};
use crate::models::release::is_tracking_tag;
use crate::models::{InstalledVersion, LauncherConfig, ReleaseCatalog};
use crate::tasks::guarded;
use async_trait::async_trait;
use camino::{Utf8Path, Utf8PathBuf};
use futures_util::StreamExt;
use std::collections::{BTreeSet, HashSet};
use std::fs::{self, File};
use std::io::{self, Cursor};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::watch;

pub const SPEL2_DLL: &str = "spel2.dll";
pub const PLAYLUNKY_DLL: &str = "playlunky64.dll";
pub const LAUNCHER_EXE: &str = "playlunky_launcher.exe";

/// Archive entries extracted on install; all must be present.
pub const REQUIRED_FILES: [&str; 3] = [SPEL2_DLL, PLAYLUNKY_DLL, LAUNCHER_EXE];

/// Marker holding the installed version string.
pub const VERSION_FILENAME: &str = "playlunky.version";

/// Progress is reported each time this many more bytes have arrived.
pub const PROGRESS_BLOCK_SIZE: u64 = 100 * 1024;

/// Upper bound on the buffer reserved up front for a download.
pub const MAX_PREALLOCATION: u64 = 64 * 1024 * 1024;

/// Split a release asset URL into `(version, extension)`.
///
/// The version is the token after the last `_` of the file stem and the
/// extension is lowercased without its dot:
/// `.../playlunky_nightly-2f9c.zip` gives `("nightly-2f9c", "zip")`.
pub fn parse_download_url(url: &str) -> LauncherResult<(String, String)> {
    let parsed = reqwest::Url::parse(url)
        .map_err(|e| LauncherError::Format(format!("invalid download URL {}: {}", url, e)))?;

    let file_name = parsed
        .path_segments()
        .and_then(|mut segments| segments.next_back())
        .unwrap_or_default();

    let (stem, extension) = match file_name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => (stem, ext.to_ascii_lowercase()),
        _ => (file_name, String::new()),
    };
    let version = stem.rsplit_once('_').map_or(stem, |(_, version)| version);

    Ok((version.to_string(), extension))
}

/// Fetches a release archive into memory.
#[async_trait]
pub trait Downloader: Send + Sync {
    /// Download `url`, calling `progress` with the cumulative byte count.
    async fn download(
        &self,
        url: &str,
        progress: &mut (dyn FnMut(u64) + Send),
    ) -> LauncherResult<Vec<u8>>;
}

/// Streaming HTTP downloader.
pub struct HttpDownloader {
    client: reqwest::Client,
}

impl HttpDownloader {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Downloader for HttpDownloader {
    async fn download(
        &self,
        url: &str,
        progress: &mut (dyn FnMut(u64) + Send),
    ) -> LauncherResult<Vec<u8>> {
        tracing::debug!("Downloading {}", url);
        let response = self.client.get(url).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(LauncherError::HttpStatus {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        // Content-Length is only a hint
        let capacity = response
            .content_length()
            .unwrap_or(0)
            .min(MAX_PREALLOCATION);
        let mut buffer = Vec::with_capacity(capacity as usize);
        let mut stream = response.bytes_stream();
        let mut reported: u64 = 0;

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| LauncherError::Network(e.to_string()))?;
            buffer.extend_from_slice(&chunk);

            let downloaded = buffer.len() as u64;
            if downloaded / PROGRESS_BLOCK_SIZE > reported / PROGRESS_BLOCK_SIZE {
                progress(downloaded);
                reported = downloaded;
            }
        }

        let downloaded = buffer.len() as u64;
        if downloaded != reported {
            progress(downloaded);
        }
        Ok(buffer)
    }
}

/// Result of [`VersionInstaller::uninstall`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UninstallOutcome {
    Removed,
    NotInstalled,
}

/// Installs launcher releases into `<versions_dir>/<tag>`.
///
/// Installs are staged in a hidden sibling directory and renamed into place,
/// so a version directory either holds every required file plus the marker
/// or does not exist. Operations on the same tag are mutually exclusive; a
/// second one is rejected rather than queued.
pub struct VersionInstaller {
    versions_dir: Utf8PathBuf,
    downloader: Arc<dyn Downloader>,
    download_timeout: Option<Duration>,
    busy_tags: Mutex<HashSet<String>>,
}

/// Releases a tag when the operation holding it ends.
struct TagGuard<'a> {
    busy_tags: &'a Mutex<HashSet<String>>,
    tag: String,
}

impl Drop for TagGuard<'_> {
    fn drop(&mut self) {
        self.busy_tags
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.tag);
    }
}

impl VersionInstaller {
    pub fn new(versions_dir: impl Into<Utf8PathBuf>, downloader: Arc<dyn Downloader>) -> Self {
        Self {
            versions_dir: versions_dir.into(),
            downloader,
            download_timeout: None,
            busy_tags: Mutex::new(HashSet::new()),
        }
    }

    pub fn from_config(config: &LauncherConfig, client: reqwest::Client) -> Self {
        Self::new(
            config.versions_dir.clone(),
            Arc::new(HttpDownloader::new(client)),
        )
        .with_download_timeout(config.download_timeout())
    }

    /// Abort downloads that take longer than `timeout`.
    pub fn with_download_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.download_timeout = timeout;
        self
    }

    pub fn versions_dir(&self) -> &Utf8Path {
        &self.versions_dir
    }

    pub fn version_dir(&self, tag: &str) -> Utf8PathBuf {
        self.versions_dir.join(tag)
    }

    fn staging_dir(&self, tag: &str) -> Utf8PathBuf {
        self.versions_dir.join(format!(".{}.partial", tag))
    }

    fn retired_dir(&self, tag: &str) -> Utf8PathBuf {
        self.versions_dir.join(format!(".{}.old", tag))
    }

    pub fn launcher_exe(&self, tag: &str) -> Utf8PathBuf {
        self.version_dir(tag).join(LAUNCHER_EXE)
    }

    fn lock_tag(&self, tag: &str) -> LauncherResult<TagGuard<'_>> {
        let mut busy = self
            .busy_tags
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if !busy.insert(tag.to_string()) {
            return Err(LauncherError::ConcurrencyGuard(format!(
                "An install or uninstall of {}",
                tag
            )));
        }
        Ok(TagGuard {
            busy_tags: &self.busy_tags,
            tag: tag.to_string(),
        })
    }

    /// Download `url` and install it as `tag`.
    ///
    /// Fails with a format error before touching the disk or network when
    /// the URL does not name a `.zip`. `progress` receives cumulative byte
    /// counts. Any failure leaves the previous install (if any) in place.
    pub async fn install(
        &self,
        tag: &str,
        url: &str,
        mut progress: impl FnMut(u64) + Send,
        mut cancel: watch::Receiver<bool>,
    ) -> LauncherResult<InstalledVersion> {
        let _guard = self.lock_tag(tag)?;
        validate_tag(tag)?;

        let (version, extension) = parse_download_url(url)?;
        if extension != "zip" {
            return Err(LauncherError::Format(format!(
                "Expected .zip but found {:?} in {}",
                extension, url
            )));
        }

        let bytes = guarded(
            self.downloader.download(url, &mut progress),
            self.download_timeout,
            &mut cancel,
        )
        .await?;
        tracing::info!("Downloaded {} bytes for {}", bytes.len(), tag);

        let staging = self.staging_dir(tag);
        let target = self.version_dir(tag);
        let retired = self.retired_dir(tag);
        let marker_version = version.clone();

        let committed = tokio::task::spawn_blocking(move || {
            let result = stage_archive(bytes, &marker_version, &staging)
                .and_then(|()| commit_staged(&staging, &target, &retired));
            if result.is_err() && staging.exists() {
                let _ = fs::remove_dir_all(&staging);
            }
            result
        })
        .await
        .map_err(|e| LauncherError::Panicked(e.to_string()))?;
        committed?;

        tracing::info!("Installed {} (version {})", tag, version);
        Ok(InstalledVersion {
            tag: tag.to_string(),
            directory: self.version_dir(tag),
            version,
        })
    }

    /// Remove an installed version.
    ///
    /// A missing directory is logged and treated as a no-op. Anything besides
    /// the installed files left in the directory makes this fail.
    pub fn uninstall(&self, tag: &str) -> LauncherResult<UninstallOutcome> {
        let _guard = self.lock_tag(tag)?;
        validate_tag(tag)?;

        let dir = self.version_dir(tag);
        if !dir.exists() {
            let err = LauncherError::Filesystem {
                path: dir,
                reason: "version is not installed".to_string(),
            };
            tracing::warn!("Nothing to uninstall: {}", err);
            return Ok(UninstallOutcome::NotInstalled);
        }

        tracing::info!("Removing launcher version {}", tag);
        for name in REQUIRED_FILES.iter().chain([&VERSION_FILENAME]) {
            let path = dir.join(name);
            match fs::remove_file(&path) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(LauncherError::io(path, e)),
            }
        }

        fs::remove_dir(&dir).map_err(|e| LauncherError::Filesystem {
            path: dir.clone(),
            reason: format!("could not remove version directory: {}", e),
        })?;

        Ok(UninstallOutcome::Removed)
    }

    /// Whether every required file plus the marker is present.
    pub fn is_installed(&self, tag: &str) -> bool {
        if validate_tag(tag).is_err() {
            return false;
        }
        let dir = self.version_dir(tag);
        REQUIRED_FILES
            .iter()
            .chain([&VERSION_FILENAME])
            .all(|name| dir.join(name).is_file())
    }

    /// Version string from the marker, if present.
    pub fn installed_version(&self, tag: &str) -> Option<String> {
        let marker = self.version_dir(tag).join(VERSION_FILENAME);
        fs::read_to_string(marker)
            .ok()
            .map(|contents| contents.trim().to_string())
    }

    pub fn installed(&self, tag: &str) -> Option<InstalledVersion> {
        if !self.is_installed(tag) {
            return None;
        }
        Some(InstalledVersion {
            tag: tag.to_string(),
            directory: self.version_dir(tag),
            version: self.installed_version(tag)?,
        })
    }

    /// Tags with a complete install.
    pub fn installed_tags(&self) -> BTreeSet<String> {
        let Ok(entries) = self.versions_dir.read_dir_utf8() else {
            return BTreeSet::new();
        };

        entries
            .filter_map(Result::ok)
            .map(|entry| entry.file_name().to_string())
            .filter(|name| !name.starts_with('.'))
            .filter(|name| self.is_installed(name))
            .collect()
    }

    /// Whether a tracking tag (`stable`/`nightly`) is behind the catalogue.
    ///
    /// Fixed tags never self-update. A missing marker counts as outdated.
    pub fn needs_update(&self, tag: &str, catalog: &ReleaseCatalog) -> bool {
        if !is_tracking_tag(tag) {
            return false;
        }

        let Some(release) = catalog.get(tag) else {
            tracing::debug!("{} is not advertised, keeping installed copy", tag);
            return false;
        };
        let advertised = match release
            .single_asset()
            .and_then(|asset| parse_download_url(&asset.download_url))
        {
            Ok((version, _)) => version,
            Err(e) => {
                tracing::warn!("Cannot determine advertised version of {}: {}", tag, e);
                return false;
            }
        };

        match self.installed_version(tag) {
            None => {
                tracing::info!("No version info for {}. Updating to latest.", tag);
                true
            }
            Some(installed) if installed != advertised => {
                tracing::info!(
                    "New version of {} available ({} -> {})",
                    tag,
                    installed,
                    advertised
                );
                true
            }
            Some(_) => false,
        }
    }
}

/// Tags become directory names; refuse anything else.
fn validate_tag(tag: &str) -> LauncherResult<()> {
    if tag.is_empty()
        || tag.starts_with('.')
        || tag.contains(['/', '\\', ':'])
        || Utf8Path::new(tag).is_absolute()
    {
        return Err(LauncherError::Format(format!(
            "{:?} is not a valid version tag",
            tag
        )));
    }
    Ok(())
}

/// Extract the allow-listed entries and write the marker into `staging`.
fn stage_archive(bytes: Vec<u8>, version: &str, staging: &Utf8Path) -> LauncherResult<()> {
    if staging.exists() {
        fs::remove_dir_all(staging).map_err(|e| LauncherError::io(staging, e))?;
    }
    fs::create_dir_all(staging).map_err(|e| LauncherError::io(staging, e))?;

    let mut archive = zip::ZipArchive::new(Cursor::new(bytes))?;
    let mut extracted = BTreeSet::new();

    for index in 0..archive.len() {
        let mut entry = archive.by_index(index)?;
        if entry.is_dir() {
            continue;
        }
        let Some(name) = REQUIRED_FILES
            .iter()
            .find(|name| entry.name() == **name)
            .copied()
        else {
            continue;
        };

        let dest = staging.join(name);
        let mut out = File::create(&dest).map_err(|e| LauncherError::io(&dest, e))?;
        io::copy(&mut entry, &mut out).map_err(|e| LauncherError::io(&dest, e))?;
        extracted.insert(name);
    }

    let missing: Vec<&str> = REQUIRED_FILES
        .iter()
        .filter(|name| !extracted.contains(*name))
        .copied()
        .collect();
    if !missing.is_empty() {
        return Err(LauncherError::Format(format!(
            "archive is missing {}",
            missing.join(", ")
        )));
    }

    let marker = staging.join(VERSION_FILENAME);
    tracing::debug!("Writing version to {}", marker);
    fs::write(&marker, version).map_err(|e| LauncherError::io(&marker, e))
}

/// Move a complete staging directory into place, replacing `target`.
fn commit_staged(staging: &Utf8Path, target: &Utf8Path, retired: &Utf8Path) -> LauncherResult<()> {
    if retired.exists() {
        fs::remove_dir_all(retired).map_err(|e| LauncherError::io(retired, e))?;
    }
    if target.exists() {
        fs::rename(target, retired).map_err(|e| LauncherError::io(target, e))?;
    }

    if let Err(e) = fs::rename(staging, target) {
        // Put the previous install back
        if retired.exists() {
            let _ = fs::rename(retired, target);
        }
        return Err(LauncherError::io(target, e));
    }

    if retired.exists() {
        if let Err(e) = fs::remove_dir_all(retired) {
            tracing::warn!("Failed to clean up {}: {}", retired, e);
        }
    }
    Ok(())
}
