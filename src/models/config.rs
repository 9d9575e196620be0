use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Remote endpoint listing launcher releases (GitHub releases API shape).
pub const DEFAULT_RELEASES_URL: &str =
    "https://api.github.com/repos/spelunky-fyi/Playlunky/releases";

/// File name of the cached release snapshot inside the cache directory.
pub const RELEASES_SNAPSHOT_FILENAME: &str = "launcher-releases.json";

/// Launcher options file inside the install directory.
pub const OPTIONS_FILENAME: &str = "playlunky.ini";

/// Launcher settings from `packrun.yaml`.
///
/// Every field has a default so a missing or partial file still loads.
/// Environment variables prefixed with `PACKRUN_` override file values
/// (see [`crate::config::ConfigManager`]).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LauncherConfig {
    /// Game installation directory (contains `Mods/Packs`).
    #[serde(default)]
    pub install_dir: Utf8PathBuf,

    /// Root directory holding one sub-directory per installed launcher version.
    #[serde(default = "default_versions_dir")]
    pub versions_dir: Utf8PathBuf,

    /// Directory for the cached release snapshot.
    #[serde(default = "default_cache_dir")]
    pub cache_dir: Utf8PathBuf,

    /// Directory for rotating log files.
    #[serde(default = "default_log_dir")]
    pub log_dir: Utf8PathBuf,

    /// Tag selected for play: `stable`, `nightly` or a fixed release tag.
    #[serde(default)]
    pub selected_version: Option<String>,

    /// Pass `--console` to the launcher.
    #[serde(default)]
    pub console: bool,

    #[serde(default = "default_releases_url")]
    pub releases_url: String,

    #[serde(default = "default_refresh_interval_secs")]
    pub refresh_interval_secs: u64,

    /// Abort a release download after this many seconds.
    #[serde(default)]
    pub download_timeout_secs: Option<u64>,

    /// Kill the launcher process after this many seconds.
    #[serde(default)]
    pub launch_timeout_secs: Option<u64>,

    #[serde(default)]
    pub debug_mode: bool,
}

impl Default for LauncherConfig {
    fn default() -> Self {
        Self {
            install_dir: Utf8PathBuf::new(),
            versions_dir: default_versions_dir(),
            cache_dir: default_cache_dir(),
            log_dir: default_log_dir(),
            selected_version: None,
            console: false,
            releases_url: default_releases_url(),
            refresh_interval_secs: default_refresh_interval_secs(),
            download_timeout_secs: None,
            launch_timeout_secs: None,
            debug_mode: false,
        }
    }
}

impl LauncherConfig {
    /// Build a configuration rooted entirely under `root`.
    ///
    /// Used by tests and portable installs.
    pub fn rooted_at(root: &Utf8Path) -> Self {
        Self {
            install_dir: root.join("game"),
            versions_dir: root.join("versions"),
            cache_dir: root.join("cache"),
            log_dir: root.join("logs"),
            ..Self::default()
        }
    }

    pub fn packs_dir(&self) -> Utf8PathBuf {
        self.install_dir.join("Mods").join("Packs")
    }

    pub fn load_order_path(&self) -> Utf8PathBuf {
        self.packs_dir().join("load_order.txt")
    }

    pub fn pack_metadata_dir(&self) -> Utf8PathBuf {
        self.install_dir.join("Mods").join(".ml").join("pack-metadata")
    }

    /// Cache the launcher keeps inside the packs directory.
    pub fn pack_cache_dir(&self) -> Utf8PathBuf {
        self.packs_dir().join(".db")
    }

    /// Launcher options file, rewritten before every launch.
    pub fn options_path(&self) -> Utf8PathBuf {
        self.install_dir.join(OPTIONS_FILENAME)
    }

    pub fn snapshot_path(&self) -> Utf8PathBuf {
        self.cache_dir.join(RELEASES_SNAPSHOT_FILENAME)
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs)
    }

    pub fn download_timeout(&self) -> Option<Duration> {
        self.download_timeout_secs.map(Duration::from_secs)
    }

    pub fn launch_timeout(&self) -> Option<Duration> {
        self.launch_timeout_secs.map(Duration::from_secs)
    }

    /// Whether the game install directory has been configured.
    pub fn has_install_dir(&self) -> bool {
        !self.install_dir.as_str().is_empty()
    }
}

fn app_dir(base: Option<std::path::PathBuf>) -> Utf8PathBuf {
    base.and_then(|p| Utf8PathBuf::from_path_buf(p).ok())
        .unwrap_or_else(|| Utf8PathBuf::from("."))
        .join("packrun")
}

fn default_versions_dir() -> Utf8PathBuf {
    app_dir(dirs::data_dir()).join("versions")
}

fn default_cache_dir() -> Utf8PathBuf {
    app_dir(dirs::cache_dir())
}

fn default_log_dir() -> Utf8PathBuf {
    app_dir(dirs::data_local_dir()).join("logs")
}

fn default_releases_url() -> String {
    DEFAULT_RELEASES_URL.to_string()
}

fn default_refresh_interval_secs() -> u64 {
    30 * 60
}
