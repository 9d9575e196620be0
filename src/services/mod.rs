//! Services module - launcher versions, release listings and content packs.
//!
//! Nothing here knows about the command line or the foreground loop. Each
//! service owns one concern and reports failures as [`LauncherError`]:
//!
//! - [`ReleaseCache`]: fetches the release listing into an on-disk snapshot
//!   and answers "what can be installed" from it.
//! - [`VersionInstaller`]: downloads, verifies and installs launcher versions
//!   into per-tag directories, and removes them again.
//! - [`LoadOrderStore`]: the ordered list of enabled packs and its file.
//! - [`PackRegistry`]: pack directories on disk, their manifests, and keeping
//!   the load order in step with them.
//! - [`launch`]: running the external launcher process.
//! - [`PlaylunkyOptions`]: the launcher's own `playlunky.ini` settings.
//!
//! [`LauncherError`]: crate::error::LauncherError

pub mod installer;
pub mod launch;
pub mod load_order;
pub mod options;
pub mod pack_registry;
pub mod release_cache;

pub use installer::{
    Downloader, HttpDownloader, UninstallOutcome, VersionInstaller, parse_download_url,
};
pub use launch::LaunchSpec;
pub use load_order::LoadOrderStore;
pub use options::PlaylunkyOptions;
pub use pack_registry::{PackRegistry, ReconcileReport, RegistryEvent};
pub use release_cache::{HttpReleaseSource, RefreshOutcome, ReleaseCache, ReleaseSource};
