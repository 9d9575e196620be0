//! Data models for the packrun launcher.
//!
//! This module contains the core data structures used throughout the crate:
//! - [`LauncherState`]: Observable front-end state (busy operation, download progress, selection)
//! - [`LauncherConfig`]: Paths and preferences loaded from `packrun.yaml`
//! - [`Release`] / [`ReleaseCatalog`]: Launcher releases parsed from the cached snapshot
//! - [`Pack`] / [`PackManifest`]: Content packs discovered under `Mods/Packs`
//!
//! # Architecture Note
//!
//! The models are designed to be:
//! - **Serializable**: Config and snapshot structs derive `Serialize`/`Deserialize`
//! - **Cloneable**: LauncherState is wrapped in `Arc<RwLock<>>` by [`StateManager`](crate::state::StateManager)
//! - **Passive**: Filesystem and network effects live in [`crate::services`]

pub mod app_state;
pub mod config;
pub mod pack;
pub mod release;

pub use app_state::{DownloadProgress, LauncherState, Operation};
pub use config::LauncherConfig;
pub use pack::{Pack, PackFilter, PackManifest, SelectionFilter};
pub use release::{InstalledVersion, NIGHTLY_TAG, Release, ReleaseAsset, ReleaseCatalog, STABLE_TAG};
