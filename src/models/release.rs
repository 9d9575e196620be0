use crate::error::{LauncherError, LauncherResult};
use camino::Utf8PathBuf;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Alias tag resolving to the newest non-prerelease.
pub const STABLE_TAG: &str = "stable";

/// Rolling tag published by the upstream project.
pub const NIGHTLY_TAG: &str = "nightly";

/// Tags that track upstream and may need self-updating.
pub fn is_tracking_tag(tag: &str) -> bool {
    tag == STABLE_TAG || tag == NIGHTLY_TAG
}

/// A downloadable file attached to a release.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseAsset {
    #[serde(rename = "browser_download_url")]
    pub download_url: String,

    #[serde(rename = "size", default)]
    pub size_bytes: u64,
}

/// One launcher release as found in the cached snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Release {
    #[serde(rename = "tag_name")]
    pub tag: String,

    #[serde(rename = "prerelease")]
    pub is_prerelease: bool,

    #[serde(default)]
    pub assets: Vec<ReleaseAsset>,
}

impl Release {
    /// The release's only asset.
    ///
    /// Releases are published with a single archive; anything else is
    /// rejected rather than guessed at.
    pub fn single_asset(&self) -> LauncherResult<&ReleaseAsset> {
        match self.assets.as_slice() {
            [asset] => Ok(asset),
            other => Err(LauncherError::Format(format!(
                "expected exactly one asset for {}, found {}",
                self.tag,
                other.len()
            ))),
        }
    }
}

/// A launcher version present on disk.
///
/// Only constructed for directories holding every required file plus the
/// version marker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstalledVersion {
    pub tag: String,
    pub directory: Utf8PathBuf,
    /// Contents of the version marker.
    pub version: String,
}

/// Releases available for installation, keyed by tag in snapshot order.
///
/// The first non-prerelease is additionally reachable under [`STABLE_TAG`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReleaseCatalog {
    releases: IndexMap<String, Release>,
    stable_tag: Option<String>,
    /// Set when the snapshot existed but could not be parsed.
    pub needs_refresh: bool,
}

impl ReleaseCatalog {
    /// Empty catalogue for a snapshot that exists but could not be parsed.
    pub fn stale() -> Self {
        Self {
            needs_refresh: true,
            ..Self::default()
        }
    }

    /// Build a catalogue from releases in snapshot order.
    pub fn from_releases(releases: impl IntoIterator<Item = Release>) -> Self {
        let mut catalog = Self::default();
        for release in releases {
            if catalog.stable_tag.is_none() && !release.is_prerelease {
                tracing::debug!("Marking {} as stable", release.tag);
                catalog.stable_tag = Some(release.tag.clone());
                catalog
                    .releases
                    .insert(STABLE_TAG.to_string(), release.clone());
            }
            catalog.releases.insert(release.tag.clone(), release);
        }
        catalog
    }

    pub fn get(&self, tag: &str) -> Option<&Release> {
        self.releases.get(tag)
    }

    pub fn contains(&self, tag: &str) -> bool {
        self.releases.contains_key(tag)
    }

    /// Tag of the release `stable` resolves to.
    pub fn stable_tag(&self) -> Option<&str> {
        self.stable_tag.as_deref()
    }

    pub fn is_empty(&self) -> bool {
        self.releases.is_empty()
    }

    pub fn len(&self) -> usize {
        self.releases.len()
    }

    /// Keys in snapshot order (including the `stable` alias).
    pub fn tags(&self) -> impl Iterator<Item = &str> {
        self.releases.keys().map(String::as_str)
    }

    /// Ordered list offered to the user when picking a version.
    ///
    /// `stable` and `nightly` come first, then every other advertised tag in
    /// snapshot order, then installed tags that are no longer advertised.
    pub fn version_choices(&self, installed: &BTreeSet<String>) -> Vec<String> {
        let mut choices = vec![STABLE_TAG.to_string(), NIGHTLY_TAG.to_string()];
        choices.extend(
            self.tags()
                .filter(|tag| !is_tracking_tag(tag))
                .map(str::to_string),
        );

        let orphans: Vec<String> = installed
            .iter()
            .filter(|tag| !choices.contains(tag))
            .cloned()
            .collect();
        choices.extend(orphans);
        choices
    }
}
