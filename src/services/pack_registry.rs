use crate::error::{LauncherError, LauncherResult};
use crate::models::{LauncherConfig, Pack, PackFilter, PackManifest};
use crate::services::load_order::LoadOrderStore;
use camino::{Utf8Path, Utf8PathBuf};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use tokio::sync::broadcast;

/// File name of the optional per-pack manifest.
pub const MANIFEST_FILENAME: &str = "manifest.json";

/// Pack lifecycle notifications for display refreshes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RegistryEvent {
    PackCreated { identifier: String },
    PackDestroyed { identifier: String },
    PackToggled { identifier: String, enabled: bool },
}

/// Identifiers added and removed by one [`PackRegistry::reconcile`] call.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub added: Vec<String>,
    pub removed: Vec<String>,
}

impl ReconcileReport {
    pub fn is_unchanged(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

#[derive(Clone, Debug)]
struct PackRecord {
    display_name: String,
    logo_path: Option<Utf8PathBuf>,
}

/// Packs currently present under `Mods/Packs`, with their metadata.
///
/// A record exists only for a directory that was discovered on disk.
pub struct PackRegistry {
    packs_dir: Utf8PathBuf,
    metadata_dir: Utf8PathBuf,
    cache_dir: Utf8PathBuf,
    records: BTreeMap<String, PackRecord>,
    events: broadcast::Sender<RegistryEvent>,
}

impl PackRegistry {
    pub fn new(
        packs_dir: impl Into<Utf8PathBuf>,
        metadata_dir: impl Into<Utf8PathBuf>,
        cache_dir: impl Into<Utf8PathBuf>,
    ) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            packs_dir: packs_dir.into(),
            metadata_dir: metadata_dir.into(),
            cache_dir: cache_dir.into(),
            records: BTreeMap::new(),
            events,
        }
    }

    pub fn from_config(config: &LauncherConfig) -> Self {
        Self::new(
            config.packs_dir(),
            config.pack_metadata_dir(),
            config.pack_cache_dir(),
        )
    }

    pub fn packs_dir(&self) -> &Utf8Path {
        &self.packs_dir
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RegistryEvent> {
        self.events.subscribe()
    }

    /// Create the packs and metadata directories if missing.
    pub fn make_dirs(&self) -> LauncherResult<()> {
        for dir in [&self.packs_dir, &self.metadata_dir] {
            fs::create_dir_all(dir).map_err(|e| LauncherError::io(dir.as_path(), e))?;
        }
        Ok(())
    }

    /// Pack directory names on disk, skipping hidden entries and files.
    pub fn discover(&self) -> LauncherResult<BTreeSet<String>> {
        let mut found = BTreeSet::new();
        if !self.packs_dir.exists() {
            tracing::debug!("Packs directory {} does not exist", self.packs_dir);
            return Ok(found);
        }

        let entries = self
            .packs_dir
            .read_dir_utf8()
            .map_err(|e| LauncherError::io(&self.packs_dir, e))?;

        for entry in entries {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    tracing::warn!("Skipping unreadable entry in {}: {}", self.packs_dir, e);
                    continue;
                }
            };
            let name = entry.file_name();
            if name.starts_with('.') {
                continue;
            }
            if !entry.path().is_dir() {
                continue;
            }
            found.insert(name.to_string());
        }

        Ok(found)
    }

    /// Open the load order for the packs currently on disk.
    ///
    /// Reconciles the registry, then loads `load_order.txt` against the
    /// discovered set and persists it so the file lists every pack.
    pub fn open_store(&mut self, path: impl Into<Utf8PathBuf>) -> LauncherResult<LoadOrderStore> {
        let discovered = self.discover()?;
        let mut store = LoadOrderStore::load(path, discovered)?;
        self.reconcile(&mut store)?;
        store.persist()?;
        Ok(store)
    }

    /// Bring the registry and `store` in line with the filesystem.
    ///
    /// Creates a record for every new directory and tears down every record
    /// whose directory vanished (removing it from the load order). Manifests
    /// of surviving packs are reloaded. A second call with an unchanged
    /// filesystem reports no changes and emits no events.
    pub fn reconcile(&mut self, store: &mut LoadOrderStore) -> LauncherResult<ReconcileReport> {
        let found = self.discover()?;
        let current: BTreeSet<String> = self.records.keys().cloned().collect();

        let report = ReconcileReport {
            added: found.difference(&current).cloned().collect(),
            removed: current.difference(&found).cloned().collect(),
        };

        for identifier in &report.removed {
            self.records.remove(identifier);
            store.forget(identifier)?;
            tracing::info!("Pack removed: {}", identifier);
            let _ = self.events.send(RegistryEvent::PackDestroyed {
                identifier: identifier.clone(),
            });
        }

        for identifier in &report.added {
            tracing::info!("Pack discovered: {}", identifier);
            let _ = self.events.send(RegistryEvent::PackCreated {
                identifier: identifier.clone(),
            });
        }

        for identifier in &found {
            let record = self.load_record(identifier);
            self.records.insert(identifier.clone(), record);
        }

        if store.known() != &found {
            store.set_known(found)?;
        } else if !store.path().exists() {
            store.persist()?;
        }

        Ok(report)
    }

    fn load_record(&self, identifier: &str) -> PackRecord {
        let metadata_dir = self.metadata_dir.join(identifier);
        let manifest = read_manifest(&metadata_dir.join(MANIFEST_FILENAME));

        let logo_path = manifest
            .logo
            .as_deref()
            .filter(|logo| !logo.is_empty())
            .map(|logo| metadata_dir.join(logo))
            .filter(|path| path.exists());

        PackRecord {
            display_name: manifest.name.unwrap_or_else(|| identifier.to_string()),
            logo_path,
        }
    }

    pub fn contains(&self, identifier: &str) -> bool {
        self.records.contains_key(identifier)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Enable or disable a pack: one store mutation, and one toggle event
    /// when the flag actually changed.
    pub fn set_enabled(
        &self,
        identifier: &str,
        enabled: bool,
        store: &mut LoadOrderStore,
    ) -> LauncherResult<bool> {
        if !self.contains(identifier) {
            return Err(LauncherError::Filesystem {
                path: self.packs_dir.join(identifier),
                reason: "no such pack".to_string(),
            });
        }

        let changed = if enabled {
            store.insert(identifier)?
        } else {
            store.delete(identifier)?
        };

        if changed {
            let _ = self.events.send(RegistryEvent::PackToggled {
                identifier: identifier.to_string(),
                enabled,
            });
        }
        Ok(changed)
    }

    pub fn get(&self, identifier: &str, store: &LoadOrderStore) -> Option<Pack> {
        self.records
            .get(identifier)
            .map(|record| build_pack(identifier, record, store))
    }

    /// All packs sorted by display name.
    pub fn packs(&self, store: &LoadOrderStore) -> Vec<Pack> {
        let mut packs: Vec<Pack> = self
            .records
            .iter()
            .map(|(identifier, record)| build_pack(identifier, record, store))
            .collect();
        packs.sort_by(|a, b| {
            a.display_name
                .cmp(&b.display_name)
                .then_with(|| a.identifier.cmp(&b.identifier))
        });
        packs
    }

    /// Packs matching `filter`, sorted by display name.
    pub fn filter(&self, store: &LoadOrderStore, filter: &PackFilter) -> Vec<Pack> {
        self.packs(store)
            .into_iter()
            .filter(|pack| filter.matches(pack))
            .collect()
    }

    /// Directory that [`remove_pack`](Self::remove_pack) would delete, if it exists.
    pub fn removal_target(&self, identifier: &str) -> LauncherResult<Option<Utf8PathBuf>> {
        validate_identifier(identifier)?;
        let pack_dir = self.packs_dir.join(identifier);
        Ok(pack_dir.exists().then_some(pack_dir))
    }

    /// Delete a pack's directory and reconcile.
    ///
    /// The caller is responsible for confirming with the user first.
    /// Returns `false` when there was nothing to remove.
    pub fn remove_pack(
        &mut self,
        identifier: &str,
        store: &mut LoadOrderStore,
    ) -> LauncherResult<bool> {
        let Some(pack_dir) = self.removal_target(identifier)? else {
            tracing::info!(
                "No pack directory found to remove. Looked in {}",
                self.packs_dir.join(identifier)
            );
            return Ok(false);
        };

        fs::remove_dir_all(&pack_dir).map_err(|e| LauncherError::io(&pack_dir, e))?;
        tracing::info!("Removed pack directory {}", pack_dir);

        self.reconcile(store)?;
        Ok(true)
    }

    pub fn pack_cache_dir(&self) -> &Utf8Path {
        &self.cache_dir
    }

    /// Remove the launcher's pack cache directory.
    ///
    /// Destructive; callers confirm first. Returns `false` if absent.
    pub fn clear_pack_cache(&self) -> LauncherResult<bool> {
        if !self.cache_dir.exists() {
            tracing::info!(
                "No cache directory found to remove. Looked in {}",
                self.cache_dir
            );
            return Ok(false);
        }

        fs::remove_dir_all(&self.cache_dir).map_err(|e| LauncherError::io(&self.cache_dir, e))?;
        tracing::info!("Removed pack cache {}", self.cache_dir);
        Ok(true)
    }
}

fn build_pack(identifier: &str, record: &PackRecord, store: &LoadOrderStore) -> Pack {
    let position = store.position(identifier);
    Pack {
        identifier: identifier.to_string(),
        display_name: record.display_name.clone(),
        enabled: position.is_some(),
        position,
        logo_path: record.logo_path.clone(),
    }
}

/// Parse a manifest, falling back to defaults when absent or malformed.
fn read_manifest(path: &Utf8Path) -> PackManifest {
    if !path.exists() {
        return PackManifest::default();
    }

    let parsed = fs::read_to_string(path)
        .map_err(|e| LauncherError::io(path, e))
        .and_then(|contents| serde_json::from_str(&contents).map_err(LauncherError::from));

    match parsed {
        Ok(manifest) => manifest,
        Err(e) => {
            tracing::warn!("Ignoring unreadable manifest {}: {}", path, e);
            PackManifest::default()
        }
    }
}

/// Reject identifiers that could address anything but a direct child of
/// the packs directory.
fn validate_identifier(identifier: &str) -> LauncherResult<()> {
    let dangerous = identifier.is_empty()
        || identifier == "."
        || identifier == ".."
        || identifier.contains(['/', '\\'])
        || Utf8Path::new(identifier).is_absolute()
        || identifier.contains(':');

    if dangerous {
        tracing::warn!("Got dangerous pack name {:?}, aborting", identifier);
        return Err(LauncherError::Filesystem {
            path: Utf8PathBuf::from(identifier),
            reason: "pack identifier must be a plain directory name".to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    struct Fixture {
        _temp_dir: TempDir,
        root: Utf8PathBuf,
        registry: PackRegistry,
    }

    fn fixture(packs: &[&str]) -> Fixture {
        let temp_dir = TempDir::new().unwrap();
        let root = Utf8PathBuf::try_from(temp_dir.path().to_path_buf()).unwrap();
        let config = LauncherConfig::rooted_at(&root);
        for pack in packs {
            fs::create_dir_all(config.packs_dir().join(pack)).unwrap();
        }
        Fixture {
            _temp_dir: temp_dir,
            registry: PackRegistry::from_config(&config),
            root,
        }
    }

    #[test]
    fn test_discover_skips_hidden_and_files() {
        let fx = fixture(&["b", "a", ".db"]);
        fs::write(fx.registry.packs_dir().join("load_order.txt"), "").unwrap();

        let found = fx.registry.discover().unwrap();
        assert_eq!(found.into_iter().collect::<Vec<_>>(), vec!["a", "b"]);
    }

    #[test]
    fn test_discover_missing_dir_is_empty() {
        let temp_dir = TempDir::new().unwrap();
        let root = Utf8PathBuf::try_from(temp_dir.path().to_path_buf()).unwrap();
        let registry = PackRegistry::from_config(&LauncherConfig::rooted_at(&root));
        assert!(registry.discover().unwrap().is_empty());
    }

    #[test]
    fn test_manifest_name_and_logo() {
        let mut fx = fixture(&["jungle"]);
        let meta = fx.root.join("game/Mods/.ml/pack-metadata/jungle");
        fs::create_dir_all(&meta).unwrap();
        fs::write(
            meta.join(MANIFEST_FILENAME),
            r#"{"name": "Jungle Overhaul", "logo": "logo.png"}"#,
        )
        .unwrap();
        fs::write(meta.join("logo.png"), b"png").unwrap();

        let mut store = LoadOrderStore::new(fx.root.join("game/Mods/Packs/load_order.txt"));
        fx.registry.reconcile(&mut store).unwrap();

        let pack = fx.registry.get("jungle", &store).unwrap();
        assert_eq!(pack.display_name, "Jungle Overhaul");
        assert_eq!(pack.logo_path, Some(meta.join("logo.png")));
        assert!(!pack.enabled);
    }

    #[test]
    fn test_malformed_manifest_falls_back() {
        let mut fx = fixture(&["broken"]);
        let meta = fx.root.join("game/Mods/.ml/pack-metadata/broken");
        fs::create_dir_all(&meta).unwrap();
        fs::write(meta.join(MANIFEST_FILENAME), "{not json").unwrap();

        let mut store = LoadOrderStore::new(fx.root.join("game/Mods/Packs/load_order.txt"));
        fx.registry.reconcile(&mut store).unwrap();

        let pack = fx.registry.get("broken", &store).unwrap();
        assert_eq!(pack.display_name, "broken");
        assert!(pack.logo_path.is_none());
    }

    #[test]
    fn test_set_enabled_unknown_pack_fails() {
        let fx = fixture(&[]);
        let mut store = LoadOrderStore::new(fx.root.join("load_order.txt"));
        assert!(fx.registry.set_enabled("ghost", true, &mut store).is_err());
    }

    #[test]
    fn test_dangerous_identifiers_rejected() {
        for id in ["", "..", "/etc", "../outside", "a/b", "a\\b", "C:evil"] {
            assert!(validate_identifier(id).is_err(), "accepted {:?}", id);
        }
        assert!(validate_identifier("My Pack").is_ok());
        assert!(validate_identifier("pack..v2").is_ok());
    }

    #[test]
    fn test_clear_pack_cache() {
        let fx = fixture(&[".db"]);
        fs::write(fx.registry.pack_cache_dir().join("cache.bin"), b"x").unwrap();

        assert!(fx.registry.clear_pack_cache().unwrap());
        assert!(!fx.registry.pack_cache_dir().exists());
        assert!(!fx.registry.clear_pack_cache().unwrap());
    }
}
