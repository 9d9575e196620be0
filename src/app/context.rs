// AppContext - the owned state shared by task handlers and the command line
//
// Everything the launcher needs lives here instead of in globals: the
// configuration, the observable state, and the services. Task handlers hold
// an `Arc<AppContext>`, so every field is `Send + Sync`.

use crate::config::ConfigManager;
use crate::error::{LauncherError, LauncherResult};
use crate::metrics::Metrics;
use crate::models::{LauncherConfig, Operation, Pack, PackFilter};
use crate::services::launch::{self, LaunchSpec};
use crate::services::{
    LoadOrderStore, PackRegistry, PlaylunkyOptions, ReconcileReport, RegistryEvent, ReleaseCache,
    VersionInstaller,
};
use crate::state::StateManager;
use crate::tasks::{TaskInvoker, TaskOutcome, TaskRequest};
use camino::Utf8PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use tokio::sync::broadcast::{self, error::TryRecvError};

/// Direction for reordering an enabled pack.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MoveDirection {
    Up,
    Down,
}

struct PackSet {
    registry: PackRegistry,
    store: LoadOrderStore,
}

pub struct AppContext {
    config_manager: ConfigManager,
    config: RwLock<LauncherConfig>,
    state: StateManager,
    releases: Arc<ReleaseCache>,
    installer: Arc<VersionInstaller>,
    packs: Mutex<PackSet>,
    options: Mutex<PlaylunkyOptions>,
    registry_events: Mutex<broadcast::Receiver<RegistryEvent>>,
    metrics: Arc<Metrics>,
}

impl AppContext {
    /// Wire the context from configuration, talking to the network over HTTP.
    pub fn from_config(
        config_manager: ConfigManager,
        config: LauncherConfig,
        metrics: Arc<Metrics>,
    ) -> LauncherResult<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()?;
        let releases = Arc::new(ReleaseCache::from_config(&config, client.clone()));
        let installer = Arc::new(VersionInstaller::from_config(&config, client));
        Self::new(config_manager, config, releases, installer, metrics)
    }

    /// Wire the context around already-built services.
    ///
    /// Opens the load order when an install directory is configured.
    pub fn new(
        config_manager: ConfigManager,
        config: LauncherConfig,
        releases: Arc<ReleaseCache>,
        installer: Arc<VersionInstaller>,
        metrics: Arc<Metrics>,
    ) -> LauncherResult<Self> {
        let mut registry = PackRegistry::from_config(&config);
        let registry_events = registry.subscribe();

        let (store, options) = if config.has_install_dir() {
            registry.make_dirs()?;
            (
                registry.open_store(config.load_order_path())?,
                PlaylunkyOptions::load(&config.options_path()),
            )
        } else {
            tracing::warn!("No install directory configured, pack management is disabled");
            (
                LoadOrderStore::new(config.load_order_path()),
                PlaylunkyOptions::default(),
            )
        };

        let state = StateManager::new();
        state.select_version(config.selected_version.clone());
        state.set_load_order(store.enabled().to_vec(), store.known().len());

        let ctx = Self {
            config_manager,
            config: RwLock::new(config),
            state,
            releases,
            installer,
            packs: Mutex::new(PackSet { registry, store }),
            options: Mutex::new(options),
            registry_events: Mutex::new(registry_events),
            metrics,
        };
        ctx.refresh_versions();
        ctx.state.finish_operation();
        Ok(ctx)
    }

    pub fn state(&self) -> &StateManager {
        &self.state
    }

    pub fn releases(&self) -> &Arc<ReleaseCache> {
        &self.releases
    }

    pub fn installer(&self) -> &Arc<VersionInstaller> {
        &self.installer
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    /// Copy of the current configuration.
    pub fn config(&self) -> LauncherConfig {
        self.config
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Recompute the version selector from the snapshot and the disk.
    pub fn refresh_versions(&self) {
        let installed = self.installer.installed_tags();
        let choices = self.releases.version_choices(&installed);
        tracing::debug!(
            "{} version choices, {} installed",
            choices.len(),
            installed.len()
        );
        self.state.set_versions(choices, installed);
    }

    /// Select `tag` for play and save it to the config file.
    pub fn select_version(&self, tag: &str) -> LauncherResult<()> {
        let known = self.state.read(|s| s.version_choices.iter().any(|c| c == tag));
        if !known {
            return Err(LauncherError::UnknownRelease(tag.to_string()));
        }

        let snapshot = {
            let mut config = self.config.write().unwrap_or_else(PoisonError::into_inner);
            config.selected_version = Some(tag.to_string());
            config.clone()
        };
        self.config_manager
            .save(&snapshot)
            .map_err(|e| LauncherError::Config(format!("{:#}", e)))?;

        tracing::info!("Selected launcher version {}", tag);
        self.state.select_version(Some(tag.to_string()));
        Ok(())
    }

    /// Selected tag, falling back to the first choice (and saving it).
    fn selected_or_default(&self) -> LauncherResult<String> {
        if let Some(tag) = self.config().selected_version {
            return Ok(tag);
        }
        let first = self.state.read(|s| s.version_choices.first().cloned());
        let Some(tag) = first else {
            return Err(LauncherError::UnknownRelease(
                "any version (refresh the release list first)".to_string(),
            ));
        };
        tracing::info!("No version selected, defaulting to {}", tag);
        self.select_version(&tag)?;
        Ok(tag)
    }

    /// Start installing `tag` from its advertised asset.
    pub fn request_install(
        &self,
        tag: &str,
        launch: bool,
        invoker: &TaskInvoker,
    ) -> LauncherResult<()> {
        let catalog = self.releases.get_available();
        if catalog.needs_refresh {
            tracing::warn!("Release snapshot is unreadable, requesting a refresh");
            invoker.invoke(TaskRequest::RefreshReleases);
        }

        let release = catalog
            .get(tag)
            .ok_or_else(|| LauncherError::UnknownRelease(tag.to_string()))?;
        let asset = release.single_asset()?;

        self.state.begin_operation(Operation::Installing {
            tag: tag.to_string(),
        });
        let total = (asset.size_bytes > 0).then_some(asset.size_bytes);
        self.state.update_download(tag, 0, total);

        invoker.invoke(TaskRequest::Install {
            tag: tag.to_string(),
            url: asset.download_url.clone(),
            launch,
        });
        Ok(())
    }

    /// Start removing an installed version. Callers confirm first.
    pub fn request_uninstall(&self, tag: &str, invoker: &TaskInvoker) {
        self.state.begin_operation(Operation::Uninstalling {
            tag: tag.to_string(),
        });
        invoker.invoke(TaskRequest::Uninstall {
            tag: tag.to_string(),
        });
    }

    /// The play flow.
    ///
    /// Installs the selected version first when it is missing or out of date
    /// (launching once the install finishes); otherwise prepares the game
    /// directory and starts the launcher.
    pub fn play(&self, invoker: &TaskInvoker) -> LauncherResult<TaskOutcome> {
        let tag = self.selected_or_default()?;
        self.state.update(|s| s.play_enabled = false);

        if !self.installer.is_installed(&tag) {
            tracing::info!("{} is not installed, installing before launch", tag);
            self.request_install(&tag, true, invoker)?;
            return Ok(TaskOutcome::Done);
        }

        let catalog = self.releases.get_available();
        if catalog.needs_refresh {
            invoker.invoke(TaskRequest::RefreshReleases);
        }
        if self.installer.needs_update(&tag, &catalog) {
            tracing::info!("New version of {} available, updating", tag);
            self.request_install(&tag, true, invoker)?;
            return Ok(TaskOutcome::Done);
        }

        let spec = self.prepare_launch(&tag)?;
        self.state.begin_operation(Operation::Launching { tag: tag.clone() });
        self.state.set_launcher_running(true);
        invoker.invoke(TaskRequest::Launch { tag, spec });
        Ok(TaskOutcome::Done)
    }

    /// Write the files the launcher reads and build its command line.
    pub fn prepare_launch(&self, tag: &str) -> LauncherResult<LaunchSpec> {
        let config = self.config();
        if !config.has_install_dir() {
            return Err(LauncherError::Config(
                "install_dir is not configured".to_string(),
            ));
        }

        launch::write_steam_appid(&config.install_dir)?;
        self.lock_options().save(&config.options_path())?;
        self.lock_packs().store.persist()?;

        Ok(LaunchSpec::new(
            self.installer.launcher_exe(tag),
            config.install_dir,
            config.console,
        ))
    }

    fn lock_packs(&self) -> MutexGuard<'_, PackSet> {
        self.packs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_options(&self) -> MutexGuard<'_, PlaylunkyOptions> {
        self.options.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Copy of the launcher options.
    pub fn options(&self) -> PlaylunkyOptions {
        self.lock_options().clone()
    }

    /// Change one launcher option and write `playlunky.ini`.
    ///
    /// The in-memory options change only once the file is written.
    pub fn set_option(&self, option: &str, value: bool) -> LauncherResult<bool> {
        let config = self.config();
        if !config.has_install_dir() {
            return Err(LauncherError::Config(
                "install_dir is not configured".to_string(),
            ));
        }

        let mut options = self.lock_options();
        let mut updated = options.clone();
        if !updated.set(option, value)? {
            return Ok(false);
        }
        updated.save(&config.options_path())?;
        *options = updated;
        tracing::info!("Set launcher option {} = {}", option, value);
        Ok(true)
    }

    /// Run `f` against the registry and load order, then publish the new order.
    fn with_packs<R>(
        &self,
        f: impl FnOnce(&mut PackRegistry, &mut LoadOrderStore) -> LauncherResult<R>,
    ) -> LauncherResult<R> {
        if !self.config().has_install_dir() {
            return Err(LauncherError::Config(
                "install_dir is not configured".to_string(),
            ));
        }

        let mut guard = self.lock_packs();
        let PackSet { registry, store } = &mut *guard;
        let result = f(registry, store);
        self.state
            .set_load_order(store.enabled().to_vec(), store.known().len());
        result
    }

    /// Pick up packs added or removed on disk since the last look.
    pub fn reconcile_packs(&self) -> LauncherResult<ReconcileReport> {
        self.with_packs(|registry, store| registry.reconcile(store))
    }

    pub fn packs(&self, filter: &PackFilter) -> LauncherResult<Vec<Pack>> {
        self.with_packs(|registry, store| Ok(registry.filter(store, filter)))
    }

    pub fn set_pack_enabled(&self, identifier: &str, enabled: bool) -> LauncherResult<bool> {
        self.with_packs(|registry, store| registry.set_enabled(identifier, enabled, store))
    }

    pub fn move_pack(&self, identifier: &str, direction: MoveDirection) -> LauncherResult<bool> {
        self.with_packs(|_, store| match direction {
            MoveDirection::Up => store.move_up(identifier),
            MoveDirection::Down => store.move_down(identifier),
        })
    }

    /// Directory `remove_pack` would delete, for the confirmation prompt.
    pub fn pack_removal_target(&self, identifier: &str) -> LauncherResult<Option<Utf8PathBuf>> {
        self.with_packs(|registry, _| registry.removal_target(identifier))
    }

    /// Delete a pack directory. Callers confirm first.
    pub fn remove_pack(&self, identifier: &str) -> LauncherResult<bool> {
        self.with_packs(|registry, store| registry.remove_pack(identifier, store))
    }

    /// Delete the packs cache. Callers confirm first.
    pub fn clear_pack_cache(&self) -> LauncherResult<bool> {
        self.with_packs(|registry, _| registry.clear_pack_cache())
    }

    pub fn pack_cache_dir(&self) -> Utf8PathBuf {
        self.lock_packs().registry.pack_cache_dir().to_path_buf()
    }

    /// Delete the release snapshot. Callers confirm first.
    pub fn clear_release_cache(&self) -> LauncherResult<bool> {
        let removed = self.releases.clear()?;
        self.refresh_versions();
        Ok(removed)
    }

    /// Registry events published since the last call.
    pub fn drain_registry_events(&self) -> Vec<RegistryEvent> {
        let mut rx = self
            .registry_events
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let mut events = Vec::new();
        loop {
            match rx.try_recv() {
                Ok(event) => events.push(event),
                Err(TryRecvError::Lagged(skipped)) => {
                    tracing::warn!("Dropped {} pack registry events", skipped);
                }
                Err(TryRecvError::Empty | TryRecvError::Closed) => break,
            }
        }
        events
    }
}
