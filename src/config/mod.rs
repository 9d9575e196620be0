use crate::atomic::write_atomic;
use crate::models::LauncherConfig;
use anyhow::{Context, Result};
use camino::{Utf8Path, Utf8PathBuf};
use config::{Config, Environment, File, FileFormat, Map};
use std::fs;

/// File name of the launcher settings inside the config directory.
pub const CONFIG_FILENAME: &str = "packrun.yaml";

/// Prefix of environment variables overriding file settings
/// (`PACKRUN_INSTALL_DIR`, `PACKRUN_CONSOLE`, ...).
pub const ENV_PREFIX: &str = "PACKRUN";

/// Configuration manager for loading and saving `packrun.yaml`.
///
/// Loading is layered: built-in defaults, then the YAML file (if present),
/// then `PACKRUN_*` environment variables.
#[derive(Debug, Clone)]
pub struct ConfigManager {
    config_dir: Utf8PathBuf,
    config_path: Utf8PathBuf,
}

impl ConfigManager {
    /// Create a new ConfigManager with the specified configuration directory.
    ///
    /// The directory is created if it does not exist yet.
    pub fn new<P: AsRef<Utf8Path>>(config_dir: P) -> Result<Self> {
        let config_dir = config_dir.as_ref().to_path_buf();

        if !config_dir.exists() {
            fs::create_dir_all(&config_dir)
                .with_context(|| format!("Failed to create config directory: {}", config_dir))?;
        }

        Ok(Self {
            config_path: config_dir.join(CONFIG_FILENAME),
            config_dir,
        })
    }

    /// Platform default configuration directory (`<config>/packrun`).
    pub fn default_dir() -> Utf8PathBuf {
        dirs::config_dir()
            .and_then(|p| Utf8PathBuf::from_path_buf(p).ok())
            .unwrap_or_else(|| Utf8PathBuf::from("."))
            .join("packrun")
    }

    /// Load the launcher configuration, applying environment overrides.
    pub fn load(&self) -> Result<LauncherConfig> {
        self.load_layered(None)
    }

    /// Layered load with an explicit environment map instead of the process
    /// environment when `env` is `Some`.
    fn load_layered(&self, env: Option<Map<String, String>>) -> Result<LauncherConfig> {
        if !self.config_path.exists() {
            tracing::warn!(
                "Config file not found at {}, using defaults",
                self.config_path
            );
        }

        let settings = Config::builder()
            .add_source(
                File::from(self.config_path.as_std_path())
                    .format(FileFormat::Yaml)
                    .required(false),
            )
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .try_parsing(true)
                    .source(env),
            )
            .build()
            .with_context(|| format!("Failed to read config: {}", self.config_path))?;

        let config: LauncherConfig = settings
            .try_deserialize()
            .with_context(|| format!("Failed to parse config: {}", self.config_path))?;

        tracing::info!("Loaded config from {}", self.config_path);
        Ok(config)
    }

    /// Save the launcher configuration.
    pub fn save(&self, config: &LauncherConfig) -> Result<()> {
        let yaml_string =
            serde_yaml_ng::to_string(config).context("Failed to serialize config to YAML")?;

        write_atomic(&self.config_path, yaml_string.as_bytes())
            .with_context(|| format!("Failed to write config: {}", self.config_path))?;

        tracing::info!("Saved config to {}", self.config_path);
        Ok(())
    }

    /// Get the configuration directory path.
    pub fn config_dir(&self) -> &Utf8Path {
        &self.config_dir
    }

    pub fn config_path(&self) -> &Utf8Path {
        &self.config_path
    }
}
