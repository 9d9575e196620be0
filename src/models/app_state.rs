use std::collections::BTreeSet;
use std::fmt;

/// Long-running operation currently occupying the launcher.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Operation {
    RefreshingReleases,
    Installing { tag: String },
    Uninstalling { tag: String },
    Launching { tag: String },
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::RefreshingReleases => write!(f, "Refreshing releases"),
            Operation::Installing { tag } => write!(f, "Installing {}", tag),
            Operation::Uninstalling { tag } => write!(f, "Uninstalling {}", tag),
            Operation::Launching { tag } => write!(f, "Running {}", tag),
        }
    }
}

/// Cumulative progress of the running download.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DownloadProgress {
    pub tag: String,
    pub downloaded: u64,
    /// Advertised asset size, when known.
    pub total: Option<u64>,
}

impl DownloadProgress {
    /// Percentage complete, if the total is known and non-zero.
    pub fn percent(&self) -> Option<u8> {
        let total = self.total.filter(|t| *t > 0)?;
        Some(((self.downloaded.min(total) * 100) / total) as u8)
    }
}

/// Observable state of the launcher front end.
///
/// # Thread Safety
///
/// Wrapped in `Arc<RwLock<LauncherState>>` by [`crate::state::StateManager`];
/// mutate it only through [`update()`](crate::state::StateManager::update) so
/// change events are emitted.
#[derive(Clone, Debug, Default)]
pub struct LauncherState {
    /// Whether "play" may be triggered right now.
    pub play_enabled: bool,
    pub busy: Option<Operation>,
    pub download: Option<DownloadProgress>,
    pub launcher_running: bool,

    pub selected_version: Option<String>,
    pub version_choices: Vec<String>,
    pub installed_versions: BTreeSet<String>,

    /// Enabled pack identifiers in load order.
    pub enabled_packs: Vec<String>,
    pub known_packs: usize,

    pub last_error: Option<String>,
}

impl LauncherState {
    /// Whether the selected version is present on disk.
    pub fn selected_is_installed(&self) -> bool {
        self.selected_version
            .as_ref()
            .is_some_and(|tag| self.installed_versions.contains(tag))
    }

    /// Return to idle after an operation finished or failed.
    pub fn finish_operation(&mut self) {
        self.busy = None;
        self.download = None;
        self.play_enabled = !self.launcher_running;
    }

    /// One-line status suitable for a status bar.
    pub fn status_line(&self) -> String {
        if let Some(progress) = &self.download {
            return match progress.percent() {
                Some(pct) => format!("Downloading {} ({}%)", progress.tag, pct),
                None => format!("Downloading {} ({} bytes)", progress.tag, progress.downloaded),
            };
        }
        if let Some(op) = &self.busy {
            return format!("{}...", op);
        }
        if let Some(err) = &self.last_error {
            return format!("Error: {}", err);
        }
        match &self.selected_version {
            Some(tag) if self.selected_is_installed() => format!("Ready ({})", tag),
            Some(tag) => format!("{} not installed", tag),
            None => "No version selected".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_state_is_idle() {
        let state = LauncherState::default();
        assert!(!state.play_enabled);
        assert!(state.busy.is_none());
        assert_eq!(state.status_line(), "No version selected");
    }

    #[test]
    fn test_download_percent() {
        let progress = DownloadProgress {
            tag: "stable".to_string(),
            downloaded: 512,
            total: Some(1024),
        };
        assert_eq!(progress.percent(), Some(50));

        let unknown = DownloadProgress {
            total: None,
            ..progress.clone()
        };
        assert_eq!(unknown.percent(), None);
    }

    #[test]
    fn test_finish_operation_respects_running_launcher() {
        let mut state = LauncherState {
            busy: Some(Operation::RefreshingReleases),
            launcher_running: true,
            ..Default::default()
        };
        state.finish_operation();
        assert!(state.busy.is_none());
        assert!(!state.play_enabled);

        state.launcher_running = false;
        state.finish_operation();
        assert!(state.play_enabled);
    }

    #[test]
    fn test_status_line_reports_installed_selection() {
        let mut state = LauncherState {
            selected_version: Some("nightly".to_string()),
            ..Default::default()
        };
        assert_eq!(state.status_line(), "nightly not installed");

        state.installed_versions.insert("nightly".to_string());
        assert_eq!(state.status_line(), "Ready (nightly)");
    }
}
