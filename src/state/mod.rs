// State management module
//
// This module provides the StateManager which wraps LauncherState with thread-safe
// access using Arc<RwLock<T>> and emits change events for front-end updates.

use crate::models::{DownloadProgress, LauncherState, Operation};
use std::collections::BTreeSet;
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::broadcast;

/// Change events emitted when state is modified
///
/// These events notify interested parties (the CLI status printer, tests)
/// about state changes without requiring them to poll the state.
#[derive(Clone, Debug, PartialEq)]
pub enum StateChange {
    /// Whether "play" may be triggered has changed
    PlayAvailabilityChanged { enabled: bool },

    /// A long-running operation started or finished (`None` = idle)
    OperationChanged { operation: Option<Operation> },

    /// Download progress moved
    DownloadProgressUpdated { tag: String, downloaded: u64 },

    /// The external launcher process started or exited
    LauncherRunningChanged { running: bool },

    /// Version choices or the installed set changed
    VersionsChanged {
        choices: Vec<String>,
        installed: usize,
    },

    SelectedVersionChanged { tag: Option<String> },

    /// Enabled packs or their order changed
    LoadOrderChanged { enabled: Vec<String> },

    /// A failure was reported to the user
    ErrorReported { message: String },
}

/// Thread-safe state manager with event emission
///
/// This is the central state component that:
/// - Provides thread-safe access to [`LauncherState`] via `Arc<RwLock<T>>`
/// - Detects state changes and emits [`StateChange`] events
/// - Supports subscribing to state changes via tokio broadcast channels
///
/// # Usage
///
/// Always use `StateManager` instead of accessing [`LauncherState`] directly:
/// - [`read()`](Self::read) for reading individual fields
/// - [`update()`](Self::update) for mutations with automatic event emission
/// - [`subscribe()`](Self::subscribe) for listening to state changes
///
/// # Related Types
///
/// - [`crate::models::LauncherState`]: The underlying state structure
/// - [`StateChange`]: Event types emitted on state mutations
/// - [`crate::app::PlayController`]: Primary writer of launcher state
#[derive(Clone)]
pub struct StateManager {
    state: Arc<RwLock<LauncherState>>,
    state_tx: broadcast::Sender<StateChange>,
}

impl StateManager {
    /// Create a new StateManager with default state and a broadcast buffer
    /// of 100 events
    pub fn new() -> Self {
        let (state_tx, _) = broadcast::channel(100);
        Self {
            state: Arc::new(RwLock::new(LauncherState::default())),
            state_tx,
        }
    }

    /// Clone of the current state
    pub fn snapshot(&self) -> LauncherState {
        self.read(LauncherState::clone)
    }

    /// Execute a function with read access to the state
    ///
    /// # Example
    /// ```ignore
    /// let busy = state_manager.read(|state| state.busy.is_some());
    /// ```
    pub fn read<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&LauncherState) -> R,
    {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        f(&state)
    }

    /// Update the state and emit change events
    ///
    /// Captures the old state, applies `update_fn`, diffs the two and
    /// broadcasts one event per changed aspect.
    ///
    /// # Returns
    /// The StateChange events that were emitted
    pub fn update<F>(&self, update_fn: F) -> Vec<StateChange>
    where
        F: FnOnce(&mut LauncherState),
    {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        let old_state = state.clone();

        update_fn(&mut state);

        let changes = Self::detect_changes(&old_state, &state);
        for change in &changes {
            // Nobody listening is fine
            let _ = self.state_tx.send(change.clone());
        }

        changes
    }

    /// Subscribe to state change events
    pub fn subscribe(&self) -> broadcast::Receiver<StateChange> {
        self.state_tx.subscribe()
    }

    fn detect_changes(old: &LauncherState, new: &LauncherState) -> Vec<StateChange> {
        let mut changes = Vec::new();

        if old.play_enabled != new.play_enabled {
            changes.push(StateChange::PlayAvailabilityChanged {
                enabled: new.play_enabled,
            });
        }

        if old.busy != new.busy {
            changes.push(StateChange::OperationChanged {
                operation: new.busy.clone(),
            });
        }

        if let Some(progress) = &new.download {
            if old.download.as_ref() != Some(progress) {
                changes.push(StateChange::DownloadProgressUpdated {
                    tag: progress.tag.clone(),
                    downloaded: progress.downloaded,
                });
            }
        }

        if old.launcher_running != new.launcher_running {
            changes.push(StateChange::LauncherRunningChanged {
                running: new.launcher_running,
            });
        }

        if old.version_choices != new.version_choices
            || old.installed_versions != new.installed_versions
        {
            changes.push(StateChange::VersionsChanged {
                choices: new.version_choices.clone(),
                installed: new.installed_versions.len(),
            });
        }

        if old.selected_version != new.selected_version {
            changes.push(StateChange::SelectedVersionChanged {
                tag: new.selected_version.clone(),
            });
        }

        if old.enabled_packs != new.enabled_packs {
            changes.push(StateChange::LoadOrderChanged {
                enabled: new.enabled_packs.clone(),
            });
        }

        if old.last_error != new.last_error {
            if let Some(message) = &new.last_error {
                changes.push(StateChange::ErrorReported {
                    message: message.clone(),
                });
            }
        }

        changes
    }

    // Convenience methods for common state updates

    /// Mark an operation as started; play is disabled until it finishes
    pub fn begin_operation(&self, operation: Operation) -> Vec<StateChange> {
        self.update(|state| {
            state.busy = Some(operation);
            state.play_enabled = false;
            state.last_error = None;
        })
    }

    /// Return to idle, re-enabling play unless the launcher is running
    pub fn finish_operation(&self) -> Vec<StateChange> {
        self.update(LauncherState::finish_operation)
    }

    /// Record a failure and return to idle
    pub fn report_error(&self, message: impl Into<String>) -> Vec<StateChange> {
        let message = message.into();
        self.update(|state| {
            state.last_error = Some(message);
            state.finish_operation();
        })
    }

    pub fn update_download(
        &self,
        tag: &str,
        downloaded: u64,
        total: Option<u64>,
    ) -> Vec<StateChange> {
        self.update(|state| {
            state.download = Some(DownloadProgress {
                tag: tag.to_string(),
                downloaded,
                total,
            });
        })
    }

    pub fn set_launcher_running(&self, running: bool) -> Vec<StateChange> {
        self.update(|state| {
            state.launcher_running = running;
            state.play_enabled = !running && state.busy.is_none();
        })
    }

    pub fn set_versions(
        &self,
        choices: Vec<String>,
        installed: BTreeSet<String>,
    ) -> Vec<StateChange> {
        self.update(|state| {
            state.version_choices = choices;
            state.installed_versions = installed;
        })
    }

    pub fn select_version(&self, tag: Option<String>) -> Vec<StateChange> {
        self.update(|state| state.selected_version = tag)
    }

    pub fn set_load_order(&self, enabled: Vec<String>, known: usize) -> Vec<StateChange> {
        self.update(|state| {
            state.enabled_packs = enabled;
            state.known_packs = known;
        })
    }
}

impl Default for StateManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_state_manager() {
        let manager = StateManager::new();
        let state = manager.snapshot();

        assert!(!state.play_enabled);
        assert!(state.busy.is_none());
        assert!(state.enabled_packs.is_empty());
    }

    #[test]
    fn test_begin_and_finish_operation() {
        let manager = StateManager::new();
        manager.update(|state| state.play_enabled = true);

        let changes = manager.begin_operation(Operation::Installing {
            tag: "nightly".to_string(),
        });
        assert_eq!(changes.len(), 2);
        assert!(matches!(
            changes[0],
            StateChange::PlayAvailabilityChanged { enabled: false }
        ));
        assert!(matches!(
            changes[1],
            StateChange::OperationChanged { operation: Some(_) }
        ));

        let changes = manager.finish_operation();
        assert!(changes.contains(&StateChange::OperationChanged { operation: None }));
        assert!(manager.read(|s| s.play_enabled));
    }

    #[test]
    fn test_download_progress_events() {
        let manager = StateManager::new();

        let changes = manager.update_download("stable", 102400, Some(300000));
        assert_eq!(
            changes,
            vec![StateChange::DownloadProgressUpdated {
                tag: "stable".to_string(),
                downloaded: 102400
            }]
        );

        // Same value again: nothing changed
        assert!(manager.update_download("stable", 102400, Some(300000)).is_empty());
    }

    #[test]
    fn test_launcher_running_blocks_play() {
        let manager = StateManager::new();

        let changes = manager.set_launcher_running(true);
        assert!(changes.contains(&StateChange::LauncherRunningChanged { running: true }));
        assert!(!manager.read(|s| s.play_enabled));

        manager.set_launcher_running(false);
        assert!(manager.read(|s| s.play_enabled));
    }

    #[test]
    fn test_report_error_returns_to_idle() {
        let manager = StateManager::new();
        manager.begin_operation(Operation::RefreshingReleases);

        let changes = manager.report_error("HTTP 503");

        assert!(changes.contains(&StateChange::ErrorReported {
            message: "HTTP 503".to_string()
        }));
        let state = manager.snapshot();
        assert!(state.busy.is_none());
        assert_eq!(state.last_error.as_deref(), Some("HTTP 503"));
    }

    #[test]
    fn test_load_order_changes() {
        let manager = StateManager::new();

        let changes = manager.set_load_order(vec!["a".to_string()], 3);
        assert_eq!(
            changes,
            vec![StateChange::LoadOrderChanged {
                enabled: vec!["a".to_string()]
            }]
        );

        // Known count alone is not a load-order change
        assert!(manager.set_load_order(vec!["a".to_string()], 4).is_empty());
    }

    #[tokio::test]
    async fn test_subscribe_receives_changes() {
        let manager = StateManager::new();
        let mut rx = manager.subscribe();

        manager.select_version(Some("nightly".to_string()));

        let change = rx.recv().await.unwrap();
        assert_eq!(
            change,
            StateChange::SelectedVersionChanged {
                tag: Some("nightly".to_string())
            }
        );
    }
}
