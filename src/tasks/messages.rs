use crate::error::LauncherError;
use crate::models::InstalledVersion;
use crate::services::installer::UninstallOutcome;
use crate::services::launch::LaunchSpec;
use crate::services::release_cache::RefreshOutcome;
use std::fmt;
use std::sync::Arc;

/// The fixed set of operations the executor knows how to run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TaskKind {
    RefreshReleases,
    Install,
    Uninstall,
    Launch,
    Play,
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TaskKind::RefreshReleases => "refresh-releases",
            TaskKind::Install => "install",
            TaskKind::Uninstall => "uninstall",
            TaskKind::Launch => "launch",
            TaskKind::Play => "play",
        };
        f.write_str(name)
    }
}

/// One invocation of a task with its call-specific arguments.
#[derive(Clone, Debug, PartialEq)]
pub enum TaskRequest {
    RefreshReleases,
    Install {
        tag: String,
        url: String,
        /// Launch once the install finishes.
        launch: bool,
    },
    Uninstall {
        tag: String,
    },
    Launch {
        tag: String,
        spec: LaunchSpec,
    },
    Play,
}

impl TaskRequest {
    pub fn kind(&self) -> TaskKind {
        match self {
            TaskRequest::RefreshReleases => TaskKind::RefreshReleases,
            TaskRequest::Install { .. } => TaskKind::Install,
            TaskRequest::Uninstall { .. } => TaskKind::Uninstall,
            TaskRequest::Launch { .. } => TaskKind::Launch,
            TaskRequest::Play => TaskKind::Play,
        }
    }
}

/// Value a task handler returns on success.
#[derive(Clone, Debug, PartialEq)]
pub enum TaskOutcome {
    Done,
    Refreshed(RefreshOutcome),
    Installed(InstalledVersion),
    Uninstalled(UninstallOutcome),
    /// The launcher process exited with this code (`None` if killed by a signal).
    Exited(Option<i32>),
}

/// Completion or failure shared between events.
pub type SharedError = Arc<LauncherError>;

/// Typed message from a worker to the foreground.
#[derive(Clone, Debug)]
pub enum TaskEvent {
    /// The release snapshot was replaced.
    ReleasesUpdated,
    DownloadProgress {
        tag: String,
        downloaded: u64,
    },
    DownloadFinished {
        tag: String,
        version: String,
        launch: bool,
    },
    UninstallFinished {
        tag: String,
    },
    LauncherExited {
        tag: String,
        code: Option<i32>,
    },
    /// Emitted after every run of a task registered with `on_complete`,
    /// whether it succeeded, failed or panicked.
    TaskCompleted {
        task: TaskKind,
        outcome: Result<TaskOutcome, SharedError>,
    },
    /// A handler returned an error or panicked. This is the failure message
    /// for every task kind, including installs.
    TaskFailed {
        task: TaskKind,
        error: SharedError,
    },
}

/// Discriminant of [`TaskEvent`] used to register foreground handlers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EventKind {
    ReleasesUpdated,
    DownloadProgress,
    DownloadFinished,
    UninstallFinished,
    LauncherExited,
    TaskCompleted,
    TaskFailed,
}

impl TaskEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            TaskEvent::ReleasesUpdated => EventKind::ReleasesUpdated,
            TaskEvent::DownloadProgress { .. } => EventKind::DownloadProgress,
            TaskEvent::DownloadFinished { .. } => EventKind::DownloadFinished,
            TaskEvent::UninstallFinished { .. } => EventKind::UninstallFinished,
            TaskEvent::LauncherExited { .. } => EventKind::LauncherExited,
            TaskEvent::TaskCompleted { .. } => EventKind::TaskCompleted,
            TaskEvent::TaskFailed { .. } => EventKind::TaskFailed,
        }
    }
}
