//! Background task execution and the typed messages workers send back.

pub mod executor;
pub mod messages;

pub use executor::{
    CancelHandle, ConcurrencyMode, EventCallback, TaskContext, TaskExecutor, TaskHandler,
    TaskInvoker,
};
pub use messages::{EventKind, SharedError, TaskEvent, TaskKind, TaskOutcome, TaskRequest};

use crate::error::{LauncherError, LauncherResult};
use std::future::Future;
use std::time::Duration;
use tokio::sync::watch;

/// Run `fut` until it finishes, `deadline` passes or `cancel` flips to `true`.
///
/// A dropped cancel sender never cancels.
pub async fn guarded<T, F>(
    fut: F,
    deadline: Option<Duration>,
    cancel: &mut watch::Receiver<bool>,
) -> LauncherResult<T>
where
    F: Future<Output = LauncherResult<T>>,
{
    if *cancel.borrow() {
        return Err(LauncherError::Cancelled);
    }

    let cancelled = async {
        if cancel.wait_for(|cancelled| *cancelled).await.is_err() {
            std::future::pending::<()>().await;
        }
    };

    let bounded = async {
        match deadline {
            Some(limit) => tokio::time::timeout(limit, fut)
                .await
                .unwrap_or(Err(LauncherError::Timeout(limit))),
            None => fut.await,
        }
    };

    tokio::select! {
        result = bounded => result,
        () = cancelled => Err(LauncherError::Cancelled),
    }
}
