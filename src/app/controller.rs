// PlayController - binds the launcher's tasks and events to the executor
//
// Background tasks do the slow work (network, extraction, waiting on the
// launcher) and report back with typed events. The foreground callbacks
// registered here are the only code that reacts to those events, and every
// finish or failure path returns the state to idle.

use crate::app::context::AppContext;
use crate::error::{LauncherError, LauncherResult};
use crate::models::Operation;
use crate::services::launch;
use crate::services::release_cache::RefreshOutcome;
use crate::tasks::{
    ConcurrencyMode, EventKind, TaskContext, TaskEvent, TaskExecutor, TaskKind, TaskOutcome,
    TaskRequest,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

pub struct PlayController {
    ctx: Arc<AppContext>,
}

impl PlayController {
    pub fn new(ctx: Arc<AppContext>) -> Self {
        Self { ctx }
    }

    pub fn context(&self) -> &Arc<AppContext> {
        &self.ctx
    }

    /// Register every task kind and event callback on `executor`.
    pub fn attach(&self, executor: &mut TaskExecutor) {
        self.register_tasks(executor);
        self.register_event_handlers(executor);
    }

    fn register_tasks(&self, executor: &mut TaskExecutor) {
        let ctx = Arc::clone(&self.ctx);
        executor.register(
            TaskKind::RefreshReleases,
            move |request: TaskRequest, task: TaskContext| {
                refresh_releases(Arc::clone(&ctx), request, task)
            },
            ConcurrencyMode::Background,
            false,
        );

        let ctx = Arc::clone(&self.ctx);
        executor.register(
            TaskKind::Install,
            move |request: TaskRequest, task: TaskContext| {
                install_version(Arc::clone(&ctx), request, task)
            },
            ConcurrencyMode::Background,
            false,
        );

        let ctx = Arc::clone(&self.ctx);
        executor.register(
            TaskKind::Uninstall,
            move |request: TaskRequest, task: TaskContext| {
                uninstall_version(Arc::clone(&ctx), request, task)
            },
            ConcurrencyMode::Background,
            false,
        );

        let ctx = Arc::clone(&self.ctx);
        executor.register(
            TaskKind::Launch,
            move |request: TaskRequest, task: TaskContext| {
                run_launcher(Arc::clone(&ctx), request, task)
            },
            ConcurrencyMode::Background,
            true,
        );

        let ctx = Arc::clone(&self.ctx);
        executor.register(
            TaskKind::Play,
            move |_request: TaskRequest, task: TaskContext| {
                let ctx = Arc::clone(&ctx);
                async move { ctx.play(task.invoker()) }
            },
            ConcurrencyMode::Foreground,
            false,
        );
    }

    fn register_event_handlers(&self, executor: &mut TaskExecutor) {
        let ctx = Arc::clone(&self.ctx);
        executor.register_handler(EventKind::ReleasesUpdated, move |_, _| {
            tracing::debug!("Release snapshot changed, rebuilding version list");
            ctx.refresh_versions();
        });

        let ctx = Arc::clone(&self.ctx);
        executor.register_handler(EventKind::DownloadProgress, move |event, _| {
            if let TaskEvent::DownloadProgress { tag, downloaded } = event {
                let total = ctx.state().read(|s| {
                    s.download
                        .as_ref()
                        .filter(|d| &d.tag == tag)
                        .and_then(|d| d.total)
                });
                ctx.state().update_download(tag, *downloaded, total);
            }
        });

        let ctx = Arc::clone(&self.ctx);
        executor.register_handler(EventKind::DownloadFinished, move |event, invoker| {
            if let TaskEvent::DownloadFinished {
                tag,
                version,
                launch,
            } = event
            {
                tracing::info!("Installed {} version {}", tag, version);
                ctx.state().finish_operation();
                ctx.refresh_versions();
                if *launch {
                    invoker.invoke(TaskRequest::Play);
                }
            }
        });

        let ctx = Arc::clone(&self.ctx);
        executor.register_handler(EventKind::UninstallFinished, move |event, _| {
            if let TaskEvent::UninstallFinished { tag } = event {
                tracing::info!("Uninstalled {}", tag);
                ctx.state().finish_operation();
                ctx.refresh_versions();
            }
        });

        executor.register_handler(EventKind::LauncherExited, |event, _| {
            if let TaskEvent::LauncherExited { tag, code } = event {
                match code {
                    Some(code) => tracing::info!("Launcher {} exited with code {}", tag, code),
                    None => tracing::info!("Launcher {} was terminated by a signal", tag),
                }
            }
        });

        let ctx = Arc::clone(&self.ctx);
        executor.register_handler(EventKind::TaskCompleted, move |event, _| {
            if let TaskEvent::TaskCompleted {
                task: TaskKind::Launch,
                ..
            } = event
            {
                ctx.state().set_launcher_running(false);
                ctx.state().finish_operation();
                ctx.refresh_versions();
            }
        });

        let ctx = Arc::clone(&self.ctx);
        executor.register_handler(EventKind::TaskFailed, move |event, _| {
            if let TaskEvent::TaskFailed { task, error } = event {
                if error.is_concurrency_guard() {
                    return;
                }
                ctx.state().report_error(format!("{} failed: {}", task, error));
            }
        });
    }

    /// Ask for a refresh, marking the state busy until it lands.
    pub fn request_refresh(&self, executor: &mut TaskExecutor) -> bool {
        self.ctx.state().begin_operation(Operation::RefreshingReleases);
        let started = executor.invoke(TaskRequest::RefreshReleases);
        executor.run_until_idle();
        self.ctx.state().finish_operation();
        started
    }
}

async fn refresh_releases(
    ctx: Arc<AppContext>,
    _request: TaskRequest,
    task: TaskContext,
) -> LauncherResult<TaskOutcome> {
    let outcome = ctx.releases().refresh().await?;
    match outcome {
        RefreshOutcome::Refreshed => {
            ctx.metrics().record_refresh_completed();
            task.emit(TaskEvent::ReleasesUpdated);
        }
        RefreshOutcome::AlreadyRunning => ctx.metrics().record_refresh_skipped(),
    }
    Ok(TaskOutcome::Refreshed(outcome))
}

async fn install_version(
    ctx: Arc<AppContext>,
    request: TaskRequest,
    task: TaskContext,
) -> LauncherResult<TaskOutcome> {
    let kind = request.kind();
    let TaskRequest::Install { tag, url, launch } = request else {
        return Err(unexpected(kind));
    };

    let received = Arc::new(AtomicU64::new(0));
    let progress = {
        let task = task.clone();
        let tag = tag.clone();
        let received = Arc::clone(&received);
        move |downloaded: u64| {
            received.store(downloaded, Ordering::Relaxed);
            task.emit(TaskEvent::DownloadProgress {
                tag: tag.clone(),
                downloaded,
            });
        }
    };

    let started = Instant::now();
    let result = ctx
        .installer()
        .install(&tag, &url, progress, task.cancel_signal())
        .await;
    ctx.metrics()
        .record_download(received.load(Ordering::Relaxed), started.elapsed());

    let installed = result?;
    task.emit(TaskEvent::DownloadFinished {
        tag,
        version: installed.version.clone(),
        launch,
    });
    Ok(TaskOutcome::Installed(installed))
}

async fn uninstall_version(
    ctx: Arc<AppContext>,
    request: TaskRequest,
    task: TaskContext,
) -> LauncherResult<TaskOutcome> {
    let kind = request.kind();
    let TaskRequest::Uninstall { tag } = request else {
        return Err(unexpected(kind));
    };

    let installer = Arc::clone(ctx.installer());
    let target = tag.clone();
    let outcome = tokio::task::spawn_blocking(move || installer.uninstall(&target))
        .await
        .map_err(|e| LauncherError::Panicked(e.to_string()))??;

    task.emit(TaskEvent::UninstallFinished { tag });
    Ok(TaskOutcome::Uninstalled(outcome))
}

async fn run_launcher(
    ctx: Arc<AppContext>,
    request: TaskRequest,
    task: TaskContext,
) -> LauncherResult<TaskOutcome> {
    let kind = request.kind();
    let TaskRequest::Launch { tag, spec } = request else {
        return Err(unexpected(kind));
    };

    let deadline = ctx.config().launch_timeout();
    let code = launch::run(&spec, deadline, task.cancel_signal()).await?;
    task.emit(TaskEvent::LauncherExited { tag, code });
    Ok(TaskOutcome::Exited(code))
}

fn unexpected(kind: TaskKind) -> LauncherError {
    LauncherError::Config(format!("handler received a {} request", kind))
}
