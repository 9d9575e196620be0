//! packrun - launcher version manager and content-pack load order tool
//!
//! Entry point for the command line binary.
//!
//! # Overview
//!
//! The binary initializes:
//! - Configuration ([`ConfigManager`]: `packrun.yaml` plus `PACKRUN_*` overrides)
//! - Logging (daily rotating file, console output with `--verbose`)
//! - A tokio runtime for background tasks (downloads, extraction, the launcher process)
//! - The [`AppContext`] holding state and services, and the [`PlayController`]
//!   that registers tasks and event handlers on the [`TaskExecutor`]
//!
//! The main thread is the foreground: it invokes tasks and dispatches their
//! events, and is never itself inside the runtime.
//!
//! # Execution Flow
//!
//! 1. Parse the command line
//! 2. Load configuration and start logging into `log_dir`
//! 3. Build the runtime, context, executor and controller
//! 4. Install a Ctrl+C handler that cancels in-flight work
//! 5. Run the subcommand until the executor is idle
//! 6. Log a metrics summary and shut the runtime down

use anyhow::{Context, Result};
use clap::Parser;
use packrun::app::{AppContext, PlayController};
use packrun::cli::{self, Cli};
use packrun::config::ConfigManager;
use packrun::logging::{LOG_PREFIX, setup_logging};
use packrun::metrics::Metrics;
use packrun::tasks::TaskExecutor;
use packrun::{APP_NAME, VERSION};
use std::sync::Arc;
use std::time::Duration;

fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_dir = cli
        .config_dir
        .clone()
        .unwrap_or_else(ConfigManager::default_dir);
    let config_manager = ConfigManager::new(&config_dir)?;
    let config = config_manager.load()?;

    let _log_guard = setup_logging(
        &config.log_dir,
        LOG_PREFIX,
        config.debug_mode || cli.verbose,
        cli.verbose,
    )?;

    tracing::info!("Starting {} v{}", APP_NAME, VERSION);
    tracing::debug!("Using configuration at {}", config_manager.config_path());

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .worker_threads(4)
        .thread_name("packrun-worker")
        .build()
        .context("Failed to create tokio runtime")?;

    let metrics = Arc::new(Metrics::new());
    let ctx = Arc::new(
        AppContext::from_config(config_manager, config, Arc::clone(&metrics))
            .context("Failed to initialize launcher")?,
    );

    let mut executor = TaskExecutor::new(runtime.handle().clone(), Arc::clone(&metrics));
    let controller = PlayController::new(ctx);
    controller.attach(&mut executor);

    let cancel = executor.cancel_handle();
    runtime.spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, cancelling running tasks...");
            cancel.cancel();
        }
    });

    let result = cli::execute(&cli, &controller, &mut executor);

    if let Err(e) = &result {
        tracing::error!("{:#}", e);
    }
    metrics.log_summary();

    tracing::info!("Shutting down");
    runtime.shutdown_timeout(Duration::from_secs(5));

    result
}
