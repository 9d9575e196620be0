// packrun - launcher version manager and content-pack load order tool
//
// This is the library crate containing the core logic and data structures.
// The binary crate (main.rs) provides the command line entry point.

pub mod app;
pub mod atomic;
pub mod cli;
pub mod config;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod models;
pub mod services;
pub mod state;
pub mod tasks;

// Re-export commonly used types for convenience
pub use app::{AppContext, PlayController};
pub use config::ConfigManager;
pub use error::{LauncherError, LauncherResult};
pub use models::{LauncherConfig, LauncherState};
pub use state::{StateChange, StateManager};
pub use tasks::{TaskExecutor, TaskRequest};

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const APP_NAME: &str = env!("CARGO_PKG_NAME");
