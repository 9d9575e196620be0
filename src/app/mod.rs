//! Foreground orchestration: the shared application context and the
//! controller that wires tasks and events to it.

pub mod context;
pub mod controller;

pub use context::{AppContext, MoveDirection};
pub use controller::PlayController;
