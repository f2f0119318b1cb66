//! Session launch and lifecycle management
//!
//! The manager prepares launch configurations (capability injection), persists
//! session records, publishes lifecycle events, and delegates execution.

pub mod engine;
pub mod inject;
mod manager;
mod types;

pub use engine::{ExecutionEngine, SubprocessEngine};
pub use inject::{inject_capabilities, DAEMON_SOCKET_ENV, RUN_ID_ENV};
pub use manager::SessionManager;
pub use types::{generate_run_id, Session, SessionConfig, SessionStatus};
