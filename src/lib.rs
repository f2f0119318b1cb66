//! Local daemon core that supervises AI coding-agent sessions
//!
//! Launches agent sessions, rewrites each declared tool-server's environment
//! so it can call back into the daemon over a fixed local socket, persists
//! session records, and publishes lifecycle events.

pub mod bus;
pub mod config;
pub mod session;
pub mod store;
