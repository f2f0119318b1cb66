//! Capability injection for tool-server environments
//!
//! Before a session launches, every declared tool-server gets the two
//! variables it needs to call back into this daemon: the run ID that
//! correlates its callbacks, and the daemon's socket address.

use crate::config::McpConfig;

/// Run ID injected into every tool-server environment
pub const RUN_ID_ENV: &str = "HUMANLAYER_RUN_ID";

/// Daemon socket address injected when callbacks are enabled
pub const DAEMON_SOCKET_ENV: &str = "HUMANLAYER_DAEMON_SOCKET";

/// Rewrite each tool-server's environment so it can reach this daemon.
///
/// Sets `HUMANLAYER_RUN_ID` on every entry unconditionally, and
/// `HUMANLAYER_DAEMON_SOCKET` only when `socket_path` is non-empty (an empty
/// path means callbacks are disabled). All other keys are left untouched.
///
/// Deterministic and idempotent: re-running with the same run ID and socket
/// path produces an identical configuration. Each entry is an owned value
/// mutated under the exclusive borrow, so no partially-updated entry is ever
/// observable elsewhere.
pub fn inject_capabilities(config: &mut McpConfig, run_id: &str, socket_path: &str) {
    for server in config.mcp_servers.values_mut() {
        server
            .env
            .insert(RUN_ID_ENV.to_string(), run_id.to_string());
        if !socket_path.is_empty() {
            server
                .env
                .insert(DAEMON_SOCKET_ENV.to_string(), socket_path.to_string());
        }
    }
}
