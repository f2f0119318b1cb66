//! Configuration loading

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Find a config file by walking up the directory tree, then checking global config.
///
/// Search order:
/// 1. Current directory and parent directories (walking up to root)
/// 2. Global config at ~/.config/hld/
///
/// Returns the path if found, None otherwise.
fn find_config_file(filename: &str) -> Option<PathBuf> {
    let mut current = std::env::current_dir().ok()?;

    // Walk up the directory tree
    loop {
        let candidate = current.join(filename);
        if candidate.exists() {
            return Some(candidate);
        }

        match current.parent() {
            Some(parent) => current = parent.to_path_buf(),
            None => break, // Reached filesystem root
        }
    }

    // Fallback: check global config
    if let Some(config_dir) = dirs::config_dir() {
        let global_path = config_dir.join("hld").join(filename);
        if global_path.exists() {
            return Some(global_path);
        }
    }

    None
}

/// Tool-server (MCP) configuration for one session (from .mcp.json)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct McpConfig {
    #[serde(rename = "mcpServers")]
    pub mcp_servers: HashMap<String, McpServerConfig>,
}

/// One tool-server entry: the command to spawn and its environment
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct McpServerConfig {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
}

impl McpConfig {
    /// Load MCP config from .mcp.json
    ///
    /// Search order:
    /// 1. Walk up directory tree from cwd looking for .mcp.json
    /// 2. Check ~/.config/hld/.mcp.json (global fallback)
    pub fn load() -> Result<Option<Self>> {
        if let Some(config_path) = find_config_file(".mcp.json") {
            tracing::debug!("Loading MCP config from: {}", config_path.display());
            return Self::load_from_path(&config_path).map(Some);
        }

        tracing::debug!("No .mcp.json found");
        Ok(None)
    }

    /// Load from a specific path
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: McpConfig = serde_json::from_str(&content)?;
        Ok(config)
    }
}

// ============================================================================
// Daemon Configuration (hld.toml)
// ============================================================================

/// Daemon configuration (from hld.toml)
///
/// Used only by the binary to resolve startup flags. The session manager
/// receives the resolved values once, at construction, and never reads
/// configuration or process environment afterwards.
#[derive(Debug, Default, Deserialize)]
pub struct DaemonFileConfig {
    /// Local socket path tool-servers use to call back into the daemon
    pub socket_path: Option<String>,
    /// SQLite database path for session records
    pub db_path: Option<PathBuf>,
    /// Agent command the execution engine spawns
    pub agent_command: Option<String>,
}

impl DaemonFileConfig {
    /// Load config from hld.toml
    ///
    /// Search order:
    /// 1. Walk up directory tree from cwd looking for hld.toml
    /// 2. Check ~/.config/hld/hld.toml (global fallback)
    /// 3. Fall back to defaults
    pub fn load() -> Result<Self> {
        if let Some(config_path) = find_config_file("hld.toml") {
            tracing::debug!("Loading config from: {}", config_path.display());
            return Self::load_from_path(&config_path);
        }

        tracing::debug!("No hld.toml found, using defaults");
        Ok(Self::default())
    }

    /// Load from a specific path
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: DaemonFileConfig = toml::from_str(&content)?;
        Ok(config)
    }
}

/// Default socket path (~/.humanlayer/daemon.sock, or /tmp fallback)
pub fn default_socket_path() -> String {
    dirs::home_dir()
        .map(|h| h.join(".humanlayer").join("daemon.sock"))
        .unwrap_or_else(|| PathBuf::from("/tmp/hld-daemon.sock"))
        .to_string_lossy()
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_mcp_config() {
        let json = r#"{
            "mcpServers": {
                "approvals": {
                    "command": "hlyr",
                    "args": ["mcp", "claude_approvals"],
                    "env": {"LOG_LEVEL": "debug"}
                },
                "bare": {
                    "command": "bare-server"
                }
            }
        }"#;

        let config: McpConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.mcp_servers.len(), 2);

        let approvals = &config.mcp_servers["approvals"];
        assert_eq!(approvals.command, "hlyr");
        assert_eq!(approvals.args, vec!["mcp", "claude_approvals"]);
        assert_eq!(approvals.env["LOG_LEVEL"], "debug");

        // Absent env deserializes to an empty map, not an error
        let bare = &config.mcp_servers["bare"];
        assert!(bare.args.is_empty());
        assert!(bare.env.is_empty());
    }

    #[test]
    fn test_parse_daemon_config() {
        let toml_src = r#"
            socket_path = "/tmp/custom.sock"
            db_path = "/tmp/custom.db"
        "#;

        let config: DaemonFileConfig = toml::from_str(toml_src).unwrap();
        assert_eq!(config.socket_path.as_deref(), Some("/tmp/custom.sock"));
        assert_eq!(config.db_path, Some(PathBuf::from("/tmp/custom.db")));
        assert!(config.agent_command.is_none());
    }

    #[test]
    fn test_daemon_config_defaults() {
        let config: DaemonFileConfig = toml::from_str("").unwrap();
        assert!(config.socket_path.is_none());
        assert!(config.db_path.is_none());
    }
}
