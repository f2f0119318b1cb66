//! Execution engine seam
//!
//! The manager hands a prepared session to an engine and records the outcome
//! it reports back. The default engine spawns the agent CLI as a subprocess.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::PathBuf;
use tokio::process::Command;

use super::types::{Session, SessionConfig};
use crate::config::McpConfig;

/// Executes a launched session to completion
#[async_trait]
pub trait ExecutionEngine: Send + Sync {
    /// Run the session. Returning Err marks the session failed.
    async fn execute(&self, session: &Session, config: &SessionConfig) -> Result<()>;
}

/// Default engine: spawns the agent command as a subprocess
pub struct SubprocessEngine {
    command: String,
}

impl SubprocessEngine {
    /// Default agent command spawned per session
    pub const DEFAULT_COMMAND: &'static str = "claude";

    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }

    /// Materialize the injected tool-server configuration as a JSON file the
    /// agent CLI can consume. Named by run ID so concurrent launches never
    /// collide.
    fn write_mcp_config(run_id: &str, mcp_config: &McpConfig) -> Result<PathBuf> {
        let mut expanded = mcp_config.clone();
        for server in expanded.mcp_servers.values_mut() {
            for value in server.env.values_mut() {
                let expanded = shellexpand::env(value.as_str())
                    .map(|expanded| expanded.into_owned())
                    .unwrap_or_else(|_| value.clone());
                *value = expanded;
            }
        }

        let path = std::env::temp_dir().join(format!("hld-mcp-{}.json", run_id));
        let content = serde_json::to_string_pretty(&expanded)?;
        std::fs::write(&path, content)
            .with_context(|| format!("Failed to write MCP config to {:?}", path))?;
        Ok(path)
    }
}

impl Default for SubprocessEngine {
    fn default() -> Self {
        Self::new(Self::DEFAULT_COMMAND)
    }
}

#[async_trait]
impl ExecutionEngine for SubprocessEngine {
    async fn execute(&self, session: &Session, config: &SessionConfig) -> Result<()> {
        let mut cmd = Command::new(&self.command);
        cmd.arg("-p").arg(&config.query);

        if !config.working_dir.is_empty() {
            cmd.current_dir(&config.working_dir);
        }

        let mcp_config_path = match &session.mcp_config {
            Some(mcp_config) => {
                let path = Self::write_mcp_config(&session.run_id, mcp_config)?;
                cmd.arg("--mcp-config").arg(&path);
                Some(path)
            }
            None => None,
        };

        tracing::debug!(
            session_id = %session.id,
            run_id = %session.run_id,
            command = %self.command,
            "spawning agent process"
        );

        let status = cmd
            .status()
            .await
            .with_context(|| format!("Failed to spawn agent command '{}'", self.command));

        if let Some(path) = mcp_config_path {
            let _ = std::fs::remove_file(path);
        }

        let status = status?;
        if !status.success() {
            anyhow::bail!("Agent process exited with {}", status);
        }
        Ok(())
    }
}
