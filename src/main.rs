use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use hld::bus::EventBus;
use hld::config::{self, DaemonFileConfig};
use hld::session::{SessionManager, SubprocessEngine};
use hld::store::SqliteStore;

#[derive(Parser)]
#[command(name = "hld")]
#[command(about = "Local daemon that supervises AI coding-agent sessions")]
struct Cli {
    /// Socket path tool-servers use to call back into the daemon
    #[arg(long, env = "HUMANLAYER_DAEMON_SOCKET")]
    socket_path: Option<String>,

    /// SQLite database path for session records
    #[arg(long)]
    db_path: Option<PathBuf>,

    /// Agent command the execution engine spawns per session
    #[arg(long)]
    agent_command: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let file_config = DaemonFileConfig::load()?;

    // Flag > config file > default, resolved exactly once. The manager takes
    // these values at construction and never consults ambient state again.
    let socket_path = cli
        .socket_path
        .or(file_config.socket_path)
        .unwrap_or_else(config::default_socket_path);
    let agent_command = cli
        .agent_command
        .or(file_config.agent_command)
        .unwrap_or_else(|| SubprocessEngine::DEFAULT_COMMAND.to_string());

    let store = Arc::new(match cli.db_path.or(file_config.db_path) {
        Some(path) => SqliteStore::open_at(path)?,
        None => SqliteStore::open()?,
    });

    let bus = EventBus::new();
    let manager = SessionManager::new(bus, store.clone(), socket_path)?
        .with_engine(Arc::new(SubprocessEngine::new(agent_command)));

    tracing::info!(socket_path = %manager.socket_path(), "daemon ready");

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutting down");
    store.close()?;

    Ok(())
}
