//! Session persistence
//!
//! SQLite-backed storage for session records in ~/.humanlayer/daemon.db

pub mod schema;
pub mod sessions;

use anyhow::{Context, Result};
use rusqlite::Connection;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use crate::session::{Session, SessionStatus};

/// Storage contract the session manager consumes.
///
/// Implementations must be safe under concurrent use by multiple launches.
pub trait SessionStore: Send + Sync {
    /// Persist a new session record
    fn create_session(&self, session: &Session) -> Result<()>;

    /// Retrieve a session by identifier
    fn get_session(&self, id: &str) -> Result<Option<Session>>;

    /// Record a status transition, bumping the update timestamp
    fn update_session_status(
        &self,
        id: &str,
        status: SessionStatus,
        error: Option<&str>,
    ) -> Result<()>;

    /// List all sessions, newest first
    fn list_sessions(&self) -> Result<Vec<Session>>;

    /// Release resources. Safe to call multiple times.
    fn close(&self) -> Result<()>;
}

/// SQLite store with thread-safe access
#[derive(Clone)]
pub struct SqliteStore {
    // Option so close() can take the connection and stay idempotent
    conn: Arc<Mutex<Option<Connection>>>,
}

impl SqliteStore {
    /// Open or create the database at the default location (~/.humanlayer/daemon.db)
    pub fn open() -> Result<Self> {
        let path = Self::default_path()?;
        Self::open_at(path)
    }

    /// Open or create the database at a specific path
    pub fn open_at(path: PathBuf) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {:?}", parent))?;
        }

        let conn = Connection::open(&path)
            .with_context(|| format!("Failed to open database at {:?}", path))?;

        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        schema::create_tables(&conn)?;

        tracing::info!("Session store opened at {:?}", path);
        Ok(Self {
            conn: Arc::new(Mutex::new(Some(conn))),
        })
    }

    /// Get the default database path
    pub fn default_path() -> Result<PathBuf> {
        let home = dirs::home_dir().context("Could not determine home directory")?;
        Ok(home.join(".humanlayer").join("daemon.db"))
    }

    /// Run an operation against the live connection, erroring after close
    pub(crate) fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let guard = self.conn.lock().unwrap();
        let conn = guard.as_ref().context("Session store is closed")?;
        f(conn)
    }

    /// Close the underlying connection. Idempotent.
    pub fn close(&self) -> Result<()> {
        let mut guard = self.conn.lock().unwrap();
        if let Some(conn) = guard.take() {
            conn.close()
                .map_err(|(_, e)| e)
                .context("Failed to close database")?;
            tracing::debug!("Session store closed");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_store_open() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.db");
        let store = SqliteStore::open_at(path.clone()).unwrap();
        assert!(path.exists());
        drop(store);
    }

    #[test]
    fn test_close_is_idempotent() {
        let dir = tempdir().unwrap();
        let store = SqliteStore::open_at(dir.path().join("test.db")).unwrap();

        store.close().unwrap();
        store.close().unwrap();
    }

    #[test]
    fn test_operations_after_close_error() {
        let dir = tempdir().unwrap();
        let store = SqliteStore::open_at(dir.path().join("test.db")).unwrap();
        store.close().unwrap();

        let err = store.with_conn(|_| Ok(())).unwrap_err();
        assert!(err.to_string().contains("closed"));
    }
}
