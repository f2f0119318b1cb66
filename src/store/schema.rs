//! Database schema definitions and migrations

use anyhow::Result;
use rusqlite::Connection;

/// Current schema version
pub const SCHEMA_VERSION: i32 = 1;

/// Create all tables if they don't exist
pub fn create_tables(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        -- Session records
        CREATE TABLE IF NOT EXISTS sessions (
            id TEXT PRIMARY KEY,
            run_id TEXT NOT NULL UNIQUE,
            query TEXT NOT NULL,
            working_dir TEXT NOT NULL,
            mcp_config TEXT,
            status TEXT NOT NULL,
            error TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );

        -- Index for listing sessions by creation time
        CREATE INDEX IF NOT EXISTS idx_sessions_created
        ON sessions(created_at DESC);

        -- Index for run-id correlation lookups
        CREATE INDEX IF NOT EXISTS idx_sessions_run_id
        ON sessions(run_id);

        -- Schema version tracking
        CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY
        );

        -- Insert initial version if not exists
        INSERT OR IGNORE INTO schema_version (version) VALUES (1);
        "#,
    )?;

    Ok(())
}

/// Get the current schema version
#[allow(dead_code)]
pub fn get_version(conn: &Connection) -> Result<i32> {
    let version: i32 = conn.query_row(
        "SELECT version FROM schema_version ORDER BY version DESC LIMIT 1",
        [],
        |row| row.get(0),
    )?;
    Ok(version)
}
