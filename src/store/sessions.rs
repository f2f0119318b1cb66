//! Session record operations

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::Row;

use super::{SessionStore, SqliteStore};
use crate::session::{Session, SessionStatus};

fn row_to_session(row: &Row<'_>) -> rusqlite::Result<Session> {
    let mcp_config_str: Option<String> = row.get(4)?;
    let status_str: String = row.get(5)?;
    let created_at: String = row.get(7)?;
    let updated_at: String = row.get(8)?;

    Ok(Session {
        id: row.get(0)?,
        run_id: row.get(1)?,
        query: row.get(2)?,
        working_dir: row.get(3)?,
        mcp_config: mcp_config_str.and_then(|s| serde_json::from_str(&s).ok()),
        status: status_str.parse().unwrap_or(SessionStatus::Pending),
        error: row.get(6)?,
        created_at: DateTime::parse_from_rfc3339(&created_at)
            .unwrap()
            .with_timezone(&Utc),
        updated_at: DateTime::parse_from_rfc3339(&updated_at)
            .unwrap()
            .with_timezone(&Utc),
    })
}

impl SessionStore for SqliteStore {
    fn create_session(&self, session: &Session) -> Result<()> {
        let mcp_config_json = session
            .mcp_config
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        self.with_conn(|conn| {
            conn.execute(
                r#"
                INSERT INTO sessions (id, run_id, query, working_dir, mcp_config,
                                      status, error, created_at, updated_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                "#,
                (
                    &session.id,
                    &session.run_id,
                    &session.query,
                    &session.working_dir,
                    &mcp_config_json,
                    session.status.to_string(),
                    &session.error,
                    session.created_at.to_rfc3339(),
                    session.updated_at.to_rfc3339(),
                ),
            )
            .context("Failed to create session")?;
            Ok(())
        })
    }

    fn get_session(&self, id: &str) -> Result<Option<Session>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                r#"
                SELECT id, run_id, query, working_dir, mcp_config,
                       status, error, created_at, updated_at
                FROM sessions
                WHERE id = ?1
                "#,
            )?;

            match stmt.query_row([id], row_to_session) {
                Ok(session) => Ok(Some(session)),
                Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                Err(e) => Err(e.into()),
            }
        })
    }

    fn update_session_status(
        &self,
        id: &str,
        status: SessionStatus,
        error: Option<&str>,
    ) -> Result<()> {
        let now = Utc::now();

        self.with_conn(|conn| {
            let updated = conn.execute(
                r#"
                UPDATE sessions
                SET status = ?1, error = COALESCE(?2, error), updated_at = ?3
                WHERE id = ?4
                "#,
                (status.to_string(), error, now.to_rfc3339(), id),
            )?;

            if updated == 0 {
                anyhow::bail!("No session with id {}", id);
            }
            Ok(())
        })
    }

    fn list_sessions(&self) -> Result<Vec<Session>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                r#"
                SELECT id, run_id, query, working_dir, mcp_config,
                       status, error, created_at, updated_at
                FROM sessions
                ORDER BY created_at DESC
                "#,
            )?;

            let sessions = stmt
                .query_map([], row_to_session)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(sessions)
        })
    }

    fn close(&self) -> Result<()> {
        SqliteStore::close(self)
    }
}
