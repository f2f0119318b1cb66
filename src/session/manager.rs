//! Session manager
//!
//! Owns the launch contract: generates the run ID, injects callback
//! capabilities into the tool-server configuration, persists the session
//! record, publishes lifecycle events, and delegates execution.

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use uuid::Uuid;

use super::engine::{ExecutionEngine, SubprocessEngine};
use super::inject::inject_capabilities;
use super::types::{generate_run_id, Session, SessionConfig, SessionStatus};
use crate::bus::{EventBus, LifecycleEvent};
use crate::store::SessionStore;

/// Orchestrates session launches against the store, bus, and engine
#[derive(Clone)]
pub struct SessionManager {
    bus: EventBus,
    store: Arc<dyn SessionStore>,
    engine: Arc<dyn ExecutionEngine>,
    // Captured by value at construction and fixed for the manager's lifetime.
    // Never re-read from process environment: explicit configuration wins.
    socket_path: String,
}

impl SessionManager {
    /// Create a manager bound to a store, a bus, and the daemon's callback
    /// socket path. An empty path disables callback injection.
    pub fn new(
        bus: EventBus,
        store: Arc<dyn SessionStore>,
        socket_path: impl Into<String>,
    ) -> Result<Self> {
        Ok(Self {
            bus,
            store,
            engine: Arc::new(SubprocessEngine::default()),
            socket_path: socket_path.into(),
        })
    }

    /// Replace the execution engine (defaults to the subprocess engine)
    pub fn with_engine(mut self, engine: Arc<dyn ExecutionEngine>) -> Self {
        self.engine = engine;
        self
    }

    /// The callback socket path this manager was constructed with
    pub fn socket_path(&self) -> &str {
        &self.socket_path
    }

    /// Launch a new session.
    ///
    /// Generates a fresh run ID, injects callback capabilities into every
    /// declared tool-server, persists the session record, publishes a
    /// `session.created` event, and hands execution to the engine in a
    /// detached task. Returns the session handle immediately; persistence
    /// failures abort the launch and surface to the caller.
    pub async fn launch_session(&self, config: SessionConfig) -> Result<Session> {
        let mut config = config;
        let run_id = generate_run_id();
        let session_id = Uuid::new_v4().to_string();

        // Absent tool-server configuration is a valid no-op
        if let Some(mcp_config) = config.mcp_config.as_mut() {
            inject_capabilities(mcp_config, &run_id, &self.socket_path);
        }

        let now = Utc::now();
        let session = Session {
            id: session_id,
            run_id,
            query: config.query.clone(),
            working_dir: config.working_dir.clone(),
            mcp_config: config.mcp_config.clone(),
            status: SessionStatus::Pending,
            error: None,
            created_at: now,
            updated_at: now,
        };

        self.store
            .create_session(&session)
            .context("Failed to persist session")?;

        self.bus
            .publish(LifecycleEvent::session_created(&session.id, &session.run_id));

        tracing::info!(
            session_id = %session.id,
            run_id = %session.run_id,
            "session launched"
        );

        // Delegate execution; the launch path does not wait on the outcome
        let manager = self.clone();
        let task_session = session.clone();
        tokio::spawn(async move {
            manager.run_to_completion(task_session, config).await;
        });

        Ok(session)
    }

    /// Retrieve a session by identifier
    pub fn get_session(&self, session_id: &str) -> Result<Option<Session>> {
        self.store.get_session(session_id)
    }

    /// List all sessions, newest first
    pub fn list_sessions(&self) -> Result<Vec<Session>> {
        self.store.list_sessions()
    }

    /// Record a status transition and publish it on the bus
    pub fn update_session_status(
        &self,
        session_id: &str,
        status: SessionStatus,
        error: Option<&str>,
    ) -> Result<()> {
        let session = self
            .store
            .get_session(session_id)?
            .with_context(|| format!("No session with id {}", session_id))?;

        self.store
            .update_session_status(session_id, status, error)?;
        self.bus
            .publish(LifecycleEvent::status_changed(session_id, &session.run_id, status));
        Ok(())
    }

    /// Drive a delegated session: mark it running, execute, record the
    /// terminal state the engine reports. Recording failures here are logged,
    /// not surfaced: the launch caller has already returned.
    async fn run_to_completion(&self, session: Session, config: SessionConfig) {
        if let Err(e) = self.update_session_status(&session.id, SessionStatus::Running, None) {
            tracing::warn!(session_id = %session.id, "failed to record running status: {}", e);
        }

        let result = self.engine.execute(&session, &config).await;

        let (status, error) = match &result {
            Ok(()) => (SessionStatus::Completed, None),
            Err(e) => (SessionStatus::Failed, Some(e.to_string())),
        };

        if let Err(e) = self.update_session_status(&session.id, status, error.as_deref()) {
            tracing::warn!(session_id = %session.id, "failed to record terminal status: {}", e);
        }

        tracing::info!(
            session_id = %session.id,
            run_id = %session.run_id,
            %status,
            "session finished"
        );
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::{TOPIC_SESSION_CREATED, TOPIC_SESSION_STATUS_CHANGED};
    use crate::config::{McpConfig, McpServerConfig};
    use crate::session::inject::{DAEMON_SOCKET_ENV, RUN_ID_ENV};
    use crate::store::SqliteStore;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use tempfile::{tempdir, TempDir};

    struct MockEngine {
        fail: bool,
    }

    #[async_trait]
    impl ExecutionEngine for MockEngine {
        async fn execute(&self, _session: &Session, _config: &SessionConfig) -> Result<()> {
            if self.fail {
                anyhow::bail!("engine exploded");
            }
            Ok(())
        }
    }

    /// Store whose writes always fail, for surfacing-error tests
    struct FailingStore;

    impl SessionStore for FailingStore {
        fn create_session(&self, _session: &Session) -> Result<()> {
            anyhow::bail!("disk full")
        }
        fn get_session(&self, _id: &str) -> Result<Option<Session>> {
            Ok(None)
        }
        fn update_session_status(
            &self,
            _id: &str,
            _status: SessionStatus,
            _error: Option<&str>,
        ) -> Result<()> {
            anyhow::bail!("disk full")
        }
        fn list_sessions(&self) -> Result<Vec<Session>> {
            Ok(Vec::new())
        }
        fn close(&self) -> Result<()> {
            Ok(())
        }
    }

    fn test_manager(socket_path: &str) -> (SessionManager, TempDir) {
        let dir = tempdir().unwrap();
        let store = SqliteStore::open_at(dir.path().join("test.db")).unwrap();
        let manager = SessionManager::new(EventBus::new(), Arc::new(store), socket_path)
            .unwrap()
            .with_engine(Arc::new(MockEngine { fail: false }));
        (manager, dir)
    }

    fn two_server_config() -> SessionConfig {
        let mut env = HashMap::new();
        env.insert("EXISTING_VAR".to_string(), "value".to_string());

        SessionConfig {
            query: "test query".to_string(),
            working_dir: "/tmp/test".to_string(),
            mcp_config: Some(McpConfig {
                mcp_servers: HashMap::from([
                    (
                        "test-server".to_string(),
                        McpServerConfig {
                            command: "test-command".to_string(),
                            args: vec!["arg1".to_string(), "arg2".to_string()],
                            env,
                        },
                    ),
                    (
                        "another-server".to_string(),
                        McpServerConfig {
                            command: "another-command".to_string(),
                            // No existing env
                            ..Default::default()
                        },
                    ),
                ]),
            }),
        }
    }

    #[tokio::test]
    async fn test_socket_path_passed_to_servers() {
        let socket_path = "/tmp/test-daemon.sock";
        let (manager, _dir) = test_manager(socket_path);
        assert_eq!(manager.socket_path(), socket_path);

        let session = manager.launch_session(two_server_config()).await.unwrap();

        let mcp_config = session.mcp_config.as_ref().unwrap();
        assert_eq!(mcp_config.mcp_servers.len(), 2);

        let test_server = &mcp_config.mcp_servers["test-server"];
        assert_eq!(test_server.env[DAEMON_SOCKET_ENV], socket_path);
        assert_eq!(test_server.env[RUN_ID_ENV], session.run_id);
        // Existing env vars are preserved
        assert_eq!(test_server.env["EXISTING_VAR"], "value");

        let another_server = &mcp_config.mcp_servers["another-server"];
        assert_eq!(another_server.env[DAEMON_SOCKET_ENV], socket_path);
        assert_eq!(another_server.env[RUN_ID_ENV], session.run_id);

        // The injected configuration is what got persisted
        let stored = manager.get_session(&session.id).unwrap().unwrap();
        let stored_config = stored.mcp_config.unwrap();
        assert_eq!(
            stored_config.mcp_servers["test-server"].env[DAEMON_SOCKET_ENV],
            socket_path
        );
    }

    #[tokio::test]
    async fn test_socket_path_not_set_when_empty() {
        let (manager, _dir) = test_manager("");
        assert!(manager.socket_path().is_empty());

        let config = SessionConfig {
            query: "test query".to_string(),
            working_dir: "/tmp/test".to_string(),
            mcp_config: Some(McpConfig {
                mcp_servers: HashMap::from([(
                    "test-server".to_string(),
                    McpServerConfig {
                        command: "test-command".to_string(),
                        ..Default::default()
                    },
                )]),
            }),
        };

        let session = manager.launch_session(config).await.unwrap();

        let server = &session.mcp_config.as_ref().unwrap().mcp_servers["test-server"];
        assert!(!server.env.contains_key(DAEMON_SOCKET_ENV));
        assert_eq!(server.env[RUN_ID_ENV], session.run_id);
    }

    #[tokio::test]
    async fn test_socket_path_ignores_ambient_environment() {
        // An ambient variable of the same name must have no effect
        std::env::set_var(DAEMON_SOCKET_ENV, "/tmp/env-daemon.sock");

        let manager_socket_path = "/tmp/manager-socket.sock";
        let (manager, _dir) = test_manager(manager_socket_path);
        assert_eq!(manager.socket_path(), manager_socket_path);

        // Changing it after construction has no effect either
        std::env::set_var(DAEMON_SOCKET_ENV, "/tmp/other.sock");
        assert_eq!(manager.socket_path(), manager_socket_path);

        std::env::remove_var(DAEMON_SOCKET_ENV);
    }

    #[tokio::test]
    async fn test_launch_without_mcp_config_is_noop() {
        let (manager, _dir) = test_manager("/tmp/test-daemon.sock");

        let session = manager
            .launch_session(SessionConfig {
                query: "test query".to_string(),
                working_dir: "/tmp/test".to_string(),
                mcp_config: None,
            })
            .await
            .unwrap();

        assert!(session.mcp_config.is_none());
        assert!(!session.run_id.is_empty());
        assert!(manager.get_session(&session.id).unwrap().is_some());
    }

    #[tokio::test]
    async fn test_launch_publishes_created_event() {
        let (manager, _dir) = test_manager("/tmp/test-daemon.sock");
        let bus = manager.bus.clone();
        let mut sub = bus.subscribe(TOPIC_SESSION_CREATED);

        let session = manager.launch_session(two_server_config()).await.unwrap();

        let event = sub.recv().await.unwrap();
        assert_eq!(event.session_id, session.id);
        assert_eq!(event.run_id, session.run_id);
    }

    #[tokio::test]
    async fn test_lifecycle_transitions_recorded() {
        let (manager, _dir) = test_manager("/tmp/test-daemon.sock");
        let mut sub = manager.bus.subscribe(TOPIC_SESSION_STATUS_CHANGED);

        let session = manager.launch_session(two_server_config()).await.unwrap();

        let running = sub.recv().await.unwrap();
        assert_eq!(running.session_id, session.id);
        assert_eq!(running.status, Some(SessionStatus::Running));

        let done = sub.recv().await.unwrap();
        assert_eq!(done.status, Some(SessionStatus::Completed));

        // Store was updated before the event went out
        let stored = manager.get_session(&session.id).unwrap().unwrap();
        assert_eq!(stored.status, SessionStatus::Completed);
    }

    #[tokio::test]
    async fn test_engine_failure_marks_session_failed() {
        let dir = tempdir().unwrap();
        let store = SqliteStore::open_at(dir.path().join("test.db")).unwrap();
        let manager = SessionManager::new(
            EventBus::new(),
            Arc::new(store),
            "/tmp/test-daemon.sock",
        )
        .unwrap()
        .with_engine(Arc::new(MockEngine { fail: true }));

        let mut sub = manager.bus.subscribe(TOPIC_SESSION_STATUS_CHANGED);
        let session = manager.launch_session(two_server_config()).await.unwrap();

        assert_eq!(
            sub.recv().await.unwrap().status,
            Some(SessionStatus::Running)
        );
        assert_eq!(
            sub.recv().await.unwrap().status,
            Some(SessionStatus::Failed)
        );

        let stored = manager.get_session(&session.id).unwrap().unwrap();
        assert_eq!(stored.status, SessionStatus::Failed);
        assert!(stored.error.unwrap().contains("engine exploded"));
    }

    #[tokio::test]
    async fn test_store_failure_surfaces_and_publishes_nothing() {
        let bus = EventBus::new();
        let mut sub = bus.subscribe(TOPIC_SESSION_CREATED);

        let manager = SessionManager::new(
            bus.clone(),
            Arc::new(FailingStore),
            "/tmp/test-daemon.sock",
        )
        .unwrap()
        .with_engine(Arc::new(MockEngine { fail: false }));

        let err = manager
            .launch_session(two_server_config())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Failed to persist session"));

        // Nothing was announced for the failed launch; the marker published
        // next is the first event the subscriber sees.
        bus.publish(LifecycleEvent::session_created("marker", "marker-run"));
        assert_eq!(sub.recv().await.unwrap().session_id, "marker");
    }

    #[tokio::test]
    async fn test_run_ids_unique_across_launches() {
        let (manager, _dir) = test_manager("/tmp/test-daemon.sock");

        let a = manager.launch_session(two_server_config()).await.unwrap();
        let b = manager.launch_session(two_server_config()).await.unwrap();

        assert_ne!(a.run_id, b.run_id);
        assert_ne!(a.id, b.id);
    }

    #[tokio::test]
    async fn test_concurrent_launches_are_independent() {
        let (manager, _dir) = test_manager("/tmp/test-daemon.sock");

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let manager = manager.clone();
                tokio::spawn(async move { manager.launch_session(two_server_config()).await })
            })
            .collect();

        let mut run_ids = Vec::new();
        for handle in handles {
            let session = handle.await.unwrap().unwrap();
            // Each launch got its own injected copy
            let server = &session.mcp_config.as_ref().unwrap().mcp_servers["test-server"];
            assert_eq!(server.env[RUN_ID_ENV], session.run_id);
            run_ids.push(session.run_id);
        }

        run_ids.sort();
        run_ids.dedup();
        assert_eq!(run_ids.len(), 8);
    }
}
