//! Lifecycle event bus
//!
//! Topic-based pub/sub for session lifecycle notifications. Delivery is
//! at-most-once to currently-registered subscribers: there is no replay for
//! late subscribers, and a publisher never blocks on a slow or absent one.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::session::SessionStatus;

/// Topic for newly created sessions
pub const TOPIC_SESSION_CREATED: &str = "session.created";

/// Topic for session status transitions
pub const TOPIC_SESSION_STATUS_CHANGED: &str = "session.status_changed";

/// Per-topic channel capacity. A subscriber that lags behind by more than
/// this loses the oldest events instead of stalling the publisher.
const CHANNEL_CAPACITY: usize = 256;

// ============================================================================
// Events
// ============================================================================

/// A lifecycle notification, immutable once published
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LifecycleEvent {
    pub topic: String,
    pub session_id: String,
    pub run_id: String,
    /// Set on status-change events
    pub status: Option<SessionStatus>,
    pub timestamp: DateTime<Utc>,
}

impl LifecycleEvent {
    /// Event announcing a newly created session
    pub fn session_created(session_id: &str, run_id: &str) -> Self {
        Self {
            topic: TOPIC_SESSION_CREATED.to_string(),
            session_id: session_id.to_string(),
            run_id: run_id.to_string(),
            status: None,
            timestamp: Utc::now(),
        }
    }

    /// Event announcing a session status transition
    pub fn status_changed(session_id: &str, run_id: &str, status: SessionStatus) -> Self {
        Self {
            topic: TOPIC_SESSION_STATUS_CHANGED.to_string(),
            session_id: session_id.to_string(),
            run_id: run_id.to_string(),
            status: Some(status),
            timestamp: Utc::now(),
        }
    }
}

// ============================================================================
// Event Bus
// ============================================================================

/// Thread-safe pub/sub bus, cheap to clone and share across tasks
#[derive(Clone, Default)]
pub struct EventBus {
    topics: Arc<Mutex<HashMap<String, broadcast::Sender<LifecycleEvent>>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish an event to its topic.
    ///
    /// Returns the number of subscribers the event was delivered to. Events
    /// published with no registered subscriber are dropped. Never blocks.
    pub fn publish(&self, event: LifecycleEvent) -> usize {
        let mut topics = self.topics.lock().unwrap();

        let delivered = match topics.get(&event.topic) {
            Some(sender) => sender.send(event.clone()).unwrap_or(0),
            None => 0,
        };

        // Prune channels whose subscribers have all gone away
        topics.retain(|_, sender| sender.receiver_count() > 0);

        tracing::trace!(
            topic = %event.topic,
            session_id = %event.session_id,
            delivered,
            "published lifecycle event"
        );
        delivered
    }

    /// Register a subscriber for a topic.
    ///
    /// Only events published after this call are delivered.
    pub fn subscribe(&self, topic: &str) -> Subscription {
        let mut topics = self.topics.lock().unwrap();
        let sender = topics
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);

        Subscription {
            topic: topic.to_string(),
            receiver: sender.subscribe(),
        }
    }

    /// Number of subscribers currently registered for a topic
    pub fn subscriber_count(&self, topic: &str) -> usize {
        let topics = self.topics.lock().unwrap();
        topics
            .get(topic)
            .map(|sender| sender.receiver_count())
            .unwrap_or(0)
    }
}

/// A registered subscription; dropping it unsubscribes
pub struct Subscription {
    topic: String,
    receiver: broadcast::Receiver<LifecycleEvent>,
}

impl Subscription {
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Receive the next event on this topic.
    ///
    /// Returns None once the bus itself has been dropped. Lagged events are
    /// skipped, not redelivered.
    pub async fn recv(&mut self) -> Option<LifecycleEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    tracing::warn!(topic = %self.topic, missed, "subscriber lagged, events dropped");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Deregister this subscription
    pub fn unsubscribe(self) {
        drop(self);
    }
}

// ============================================================================
// Tests
// ============================================================================
