//! Notification bus
//!
//! Two channels per agent: a pub/sub channel for live delivery and a bounded
//! durable pending list so late subscribers do not miss events. Producers
//! publish and append in one logical operation; consumers drain the pending
//! list at startup and may trim it after processing.

use crate::error::StoreError;
use crate::store::{keys, StateStore, Subscription};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

/// Current notification schema version.
pub const NOTIFICATION_VERSION: u8 = 1;

/// How many pending notifications are retained per agent.
const PENDING_LIMIT: isize = 100;

/// Events addressed to a single agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// Merge probe found a textual conflict on the task branch
    ConflictDetected,
    /// A required quality check failed during the merge test gate
    TestsFailed,
    /// Merge retries are exhausted; manual intervention required
    MergeFailed,
    /// The task branch was integrated into the mainline
    MergeSuccess,
}

impl EventKind {
    /// Wire name of the event kind.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ConflictDetected => "conflict_detected",
            Self::TestsFailed => "tests_failed",
            Self::MergeFailed => "merge_failed",
            Self::MergeSuccess => "merge_success",
        }
    }
}

/// A notification addressed to one agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    /// Unique event id
    pub id: Uuid,
    /// Schema version
    pub version: u8,
    /// Target agent
    pub agent_id: String,
    /// Task the event concerns
    pub task_id: String,
    /// Event kind
    pub event_kind: EventKind,
    /// Event-specific payload (conflicted files, captured output, ...)
    pub data: serde_json::Value,
    /// Publication time
    pub timestamp: DateTime<Utc>,
}

impl Notification {
    /// Build a notification with the current schema version.
    #[must_use]
    pub fn new(
        agent_id: impl Into<String>,
        task_id: impl Into<String>,
        event_kind: EventKind,
        data: serde_json::Value,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            version: NOTIFICATION_VERSION,
            agent_id: agent_id.into(),
            task_id: task_id.into(),
            event_kind,
            data,
            timestamp: Utc::now(),
        }
    }
}

/// Broadcast events published to every agent (phase activation and backlog
/// completion wake idle claim loops without waiting a full poll interval).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum OrchestratorEvent {
    /// A new phase became active.
    PhaseStarted {
        /// Phase index
        index: u32,
        /// Phase display name
        name: String,
    },
    /// Every phase has completed.
    BacklogComplete,
    /// The reaper reset an orphaned task to pending.
    TaskReset {
        /// The task returned to the pool
        task_id: String,
        /// The dead agent that held it
        agent_id: String,
    },
}

/// Publishes notifications and broadcast events through the state store.
#[derive(Clone)]
pub struct NotificationBus {
    store: Arc<dyn StateStore>,
}

impl NotificationBus {
    /// Create a bus over the shared store.
    #[must_use]
    pub fn new(store: Arc<dyn StateStore>) -> Self {
        Self { store }
    }

    /// Publish to the agent's channel and append to its pending list.
    pub async fn notify_agent(&self, notification: &Notification) -> Result<(), StoreError> {
        let payload = serde_json::to_string(notification)?;
        let channel = keys::agent_channel(&notification.agent_id);
        let pending = keys::agent_pending(&notification.agent_id);

        let receivers = self.store.publish(&channel, &payload).await?;
        self.store.rpush(&pending, &payload).await?;
        // Pending lists are bounded; keep the newest entries.
        self.store.ltrim(&pending, -PENDING_LIMIT, -1).await?;

        debug!(
            agent_id = %notification.agent_id,
            task_id = %notification.task_id,
            event = notification.event_kind.as_str(),
            receivers = receivers,
            "notification published"
        );
        Ok(())
    }

    /// Drain and clear the agent's pending list (called at startup).
    pub async fn drain_pending(&self, agent_id: &str) -> Result<Vec<Notification>, StoreError> {
        let pending = keys::agent_pending(agent_id);
        let raw = self.store.lrange(&pending, 0, -1).await?;
        if !raw.is_empty() {
            self.store.delete(&pending).await?;
        }
        let mut notifications = Vec::with_capacity(raw.len());
        for entry in raw {
            notifications.push(serde_json::from_str(&entry)?);
        }
        Ok(notifications)
    }

    /// Subscribe to an agent's live channel.
    pub async fn subscribe_agent(&self, agent_id: &str) -> Result<Subscription, StoreError> {
        self.store.subscribe(&keys::agent_channel(agent_id)).await
    }

    /// Publish a broadcast event.
    pub async fn broadcast(&self, event: &OrchestratorEvent) -> Result<(), StoreError> {
        let payload = serde_json::to_string(event)?;
        self.store.publish(keys::EVENTS_CHANNEL, &payload).await?;
        Ok(())
    }

    /// Subscribe to broadcast events.
    pub async fn subscribe_events(&self) -> Result<Subscription, StoreError> {
        self.store.subscribe(keys::EVENTS_CHANNEL).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn bus() -> (NotificationBus, Arc<dyn StateStore>) {
        let store: Arc<dyn StateStore> = Arc::new(MemoryStore::new());
        (NotificationBus::new(store.clone()), store)
    }

    #[tokio::test]
    async fn test_notify_appends_to_pending() {
        let (bus, store) = bus();
        let n = Notification::new(
            "agent-1",
            "T001",
            EventKind::TestsFailed,
            serde_json::json!({"output": "assertion failed"}),
        );
        bus.notify_agent(&n).await.unwrap();

        let pending = store
            .lrange(&keys::agent_pending("agent-1"), 0, -1)
            .await
            .unwrap();
        assert_eq!(pending.len(), 1);
        let decoded: Notification = serde_json::from_str(&pending[0]).unwrap();
        assert_eq!(decoded.event_kind, EventKind::TestsFailed);
        assert_eq!(decoded.version, NOTIFICATION_VERSION);
    }

    #[tokio::test]
    async fn test_drain_clears_pending() {
        let (bus, _store) = bus();
        for i in 0..3 {
            let n = Notification::new(
                "agent-1",
                format!("T{i:03}"),
                EventKind::MergeSuccess,
                serde_json::Value::Null,
            );
            bus.notify_agent(&n).await.unwrap();
        }

        let drained = bus.drain_pending("agent-1").await.unwrap();
        assert_eq!(drained.len(), 3);
        assert!(bus.drain_pending("agent-1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_pending_list_is_bounded() {
        let (bus, _store) = bus();
        for i in 0..150 {
            let n = Notification::new(
                "agent-1",
                format!("T{i:03}"),
                EventKind::MergeSuccess,
                serde_json::Value::Null,
            );
            bus.notify_agent(&n).await.unwrap();
        }
        let drained = bus.drain_pending("agent-1").await.unwrap();
        assert_eq!(drained.len(), 100);
        // Oldest entries were trimmed.
        assert_eq!(drained[0].task_id, "T050");
    }

    #[tokio::test]
    async fn test_live_subscriber_receives_event() {
        let (bus, _store) = bus();
        let mut sub = bus.subscribe_agent("agent-1").await.unwrap();

        let n = Notification::new(
            "agent-1",
            "T001",
            EventKind::ConflictDetected,
            serde_json::json!({"files": ["src/lib.rs"]}),
        );
        bus.notify_agent(&n).await.unwrap();

        let raw = tokio::time::timeout(std::time::Duration::from_secs(1), sub.recv())
            .await
            .unwrap()
            .unwrap();
        let decoded: Notification = serde_json::from_str(&raw).unwrap();
        assert_eq!(decoded.task_id, "T001");
    }

    #[tokio::test]
    async fn test_broadcast_round_trip() {
        let (bus, _store) = bus();
        let mut sub = bus.subscribe_events().await.unwrap();

        bus.broadcast(&OrchestratorEvent::PhaseStarted {
            index: 2,
            name: "Development".into(),
        })
        .await
        .unwrap();

        let raw = tokio::time::timeout(std::time::Duration::from_secs(1), sub.recv())
            .await
            .unwrap()
            .unwrap();
        let event: OrchestratorEvent = serde_json::from_str(&raw).unwrap();
        assert!(matches!(event, OrchestratorEvent::PhaseStarted { index: 2, .. }));
    }
}
