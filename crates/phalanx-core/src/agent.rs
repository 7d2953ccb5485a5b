//! Agent registry records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Agent availability state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentState {
    /// Registered, no current task
    #[default]
    Idle,
    /// Holding a claim on a task
    Working,
}

/// A registered agent.
///
/// Invariant: `state == Working` implies `current_task` is set and the
/// referenced task is `in_progress` with `assigned_agent` equal to this id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentRecord {
    /// Registration id (also the notification channel suffix)
    pub agent_id: String,
    /// Availability state
    #[serde(default)]
    pub state: AgentState,
    /// Task currently claimed, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_task: Option<String>,
    /// Role derived from the current task's kind
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_role: Option<String>,
    /// Capability tags supplied at registration
    #[serde(default)]
    pub capabilities: Vec<String>,
    /// Registration time
    pub registered_at: DateTime<Utc>,
    /// Last heartbeat time (reaper input)
    pub last_heartbeat: DateTime<Utc>,
    /// Successful completions
    #[serde(default)]
    pub tasks_completed: u32,
    /// Failed completions
    #[serde(default)]
    pub tasks_failed: u32,
}

impl AgentRecord {
    /// Create a freshly-registered idle agent.
    #[must_use]
    pub fn new(agent_id: impl Into<String>, capabilities: Vec<String>) -> Self {
        let now = Utc::now();
        Self {
            agent_id: agent_id.into(),
            state: AgentState::Idle,
            current_task: None,
            current_role: None,
            capabilities,
            registered_at: now,
            last_heartbeat: now,
            tasks_completed: 0,
            tasks_failed: 0,
        }
    }

    /// Seconds since the last heartbeat, saturating at zero.
    #[must_use]
    pub fn heartbeat_age(&self, now: DateTime<Utc>) -> i64 {
        (now - self.last_heartbeat).num_seconds().max(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_new_agent_is_idle() {
        let agent = AgentRecord::new("agent-1", vec!["rust".into()]);
        assert_eq!(agent.state, AgentState::Idle);
        assert!(agent.current_task.is_none());
        assert_eq!(agent.tasks_completed, 0);
    }

    #[test]
    fn test_heartbeat_age() {
        let mut agent = AgentRecord::new("agent-1", vec![]);
        let now = agent.last_heartbeat + Duration::seconds(90);
        assert_eq!(agent.heartbeat_age(now), 90);

        agent.last_heartbeat = now + Duration::seconds(10);
        assert_eq!(agent.heartbeat_age(now), 0);
    }
}
