//! State store key layout
//!
//! A single namespace holds all shared truth. Keys mirror the layout the
//! merge worker, coordinator and reaper agree on; nothing else may write
//! these keys.

/// Hash of tasks keyed by task id.
pub const TASKS: &str = "orchestrator:tasks";
/// Hash of agents keyed by agent id.
pub const AGENTS: &str = "orchestrator:agents";
/// JSON array of all phases.
pub const PHASES: &str = "orchestrator:phases";
/// JSON value of the currently active phase (absent once the backlog is done).
pub const CURRENT_PHASE: &str = "orchestrator:current_phase";
/// Snapshot of the orchestrator config, written at initialization.
pub const CONFIG: &str = "orchestrator:config";
/// FIFO list of pending merge requests.
pub const MERGE_QUEUE: &str = "orchestrator:merge_queue";
/// Hash of in-flight merges keyed by task id (expires as a liveness guard).
pub const ACTIVE_MERGES: &str = "orchestrator:active_merges";
/// Append-only audit log of phase transitions and terminal task events.
pub const AUDIT_LOG: &str = "orchestrator:audit";
/// Broadcast channel for phase activation and backlog completion events.
pub const EVENTS_CHANNEL: &str = "orchestrator:events";

/// Expiring exclusive lease on a task.
#[must_use]
pub fn task_lock(task_id: &str) -> String {
    format!("task_lock:{task_id}")
}

/// Per-agent notification pub/sub channel.
#[must_use]
pub fn agent_channel(agent_id: &str) -> String {
    format!("agent:{agent_id}:notifications")
}

/// Per-agent durable pending-notification list.
#[must_use]
pub fn agent_pending(agent_id: &str) -> String {
    format!("agent:{agent_id}:notifications:pending")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_shapes() {
        assert_eq!(task_lock("T001"), "task_lock:T001");
        assert_eq!(agent_channel("agent-1"), "agent:agent-1:notifications");
        assert_eq!(
            agent_pending("agent-1"),
            "agent:agent-1:notifications:pending"
        );
    }
}
