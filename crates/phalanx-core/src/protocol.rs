//! Coordinator wire types
//!
//! JSON request/response bodies shared by the HTTP API and the agent client.

use crate::agent::AgentRecord;
use crate::config::OrchestratorConfig;
use crate::phase::Phase;
use crate::task::Task;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// `POST /agent/register`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegisterRequest {
    /// Capability tags (informational)
    #[serde(default)]
    pub capabilities: Vec<String>,
    /// Requested agent id; conflicts are rejected with 409
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preferred_id: Option<String>,
}

/// Registration result: the assigned id plus the orchestrator config
/// snapshot, so runtimes need no separate config file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterResponse {
    /// Assigned agent id
    pub agent_id: String,
    /// Orchestrator configuration snapshot
    pub config: OrchestratorConfig,
}

/// Request body carrying only an agent id (`heartbeat`, `unregister`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentRequest {
    /// Caller's agent id
    pub agent_id: String,
}

/// `POST /task/claim`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClaimRequest {
    /// Caller's agent id
    pub agent_id: String,
}

/// Claim result: a task and derived role, or a reason why none is available.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClaimResponse {
    /// The claimed task, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task: Option<Task>,
    /// Role derived from the task kind
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    /// `no_tasks_available` or `no_active_phase` when `task` is absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Active phase index at claim time
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<u32>,
}

/// `POST /task/complete`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompleteRequest {
    /// Caller's agent id
    pub agent_id: String,
    /// Task being completed
    pub task_id: String,
    /// Outcome: success enqueues a merge, failure finalizes the task
    pub success: bool,
    /// Branch carrying the implementation (required on success)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch_name: Option<String>,
    /// Pull-request handle, when one was created
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pr_handle: Option<String>,
}

/// Completion acknowledgement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompleteResponse {
    /// Always true on 200
    pub success: bool,
    /// Position in the merge queue for success outcomes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queue_position: Option<usize>,
}

/// Computed counters for `GET /status`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StatusStats {
    /// Registered agents
    pub total_agents: usize,
    /// Agents currently working
    pub active_agents: usize,
    /// Agents currently idle
    pub idle_agents: usize,
    /// Tasks in the backlog
    pub total_tasks: usize,
    /// Tasks waiting to be claimed
    pub pending_tasks: usize,
    /// Tasks under an active claim
    pub in_progress_tasks: usize,
    /// Tasks completed and awaiting merge
    pub done_tasks: usize,
    /// Tasks integrated into the mainline
    pub merged_tasks: usize,
    /// Permanently failed tasks
    pub failed_tasks: usize,
    /// Tasks blocked by a failed dependency
    pub blocked_tasks: usize,
    /// Active phase index, absent once the backlog completes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_phase: Option<u32>,
    /// Total number of phases
    pub total_phases: usize,
    /// Depth of the merge FIFO
    pub merge_queue_depth: usize,
}

/// `GET /status`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    /// All registered agents
    pub agents: HashMap<String, AgentRecord>,
    /// All tasks
    pub tasks: HashMap<String, Task>,
    /// All phases
    pub phases: Vec<Phase>,
    /// The active phase, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_phase: Option<Phase>,
    /// Computed counters
    pub stats: StatusStats,
}

/// `POST /cleanup`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CleanupResponse {
    /// Number of tasks reset to pending
    pub recovered: u32,
}

/// Error body for non-2xx responses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Human-readable error
    pub error: String,
}
