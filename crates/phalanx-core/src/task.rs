//! Task domain model
//!
//! Tasks are the unit of work dispatched to agents. They are stored as JSON
//! values in the `orchestrator:tasks` hash and move through the lifecycle
//! described by [`TaskStatus`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Closed set of task kinds; each maps to an agent role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    /// Environment / scaffolding work
    Setup,
    /// Feature implementation
    Development,
    /// Test authoring
    Testing,
    /// Security review / hardening
    Security,
    /// Documentation
    Documentation,
    /// Code review
    Review,
}

impl TaskKind {
    /// All recognized kinds, in declaration order.
    pub const ALL: [TaskKind; 6] = [
        TaskKind::Setup,
        TaskKind::Development,
        TaskKind::Testing,
        TaskKind::Security,
        TaskKind::Documentation,
        TaskKind::Review,
    ];

    /// Parse a backlog kind string.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "setup" => Some(Self::Setup),
            "development" => Some(Self::Development),
            "testing" => Some(Self::Testing),
            "security" => Some(Self::Security),
            "documentation" => Some(Self::Documentation),
            "review" => Some(Self::Review),
            _ => None,
        }
    }

    /// Wire name of the kind.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Setup => "setup",
            Self::Development => "development",
            Self::Testing => "testing",
            Self::Security => "security",
            Self::Documentation => "documentation",
            Self::Review => "review",
        }
    }

    /// Agent role derived from the kind.
    #[must_use]
    pub fn role(&self) -> &'static str {
        match self {
            Self::Setup => "setup-specialist",
            Self::Development => "developer",
            Self::Testing => "tester",
            Self::Security => "security-auditor",
            Self::Documentation => "technical-writer",
            Self::Review => "code-reviewer",
        }
    }
}

impl std::fmt::Display for TaskKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Task priority. Sorting ascending yields H before M before L.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum Priority {
    /// High
    #[serde(rename = "H")]
    High,
    /// Medium (default)
    #[default]
    #[serde(rename = "M")]
    Medium,
    /// Low
    #[serde(rename = "L")]
    Low,
}

impl Priority {
    /// Parse a backlog priority string.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "H" => Some(Self::High),
            "M" => Some(Self::Medium),
            "L" => Some(Self::Low),
            _ => None,
        }
    }
}

/// Task lifecycle status.
///
/// ```text
/// pending -> in_progress -> done -> merged
///                      \-> failed
///                      \-> blocked            (dependency failed)
/// done -> conflict | test_failed | merge_failed -> done   (after agent fix)
/// merge_failed (max retries) -> failed
/// ```
///
/// Terminal states for phase accounting are `merged`, `failed` and `blocked`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Waiting to be claimed
    #[default]
    Pending,
    /// Claimed by an agent, under an exclusive lock
    InProgress,
    /// Implementation complete, queued for merge
    Done,
    /// Merge probe found a textual conflict; awaiting agent fix
    Conflict,
    /// Quality gate failed during merge; awaiting agent fix
    TestFailed,
    /// A merge attempt failed; will be retried up to the retry budget
    MergeFailed,
    /// Integrated into the mainline
    Merged,
    /// Permanently failed
    Failed,
    /// A dependency failed; treated as terminal
    Blocked,
}

impl TaskStatus {
    /// Whether the status permits phase advancement.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Merged | Self::Failed | Self::Blocked)
    }

    /// Statuses the agent fix loop can re-complete from.
    #[must_use]
    pub fn is_fixable(&self) -> bool {
        matches!(self, Self::Conflict | Self::TestFailed | Self::MergeFailed)
    }

    /// Wire name of the status.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Done => "done",
            Self::Conflict => "conflict",
            Self::TestFailed => "test_failed",
            Self::MergeFailed => "merge_failed",
            Self::Merged => "merged",
            Self::Failed => "failed",
            Self::Blocked => "blocked",
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A unit of work in the backlog.
///
/// Unknown fields from the backlog input are preserved in `extra` but never
/// interpreted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Opaque id, unique within a backlog
    pub id: String,
    /// Human-readable title
    pub title: String,
    /// Free-text description
    #[serde(default)]
    pub description: String,
    /// Task kind (selects the agent role and quality profile)
    pub kind: TaskKind,
    /// Scheduling priority within a phase
    #[serde(default)]
    pub priority: Priority,
    /// Ids of tasks that must be merged before this one can be claimed
    #[serde(default)]
    pub dependencies: Vec<String>,
    /// Free-text acceptance criteria passed to the implementer
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acceptance_criteria: Option<String>,
    /// Lifecycle status
    #[serde(default)]
    pub status: TaskStatus,
    /// Agent currently (or last) assigned
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assigned_agent: Option<String>,
    /// Branch the implementation lives on
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch_name: Option<String>,
    /// Hosting-provider pull-request handle, when remote mode created one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pr_handle: Option<String>,
    /// Merge retry count (owned by the merge coordinator)
    #[serde(default)]
    pub retry_count: u32,
    /// Diagnostic set when the task transitions to `blocked`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blocked_reason: Option<String>,
    /// When the task was loaded into the store
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    /// When the task was last claimed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claimed_at: Option<DateTime<Utc>>,
    /// When the agent signalled completion
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// When the merge coordinator integrated the branch
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub merged_at: Option<DateTime<Utc>>,
    /// Unknown backlog fields, preserved verbatim
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl Task {
    /// Create a pending task with the minimum required fields.
    #[must_use]
    pub fn new(id: impl Into<String>, title: impl Into<String>, kind: TaskKind) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            description: String::new(),
            kind,
            priority: Priority::default(),
            dependencies: Vec::new(),
            acceptance_criteria: None,
            status: TaskStatus::Pending,
            assigned_agent: None,
            branch_name: None,
            pr_handle: None,
            retry_count: 0,
            blocked_reason: None,
            created_at: Some(Utc::now()),
            claimed_at: None,
            completed_at: None,
            merged_at: None,
            extra: serde_json::Map::new(),
        }
    }

    /// Add a dependency.
    #[must_use]
    pub fn with_dependency(mut self, dep: impl Into<String>) -> Self {
        self.dependencies.push(dep.into());
        self
    }

    /// Set the priority.
    #[must_use]
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }
}

/// Record enqueued on successful completion and consumed by the sequential
/// merge worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergeRequest {
    /// Task being integrated
    pub task_id: String,
    /// Branch carrying the implementation
    pub branch_name: String,
    /// Pull-request handle (absent in local-only mode)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pr_handle: Option<String>,
    /// Agent that completed the task (notification target)
    pub agent_id: String,
    /// Enqueue time
    pub queued_at: DateTime<Utc>,
    /// Attempts made so far
    #[serde(default)]
    pub retry_count: u32,
}

impl MergeRequest {
    /// Build a fresh merge request.
    #[must_use]
    pub fn new(
        task_id: impl Into<String>,
        branch_name: impl Into<String>,
        pr_handle: Option<String>,
        agent_id: impl Into<String>,
    ) -> Self {
        Self {
            task_id: task_id.into(),
            branch_name: branch_name.into(),
            pr_handle,
            agent_id: agent_id.into(),
            queued_at: Utc::now(),
            retry_count: 0,
        }
    }
}
