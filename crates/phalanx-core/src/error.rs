//! Error types for phalanx-core
//!
//! Each subsystem exposes its own `thiserror` enum; the coordinator error
//! wraps the lower layers so HTTP handlers can map variants to status codes.

use thiserror::Error;

/// State store error
#[derive(Debug, Error)]
pub enum StoreError {
    /// Connection-level failure that survived the retry budget.
    #[error("transient store failure after {attempts} attempts: {message}")]
    Transient {
        /// Number of attempts made before giving up
        attempts: u32,
        /// Last underlying error message
        message: String,
    },

    /// Non-retryable backend failure (protocol error, bad reply type).
    #[error("store error: {0}")]
    Backend(String),

    /// JSON serialization/deserialization of a stored value failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Mutex lock was poisoned by a panicking thread (in-memory store only).
    #[error("lock poisoned")]
    Poisoned,
}

impl StoreError {
    /// Whether the error is a transient connection failure worth surfacing
    /// as 503 to callers.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }
}

/// Backlog validation and phase compilation error
#[derive(Debug, Error)]
pub enum BacklogError {
    /// The backlog contains no tasks.
    #[error("backlog is empty")]
    Empty,

    /// A task record is missing a required field.
    #[error("task #{index}: missing required field `{field}`")]
    MissingField {
        /// 1-based position of the record in the backlog
        index: usize,
        /// Name of the absent field
        field: &'static str,
    },

    /// Two task records share the same id.
    #[error("duplicate task id: {0}")]
    DuplicateId(String),

    /// Task kind is not one of the allowed set.
    #[error("task {task}: invalid kind `{kind}` (expected one of: setup, development, testing, security, documentation, review)")]
    InvalidKind {
        /// Offending task id
        task: String,
        /// The rejected kind value
        kind: String,
    },

    /// Priority is not H, M or L.
    #[error("task {task}: invalid priority `{value}` (expected H, M or L)")]
    InvalidPriority {
        /// Offending task id
        task: String,
        /// The rejected priority value
        value: String,
    },

    /// `dependencies` is present but not a list of task ids.
    #[error("task {task}: `dependencies` must be a list of task ids")]
    InvalidDependencies {
        /// Offending task id
        task: String,
    },

    /// A dependency references a task id absent from the backlog.
    #[error("task {task}: dependency `{dependency}` not found in backlog")]
    UnknownDependency {
        /// Offending task id
        task: String,
        /// The missing dependency id
        dependency: String,
    },

    /// The dependency graph contains a cycle.
    #[error("dependency cycle detected; tasks involved: {tasks}; shortest cycle: {path}", tasks = .tasks.join(", "), path = .path.join(" -> "))]
    Cycle {
        /// All task ids with unresolved in-degree after peeling
        tasks: Vec<String>,
        /// Shortest cycle path, closed (first id repeated at the end)
        path: Vec<String>,
    },

    /// YAML parsing failed before validation could run.
    #[error("failed to parse backlog: {0}")]
    Parse(#[from] serde_yaml::Error),

    /// Store write failed while seeding tasks and phases.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Coordinator operation error
#[derive(Debug, Error)]
pub enum CoordinatorError {
    /// Agent id is not present in the registry.
    #[error("agent not registered: {0}")]
    UnknownAgent(String),

    /// Task id is not present in the backlog.
    #[error("task not found: {0}")]
    UnknownTask(String),

    /// Registration asked for an id that is already taken.
    #[error("agent id already registered: {0}")]
    AgentIdTaken(String),

    /// Caller does not hold the claim lock for the task.
    #[error("claim lock for task {task} is not held by agent {agent}")]
    LockNotHeld {
        /// Task whose lock was checked
        task: String,
        /// Agent that attempted the operation
        agent: String,
    },

    /// Task is assigned to a different agent.
    #[error("task {task} is assigned to a different agent")]
    WrongAgent {
        /// Task whose assignment was checked
        task: String,
    },

    /// The requested status transition is not allowed from the task's
    /// current state (e.g. completing an already-merged task).
    #[error("task {task} cannot transition from status `{status}`")]
    InvalidTransition {
        /// Task id
        task: String,
        /// Current status that rejected the transition
        status: String,
    },

    /// A successful completion did not carry a branch name.
    #[error("completion of task {0} requires a branch name")]
    MissingBranch(String),

    /// Store failure (may be transient).
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Stored record could not be decoded.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
