//! Execution phases
//!
//! A phase is a maximal set of tasks with no ordering relation between them;
//! phase k activates only after phase k-1 completes, and a phase completes
//! only when every task in it has a terminal status.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Phase lifecycle status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseStatus {
    /// Not yet activated
    #[default]
    Pending,
    /// Currently accepting claims
    Active,
    /// All tasks reached a terminal status
    Completed,
}

/// A topological phase of the backlog.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Phase {
    /// 1-based phase index
    pub index: u32,
    /// Display name (single shared kind, or "Phase N")
    pub name: String,
    /// Task ids in this phase (claimable in any order)
    pub tasks: Vec<String>,
    /// Lifecycle status
    #[serde(default)]
    pub status: PhaseStatus,
    /// When the phase was activated
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    /// When the last task reached a terminal status
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl Phase {
    /// Create a pending phase.
    #[must_use]
    pub fn new(index: u32, name: impl Into<String>, tasks: Vec<String>) -> Self {
        Self {
            index,
            name: name.into(),
            tasks,
            status: PhaseStatus::Pending,
            started_at: None,
            completed_at: None,
        }
    }

    /// Mark the phase active.
    pub fn activate(&mut self, now: DateTime<Utc>) {
        self.status = PhaseStatus::Active;
        self.started_at = Some(now);
    }

    /// Mark the phase completed.
    pub fn complete(&mut self, now: DateTime<Utc>) {
        self.status = PhaseStatus::Completed;
        self.completed_at = Some(now);
    }
}
