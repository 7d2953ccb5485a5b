//! Phalanx Core - Orchestration Engine
//!
//! This crate provides the shared core of the phalanx multi-agent task
//! orchestrator, including:
//! - Domain model: tasks, agents, phases, merge requests
//! - Backlog: validation and topological phase compilation
//! - Store: durable state adapter (Redis in production, in-memory for tests)
//! - Coordinator: registration, atomic task claims, completion
//! - Scheduler: phase advancement and backlog completion
//! - Reaper: orphaned-claim recovery for dead agents
//! - Notify: per-agent notifications and broadcast events
//! - Util: retry with exponential backoff

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod agent;
pub mod audit;
pub mod backlog;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod notify;
pub mod phase;
pub mod protocol;
pub mod reaper;
pub mod scheduler;
pub mod shutdown;
pub mod store;
pub mod task;
pub mod util;

pub use agent::{AgentRecord, AgentState};
pub use config::{GitConfig, OrchestratorConfig, QualityCheck, TimeoutsConfig};
pub use coordinator::{ClaimOutcome, Coordinator};
pub use error::{BacklogError, CoordinatorError, StoreError};
pub use notify::{EventKind, Notification, NotificationBus, OrchestratorEvent};
pub use phase::{Phase, PhaseStatus};
pub use reaper::Reaper;
pub use scheduler::{PhaseScheduler, PhaseTransition};
pub use shutdown::ShutdownController;
pub use store::{MemoryStore, RedisStore, StateStore, Subscription};
pub use task::{MergeRequest, Priority, Task, TaskKind, TaskStatus};
