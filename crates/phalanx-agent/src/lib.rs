//! Phalanx Agent - task execution runtime
//!
//! Claims tasks from the coordinator, supervises the external implementer's
//! git commits on a per-task branch, runs local quality gates, publishes
//! results (push / PR) and drives the auto-fix loop on merge-coordinator
//! notifications.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod client;
pub mod error;
pub mod runtime;
pub mod watch;
pub mod workspace;

pub use client::CoordinatorClient;
pub use error::AgentError;
pub use runtime::AgentRuntime;
pub use watch::wait_for_new_commit;
pub use workspace::{FixContext, Workspace};
