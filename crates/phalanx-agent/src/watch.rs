//! Implementation watcher
//!
//! The implementer is a black box: the runtime only observes new commits on
//! the task branch. Polling is the safe fallback for filesystem observation;
//! pub/sub cannot replace it here because the commit happens outside the
//! orchestrator entirely.

use phalanx_git::{GitError, GitRepo};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};

/// Poll the repository head until it advances past `initial_head` or the
/// wall-clock `timeout` elapses. Returns the new head, or `None` on timeout.
pub async fn wait_for_new_commit(
    repo: &GitRepo,
    initial_head: &str,
    poll: Duration,
    timeout: Duration,
) -> Result<Option<String>, GitError> {
    let started = Instant::now();
    let mut last_report = Instant::now();

    loop {
        if started.elapsed() >= timeout {
            info!(timeout_secs = timeout.as_secs(), "no commit observed before timeout");
            return Ok(None);
        }
        tokio::time::sleep(poll).await;

        let head = repo.head().await?;
        if head != initial_head {
            info!(commit = %head, "new commit observed");
            return Ok(Some(head));
        }

        if last_report.elapsed() >= Duration::from_secs(30) {
            debug!(
                elapsed_secs = started.elapsed().as_secs(),
                "still waiting for implementation commit"
            );
            last_report = Instant::now();
        }
    }
}
