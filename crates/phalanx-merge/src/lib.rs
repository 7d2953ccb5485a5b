//! Phalanx Merge - sequential merge coordinator
//!
//! A single worker consumes the merge FIFO and integrates completed task
//! branches into the mainline:
//!
//! 1. refresh mainline
//! 2. dry-run conflict probe
//! 3. quality-check test gate
//! 4. integrate (provider PR merge in remote mode, local squash otherwise)
//! 5. branch cleanup
//! 6. commit terminal state and notify
//!
//! Invariants: at most one merge in flight, FIFO order preserved, and phase
//! advancement is only observed after this worker writes `merged`. Every
//! step is wrapped so a failing step drops only that merge; the worker loop
//! never exits on a per-request error.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use phalanx_core::audit;
use phalanx_core::config::OrchestratorConfig;
use phalanx_core::error::{CoordinatorError, StoreError};
use phalanx_core::notify::{EventKind, Notification, NotificationBus};
use phalanx_core::scheduler::PhaseScheduler;
use phalanx_core::store::{keys, StateStore};
use phalanx_core::task::{MergeRequest, Task, TaskStatus};
use phalanx_git::checks::CheckReport;
use phalanx_git::{effective_checks, GhCli, GitError, GitRepo};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// How long the worker blocks on the FIFO before re-checking for shutdown.
const QUEUE_POP_TIMEOUT: Duration = Duration::from_secs(5);

/// Captured check output is truncated to this many bytes in notifications.
const OUTPUT_LIMIT: usize = 4096;

/// Liveness TTL on the active-merges hash.
const ACTIVE_MERGE_TTL: Duration = Duration::from_secs(3600);

/// Merge worker error
#[derive(Debug, Error)]
pub enum MergeError {
    /// Git operation failed
    #[error(transparent)]
    Git(#[from] GitError),
    /// Store operation failed
    #[error(transparent)]
    Store(#[from] StoreError),
    /// Task state operation failed
    #[error(transparent)]
    Coordinator(#[from] CoordinatorError),
    /// Stored record could not be decoded
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// What became of one merge request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeDisposition {
    /// Integrated into the mainline
    Merged,
    /// Conflict detected; dropped pending an agent fix (no retry consumed)
    ConflictDropped,
    /// Required check failed; dropped pending an agent fix (no retry consumed)
    TestFailedDropped,
    /// A merge step failed; requeued at the tail
    Requeued,
    /// Retry budget exhausted; task failed
    Failed,
}

/// The sequential merge worker.
pub struct MergeCoordinator {
    store: Arc<dyn StateStore>,
    config: OrchestratorConfig,
    repo: GitRepo,
    gh: GhCli,
    notify: NotificationBus,
    scheduler: PhaseScheduler,
    retry_backoff: Duration,
}

impl MergeCoordinator {
    /// Create a worker over the coordinator host's working tree.
    #[must_use]
    pub fn new(
        store: Arc<dyn StateStore>,
        config: OrchestratorConfig,
        project_root: impl AsRef<Path>,
    ) -> Self {
        let root = project_root.as_ref().to_path_buf();
        let repo = GitRepo::new(&root).with_step_timeout(config.timeouts.merge_step_timeout());
        let gh = GhCli::new(&root);
        let notify = NotificationBus::new(store.clone());
        let scheduler = PhaseScheduler::new(store.clone());
        Self {
            store,
            config,
            repo,
            gh,
            notify,
            scheduler,
            retry_backoff: Duration::from_secs(5),
        }
    }

    /// Override the requeue backoff (tests shorten it).
    #[must_use]
    pub fn with_retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }

    /// Consume the merge FIFO until cancelled.
    pub async fn run(&self, shutdown: CancellationToken) {
        info!("merge worker started");
        loop {
            tokio::select! {
                popped = self.store.blpop(keys::MERGE_QUEUE, QUEUE_POP_TIMEOUT) => {
                    match popped {
                        Ok(Some(payload)) => {
                            let request: MergeRequest = match serde_json::from_str(&payload) {
                                Ok(request) => request,
                                Err(e) => {
                                    error!(error = %e, "dropping undecodable merge request");
                                    continue;
                                }
                            };
                            self.process_request(request).await;
                        }
                        Ok(None) => {}
                        Err(e) => {
                            error!(error = %e, "merge queue pop failed");
                            tokio::time::sleep(Duration::from_secs(5)).await;
                        }
                    }
                }
                () = shutdown.cancelled() => {
                    info!("merge worker shutting down");
                    break;
                }
            }
        }
    }

    /// Process one request end to end, routing step failures to the retry
    /// policy. Never returns an error: a failing request drops or requeues
    /// only itself.
    pub async fn process_request(&self, request: MergeRequest) -> MergeDisposition {
        let task_id = request.task_id.clone();
        info!(task_id = %task_id, branch = %request.branch_name, "processing merge");

        if let Err(e) = self.mark_active(&request).await {
            warn!(task_id = %task_id, error = %e, "failed to record active merge");
        }

        let disposition = match self.try_merge(&request).await {
            Ok(disposition) => disposition,
            Err(e) => {
                error!(task_id = %task_id, error = %e, "merge step failed");
                self.handle_merge_failure(request).await
            }
        };

        if let Err(e) = self.store.hdel(keys::ACTIVE_MERGES, &task_id).await {
            warn!(task_id = %task_id, error = %e, "failed to clear active merge");
        }
        disposition
    }

    async fn mark_active(&self, request: &MergeRequest) -> Result<(), MergeError> {
        let payload = serde_json::to_string(request)?;
        self.store
            .hset(keys::ACTIVE_MERGES, &request.task_id, &payload)
            .await?;
        self.store
            .expire(keys::ACTIVE_MERGES, ACTIVE_MERGE_TTL)
            .await?;
        Ok(())
    }

    /// Steps 1-6. Errors bubble to the retry policy in `process_request`.
    async fn try_merge(&self, request: &MergeRequest) -> Result<MergeDisposition, MergeError> {
        let main = &self.config.git.main_branch;

        // Step 1: refresh mainline.
        self.repo.checkout_mainline(main).await?;
        if self.config.git.push_to_remote {
            let pulled = self.repo.pull().await?;
            if !pulled.success() {
                warn!("could not pull mainline from remote (missing remote is fine locally)");
            }
        }
        let mainline_tip = self.repo.head().await?;
        info!(tip = %mainline_tip, "mainline refreshed");

        // Single-branch mode (use_branches=false): the work already sits on
        // the mainline, so only the test gate and the terminal write apply.
        if request.branch_name == *main {
            if self.config.quality_gates.run_tests {
                let checks =
                    effective_checks(&self.config.quality_gates.checks, self.repo.root());
                let report = phalanx_git::run_checks(
                    &checks,
                    self.repo.root(),
                    self.config.timeouts.merge_step_timeout(),
                )
                .await?;
                if !report.passed() {
                    self.handle_test_failure(request, &report).await?;
                    return Ok(MergeDisposition::TestFailedDropped);
                }
            }
            self.mark_task_merged(&request.task_id).await?;
            self.notify
                .notify_agent(&Notification::new(
                    &request.agent_id,
                    &request.task_id,
                    EventKind::MergeSuccess,
                    serde_json::json!({
                        "message": format!("task {} accepted on {main}", request.task_id),
                        "branch": request.branch_name,
                    }),
                ))
                .await?;
            self.scheduler.check_phase_advancement().await?;
            return Ok(MergeDisposition::Merged);
        }

        // Step 2: conflict probe (dry-run merge, then abort).
        let probe = self.repo.merge_probe(&request.branch_name).await?;
        if probe.conflict {
            warn!(
                task_id = %request.task_id,
                files = probe.files.len(),
                "conflict detected during probe"
            );
            self.handle_conflict(request, probe.files).await?;
            return Ok(MergeDisposition::ConflictDropped);
        }

        // Step 3: test gate on the candidate branch.
        if self.config.quality_gates.run_tests {
            self.repo.checkout(&request.branch_name).await?;
            let checks = effective_checks(&self.config.quality_gates.checks, self.repo.root());
            let report = phalanx_git::run_checks(
                &checks,
                self.repo.root(),
                self.config.timeouts.merge_step_timeout(),
            )
            .await?;
            self.repo.checkout_mainline(main).await?;

            if !report.passed() {
                self.handle_test_failure(request, &report).await?;
                return Ok(MergeDisposition::TestFailedDropped);
            }
        }

        // Step 4: integrate.
        if self.config.git.push_to_remote && request.pr_handle.is_some() {
            let pr = request.pr_handle.as_deref().unwrap_or_default();
            self.gh.merge_pr(pr).await?;
            // The provider merged remotely; bring the mainline up to date.
            let pulled = self.repo.pull().await?;
            if !pulled.success() {
                warn!("post-merge mainline pull failed");
            }
        } else {
            self.repo.squash_merge(&request.branch_name).await?;
        }

        // Step 5: branch cleanup (idempotent on both sides).
        self.repo.delete_branch(&request.branch_name).await?;
        if self.config.git.push_to_remote {
            self.repo.push_delete(&request.branch_name).await?;
        }

        // Step 6: terminal state, notification, phase re-check.
        self.mark_task_merged(&request.task_id).await?;
        self.notify
            .notify_agent(&Notification::new(
                &request.agent_id,
                &request.task_id,
                EventKind::MergeSuccess,
                serde_json::json!({
                    "message": format!("task {} merged into {main}", request.task_id),
                    "branch": request.branch_name,
                }),
            ))
            .await?;
        self.scheduler.check_phase_advancement().await?;

        info!(task_id = %request.task_id, "merge complete");
        Ok(MergeDisposition::Merged)
    }

    async fn load_task(&self, task_id: &str) -> Result<Task, MergeError> {
        let raw = self
            .store
            .hget(keys::TASKS, task_id)
            .await?
            .ok_or_else(|| CoordinatorError::UnknownTask(task_id.to_string()))?;
        Ok(serde_json::from_str(&raw)?)
    }

    async fn save_task(&self, task: &Task) -> Result<(), MergeError> {
        let payload = serde_json::to_string(task)?;
        self.store.hset(keys::TASKS, &task.id, &payload).await?;
        Ok(())
    }

    async fn mark_task_merged(&self, task_id: &str) -> Result<(), MergeError> {
        let mut task = self.load_task(task_id).await?;
        task.status = TaskStatus::Merged;
        task.merged_at = Some(chrono::Utc::now());
        self.save_task(&task).await?;
        audit::record(
            self.store.as_ref(),
            "merge",
            "task_merged",
            serde_json::json!({ "task_id": task_id }),
        )
        .await?;
        Ok(())
    }

    /// Conflict handling: mark the task, notify the owning agent with the
    /// conflicted file list, and drop the merge without consuming a retry.
    /// The agent's fix re-signals completion, which re-enqueues.
    async fn handle_conflict(
        &self,
        request: &MergeRequest,
        files: Vec<String>,
    ) -> Result<(), MergeError> {
        let mut task = self.load_task(&request.task_id).await?;
        task.status = TaskStatus::Conflict;
        self.save_task(&task).await?;
        audit::record(
            self.store.as_ref(),
            "merge",
            "merge_conflict",
            serde_json::json!({ "task_id": request.task_id, "files": files }),
        )
        .await?;

        self.notify
            .notify_agent(&Notification::new(
                &request.agent_id,
                &request.task_id,
                EventKind::ConflictDetected,
                serde_json::json!({
                    "message": format!("merge conflict detected in {}", request.branch_name),
                    "branch": request.branch_name,
                    "conflicted_files": files,
                    "action_required": "resolve_conflict",
                }),
            ))
            .await?;
        Ok(())
    }

    /// Test-gate failure: mark the task, notify with the captured output,
    /// and drop the merge without consuming a retry.
    async fn handle_test_failure(
        &self,
        request: &MergeRequest,
        report: &CheckReport,
    ) -> Result<(), MergeError> {
        let mut task = self.load_task(&request.task_id).await?;
        task.status = TaskStatus::TestFailed;
        self.save_task(&task).await?;

        let failure = report.first_required_failure();
        let check_name = failure.map_or("unknown", |f| f.name.as_str());
        let mut output = failure.map_or(String::new(), |f| f.output.clone());
        output.truncate(OUTPUT_LIMIT);

        audit::record(
            self.store.as_ref(),
            "merge",
            "merge_tests_failed",
            serde_json::json!({ "task_id": request.task_id, "check": check_name }),
        )
        .await?;

        self.notify
            .notify_agent(&Notification::new(
                &request.agent_id,
                &request.task_id,
                EventKind::TestsFailed,
                serde_json::json!({
                    "message": format!("required check `{check_name}` failed for {}", request.task_id),
                    "branch": request.branch_name,
                    "check": check_name,
                    "output": output,
                    "action_required": "fix_tests",
                }),
            ))
            .await?;
        Ok(())
    }

    /// Retry policy for integrate-step failures: requeue at the tail while
    /// the budget lasts, otherwise fail the task permanently.
    async fn handle_merge_failure(&self, mut request: MergeRequest) -> MergeDisposition {
        request.retry_count += 1;
        let max_retries = self.config.advanced.max_retries;

        if request.retry_count < max_retries {
            warn!(
                task_id = %request.task_id,
                retry = request.retry_count,
                max = max_retries,
                "merge failed, requeueing"
            );
            if let Err(e) = self.set_task_status(&request.task_id, TaskStatus::MergeFailed).await {
                error!(task_id = %request.task_id, error = %e, "failed to record merge_failed status");
            }
            tokio::time::sleep(self.retry_backoff * request.retry_count).await;
            match serde_json::to_string(&request) {
                Ok(payload) => {
                    if let Err(e) = self.store.rpush(keys::MERGE_QUEUE, &payload).await {
                        error!(task_id = %request.task_id, error = %e, "requeue failed");
                        return MergeDisposition::Failed;
                    }
                }
                Err(e) => {
                    error!(task_id = %request.task_id, error = %e, "requeue serialization failed");
                    return MergeDisposition::Failed;
                }
            }
            return MergeDisposition::Requeued;
        }

        error!(task_id = %request.task_id, "merge retries exhausted");
        if let Err(e) = self.fail_task(&request).await {
            error!(task_id = %request.task_id, error = %e, "failed to finalize merge failure");
        }
        MergeDisposition::Failed
    }

    async fn set_task_status(&self, task_id: &str, status: TaskStatus) -> Result<(), MergeError> {
        let mut task = self.load_task(task_id).await?;
        task.status = status;
        self.save_task(&task).await
    }

    async fn fail_task(&self, request: &MergeRequest) -> Result<(), MergeError> {
        let mut task = self.load_task(&request.task_id).await?;
        task.status = TaskStatus::Failed;
        task.retry_count = request.retry_count;
        self.save_task(&task).await?;
        audit::record(
            self.store.as_ref(),
            "merge",
            "merge_retries_exhausted",
            serde_json::json!({ "task_id": request.task_id, "retries": request.retry_count }),
        )
        .await?;

        self.notify
            .notify_agent(&Notification::new(
                &request.agent_id,
                &request.task_id,
                EventKind::MergeFailed,
                serde_json::json!({
                    "message": format!(
                        "merge failed after {} retries for {}",
                        request.retry_count, request.task_id
                    ),
                    "branch": request.branch_name,
                    "action_required": "manual_intervention",
                }),
            ))
            .await?;

        // Failed is terminal; the phase may be able to close now.
        self.scheduler.check_phase_advancement().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use phalanx_core::backlog;
    use phalanx_core::store::MemoryStore;
    use phalanx_git::run;
    use tempfile::TempDir;

    async fn git_available() -> bool {
        run("git", &["--version"], &std::env::temp_dir(), None)
            .await
            .map(|o| o.success())
            .unwrap_or(false)
    }

    async fn init_repo(dir: &TempDir) {
        for args in [
            &["init", "-b", "main"][..],
            &["config", "user.email", "test@example.com"],
            &["config", "user.name", "Test"],
        ] {
            run("git", args, dir.path(), None).await.unwrap();
        }
        std::fs::write(dir.path().join("README.md"), "# demo\n").unwrap();
        run("git", &["add", "."], dir.path(), None).await.unwrap();
        run("git", &["commit", "-m", "init"], dir.path(), None)
            .await
            .unwrap();
    }

    async fn commit_on_branch(dir: &TempDir, branch: &str, file: &str, content: &str) {
        run("git", &["checkout", "-b", branch], dir.path(), None)
            .await
            .unwrap();
        std::fs::write(dir.path().join(file), content).unwrap();
        run("git", &["add", "."], dir.path(), None).await.unwrap();
        run("git", &["commit", "-m", branch], dir.path(), None)
            .await
            .unwrap();
        run("git", &["checkout", "main"], dir.path(), None)
            .await
            .unwrap();
    }

    fn test_config() -> OrchestratorConfig {
        let mut config = OrchestratorConfig::default();
        // Temp repos have no test suite; exercise the gate explicitly where
        // a test needs it.
        config.quality_gates.run_tests = false;
        config
    }

    async fn seed_done_task(store: &MemoryStore, task_id: &str, branch: &str) -> MergeRequest {
        let yaml = format!("backlog:\n  - {{ id: {task_id}, title: A, kind: development }}\n");
        backlog::initialize(store, &yaml).await.unwrap();
        let raw = store.hget(keys::TASKS, task_id).await.unwrap().unwrap();
        let mut task: Task = serde_json::from_str(&raw).unwrap();
        task.status = TaskStatus::Done;
        task.assigned_agent = Some("agent-1".into());
        task.branch_name = Some(branch.to_string());
        store
            .hset(keys::TASKS, task_id, &serde_json::to_string(&task).unwrap())
            .await
            .unwrap();
        MergeRequest::new(task_id, branch, None, "agent-1")
    }

    async fn task_status(store: &MemoryStore, task_id: &str) -> TaskStatus {
        let raw = store.hget(keys::TASKS, task_id).await.unwrap().unwrap();
        let task: Task = serde_json::from_str(&raw).unwrap();
        task.status
    }

    #[tokio::test]
    async fn test_clean_merge_reaches_terminal_state() {
        if !git_available().await {
            return;
        }
        let dir = TempDir::new().unwrap();
        init_repo(&dir).await;
        commit_on_branch(&dir, "agent-1/task-T001", "feature.txt", "content\n").await;

        let store = MemoryStore::new();
        let request = seed_done_task(&store, "T001", "agent-1/task-T001").await;
        let worker = MergeCoordinator::new(Arc::new(store.clone()), test_config(), dir.path());

        let disposition = worker.process_request(request).await;
        assert_eq!(disposition, MergeDisposition::Merged);
        assert_eq!(task_status(&store, "T001").await, TaskStatus::Merged);

        // Mainline carries the squash commit; the branch is gone.
        let repo = GitRepo::new(dir.path());
        assert_eq!(
            repo.head_message().await.unwrap(),
            "Merge agent-1/task-T001"
        );
        assert!(!repo.branch_exists("agent-1/task-T001").await.unwrap());

        // The owning agent was notified and the (single-phase) backlog done.
        let bus = NotificationBus::new(Arc::new(store.clone()) as Arc<dyn StateStore>);
        let pending = bus.drain_pending("agent-1").await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].event_kind, EventKind::MergeSuccess);
        assert!(store.get(keys::CURRENT_PHASE).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_conflict_drops_merge_and_notifies() {
        if !git_available().await {
            return;
        }
        let dir = TempDir::new().unwrap();
        init_repo(&dir).await;
        commit_on_branch(&dir, "agent-1/task-T001", "README.md", "# branch edit\n").await;
        // Conflicting mainline edit.
        std::fs::write(dir.path().join("README.md"), "# main edit\n").unwrap();
        run("git", &["add", "."], dir.path(), None).await.unwrap();
        run("git", &["commit", "-m", "main edit"], dir.path(), None)
            .await
            .unwrap();

        let store = MemoryStore::new();
        let request = seed_done_task(&store, "T001", "agent-1/task-T001").await;
        let worker = MergeCoordinator::new(Arc::new(store.clone()), test_config(), dir.path());

        let disposition = worker.process_request(request).await;
        assert_eq!(disposition, MergeDisposition::ConflictDropped);
        assert_eq!(task_status(&store, "T001").await, TaskStatus::Conflict);

        // No retry consumed; the branch survives for the fix.
        let repo = GitRepo::new(dir.path());
        assert!(repo.branch_exists("agent-1/task-T001").await.unwrap());

        let bus = NotificationBus::new(Arc::new(store.clone()) as Arc<dyn StateStore>);
        let pending = bus.drain_pending("agent-1").await.unwrap();
        assert_eq!(pending[0].event_kind, EventKind::ConflictDetected);
        assert_eq!(pending[0].data["conflicted_files"][0], "README.md");
        // The phase is still open.
        assert!(store.get(keys::CURRENT_PHASE).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_required_check_failure_gates_merge() {
        if !git_available().await {
            return;
        }
        let dir = TempDir::new().unwrap();
        init_repo(&dir).await;
        commit_on_branch(&dir, "agent-1/task-T001", "feature.txt", "content\n").await;

        let store = MemoryStore::new();
        let request = seed_done_task(&store, "T001", "agent-1/task-T001").await;
        let mut config = OrchestratorConfig::default();
        config.quality_gates.checks = vec![phalanx_core::QualityCheck::new(
            "Tests Pass",
            "false",
            true,
        )];
        let worker = MergeCoordinator::new(Arc::new(store.clone()), config, dir.path());

        let disposition = worker.process_request(request).await;
        assert_eq!(disposition, MergeDisposition::TestFailedDropped);
        assert_eq!(task_status(&store, "T001").await, TaskStatus::TestFailed);

        // The worker returned to mainline and nothing was integrated.
        let repo = GitRepo::new(dir.path());
        assert_eq!(repo.current_branch().await.unwrap(), "main");
        assert_eq!(repo.head_message().await.unwrap(), "init");

        let bus = NotificationBus::new(Arc::new(store.clone()) as Arc<dyn StateStore>);
        let pending = bus.drain_pending("agent-1").await.unwrap();
        assert_eq!(pending[0].event_kind, EventKind::TestsFailed);
        assert_eq!(pending[0].data["check"], "Tests Pass");
    }

    #[tokio::test]
    async fn test_missing_branch_exhausts_retries_then_fails() {
        if !git_available().await {
            return;
        }
        let dir = TempDir::new().unwrap();
        init_repo(&dir).await;

        let store = MemoryStore::new();
        // The request references a branch that never existed.
        let request = seed_done_task(&store, "T001", "agent-1/task-missing").await;
        let worker = MergeCoordinator::new(Arc::new(store.clone()), test_config(), dir.path())
            .with_retry_backoff(Duration::from_millis(1));

        let mut disposition = worker.process_request(request).await;
        let mut hops = 0;
        while disposition == MergeDisposition::Requeued {
            hops += 1;
            assert!(hops < 10, "retry budget must bound the requeue loop");
            let payload = store
                .blpop(keys::MERGE_QUEUE, Duration::from_millis(10))
                .await
                .unwrap()
                .unwrap();
            let request: MergeRequest = serde_json::from_str(&payload).unwrap();
            disposition = worker.process_request(request).await;
        }

        assert_eq!(disposition, MergeDisposition::Failed);
        assert_eq!(hops, 2); // max_retries = 3 attempts total
        assert_eq!(task_status(&store, "T001").await, TaskStatus::Failed);

        let bus = NotificationBus::new(Arc::new(store.clone()) as Arc<dyn StateStore>);
        let pending = bus.drain_pending("agent-1").await.unwrap();
        assert_eq!(
            pending.last().unwrap().event_kind,
            EventKind::MergeFailed
        );
        // Failed is terminal: the single-phase backlog closed.
        assert!(store.get(keys::CURRENT_PHASE).await.unwrap().is_none());
    }
}
