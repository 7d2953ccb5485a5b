//! Agent runtime
//!
//! A long-lived process owning exactly one logical agent id. Registers with
//! the coordinator, heartbeats in the background, claims tasks from the
//! active phase, supervises the external implementer's commits on a per-task
//! branch, runs local quality gates, publishes results and drives the fix
//! loop when the merge coordinator reports conflicts or test failures.

use crate::client::CoordinatorClient;
use crate::error::AgentError;
use crate::watch::wait_for_new_commit;
use crate::workspace::{FixContext, Workspace};
use phalanx_core::config::OrchestratorConfig;
use phalanx_core::notify::{EventKind, Notification, NotificationBus};
use phalanx_core::store::StateStore;
use phalanx_core::task::Task;
use phalanx_git::{effective_checks, run_checks, GhCli, GitRepo};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// The agent runtime.
pub struct AgentRuntime {
    client: CoordinatorClient,
    bus: NotificationBus,
    repo: GitRepo,
    gh: GhCli,
    workspace: Workspace,
    agent_id: String,
    config: OrchestratorConfig,
    project_root: PathBuf,
}

impl AgentRuntime {
    /// Register with the coordinator and build a runtime around the given
    /// working tree. The store is used only for notification channels.
    pub async fn connect(
        base_url: &str,
        store: Arc<dyn StateStore>,
        project_root: impl AsRef<Path>,
        capabilities: Vec<String>,
        preferred_id: Option<String>,
    ) -> Result<Self, AgentError> {
        let client = CoordinatorClient::new(base_url)?;
        let registered = client.register(capabilities, preferred_id).await?;
        info!(agent_id = %registered.agent_id, "registered with coordinator");

        let root = project_root.as_ref().to_path_buf();
        let config = registered.config;
        let repo = GitRepo::new(&root).with_step_timeout(config.timeouts.merge_step_timeout());
        let gh = GhCli::new(&root);
        let workspace = Workspace::new(&root);
        let bus = NotificationBus::new(store);

        Ok(Self {
            client,
            bus,
            repo,
            gh,
            workspace,
            agent_id: registered.agent_id,
            config,
            project_root: root,
        })
    }

    /// This runtime's assigned agent id.
    #[must_use]
    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    /// Main loop: heartbeat in the background, drain pending notifications,
    /// then claim and execute until cancelled.
    pub async fn run(&self, shutdown: CancellationToken) -> Result<(), AgentError> {
        let heartbeat = self.spawn_heartbeat(shutdown.child_token());

        // Late-subscriber safety: process events that arrived while this
        // runtime was down before listening live.
        for notification in self.bus.drain_pending(&self.agent_id).await? {
            self.handle_notification(&notification).await;
        }
        let mut notifications = self.bus.subscribe_agent(&self.agent_id).await?;
        let mut events = self.bus.subscribe_events().await?;

        loop {
            if shutdown.is_cancelled() {
                break;
            }

            // Notifications queued while a task was executing.
            while let Some(raw) = notifications.try_recv() {
                self.dispatch_raw(&raw).await;
            }

            match self.client.claim(&self.agent_id).await {
                Ok(response) => match (response.task, response.role) {
                    (Some(task), role) => {
                        let task_id = task.id.clone();
                        let role = role.unwrap_or_else(|| task.kind.role().to_string());
                        info!(task_id = %task_id, title = %task.title, role = %role, "task claimed");
                        if let Err(e) = self.execute_task(task, &role).await {
                            error!(task_id = %task_id, error = %e, "task execution failed");
                            // Release the claim so the phase is not stuck on
                            // a task this runtime can no longer drive.
                            if let Err(e) = self
                                .client
                                .complete(&self.agent_id, &task_id, false, None, None)
                                .await
                            {
                                warn!(task_id = %task_id, error = %e, "failure signal rejected");
                            }
                        }
                    }
                    (None, _) => {
                        let reason = response.reason.as_deref().unwrap_or("unknown");
                        info!(reason = %reason, "no tasks available, waiting");
                        tokio::select! {
                            () = tokio::time::sleep(self.config.timeouts.claim_wait()) => {}
                            raw = notifications.recv() => {
                                if let Some(raw) = raw {
                                    self.dispatch_raw(&raw).await;
                                }
                            }
                            // Phase activation wakes the claim loop early.
                            _ = events.recv() => {}
                            () = shutdown.cancelled() => break,
                        }
                    }
                },
                Err(e) => {
                    warn!(error = %e, "claim request failed");
                    tokio::select! {
                        () = tokio::time::sleep(Duration::from_secs(5)) => {}
                        () = shutdown.cancelled() => break,
                    }
                }
            }
        }

        if let Err(e) = self.client.unregister(&self.agent_id).await {
            warn!(error = %e, "unregister failed");
        }
        heartbeat.abort();
        info!(agent_id = %self.agent_id, "agent runtime stopped");
        Ok(())
    }

    fn spawn_heartbeat(&self, shutdown: CancellationToken) -> tokio::task::JoinHandle<()> {
        let client = self.client.clone();
        let agent_id = self.agent_id.clone();
        let interval = self.config.timeouts.heartbeat_interval();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = tokio::time::sleep(interval) => {
                        if let Err(e) = client.heartbeat(&agent_id).await {
                            warn!(error = %e, "heartbeat failed");
                        }
                    }
                    () = shutdown.cancelled() => break,
                }
            }
        })
    }

    async fn dispatch_raw(&self, raw: &str) {
        match serde_json::from_str::<Notification>(raw) {
            Ok(notification) => self.handle_notification(&notification).await,
            Err(e) => warn!(error = %e, "dropping undecodable notification"),
        }
    }

    /// React to a merge-coordinator event for a task this agent owns.
    pub async fn handle_notification(&self, notification: &Notification) {
        info!(
            task_id = %notification.task_id,
            event = notification.event_kind.as_str(),
            "notification received"
        );
        let result = match notification.event_kind {
            EventKind::TestsFailed => self.run_test_fix_loop(notification).await,
            EventKind::ConflictDetected => self.run_conflict_fix_loop(notification).await,
            EventKind::MergeFailed => {
                error!(
                    task_id = %notification.task_id,
                    "merge failed permanently; manual intervention required"
                );
                Ok(())
            }
            EventKind::MergeSuccess => {
                info!(task_id = %notification.task_id, "task merged into mainline");
                Ok(())
            }
        };
        if let Err(e) = result {
            error!(task_id = %notification.task_id, error = %e, "fix workflow failed");
        }
    }

    /// Verify environment preconditions before touching the working tree.
    async fn check_preconditions(&self) -> Result<(), AgentError> {
        if self.config.git.push_to_remote {
            match self.repo.remote_url("origin").await? {
                Some(url) => info!(remote = %url, "git remote verified"),
                None => {
                    return Err(AgentError::Precondition(
                        "git.push_to_remote is set but no remote named `origin` resolves; \
                         add a remote or disable push_to_remote"
                            .to_string(),
                    ))
                }
            }
        }
        if self.config.git.auto_pr {
            self.gh
                .check_available()
                .await
                .map_err(|e| AgentError::Precondition(e.to_string()))?;
        }
        Ok(())
    }

    /// Execute a claimed task end to end (§ branch setup, briefs, wait,
    /// local tests, publish). Always signals completion, success or failure.
    async fn execute_task(&self, task: Task, role: &str) -> Result<(), AgentError> {
        let task_id = task.id.clone();
        let main = self.config.git.main_branch.clone();
        // With branches disabled (single-agent degenerate mode) the work
        // happens directly on the mainline.
        let branch = if self.config.git.use_branches {
            self.config.git.branch_name(&self.agent_id, &task_id)
        } else {
            warn!("git.use_branches is disabled; working directly on the mainline");
            main.clone()
        };

        if let Err(e) = self.check_preconditions().await {
            warn!(task_id = %task_id, reason = %e, "precondition failed");
            self.client
                .complete(&self.agent_id, &task_id, false, None, None)
                .await?;
            return Ok(());
        }

        // Branch setup: mainline first, latest changes, then the task branch.
        self.repo.checkout_mainline(&main).await?;
        if self.config.git.push_to_remote {
            let pulled = self.repo.pull().await?;
            if !pulled.success() {
                warn!("could not pull mainline from remote");
            }
        }
        if self.config.git.use_branches {
            self.repo.create_branch(&branch).await?;
        }

        // Materialize the briefs for the external implementer.
        self.workspace.prepare_task(&task, role, &self.agent_id, &branch)?;
        info!(
            task_id = %task_id,
            branch = %branch,
            brief = %self.workspace.task_brief_path().display(),
            "workspace prepared, waiting for implementation commit"
        );

        let initial_head = self.repo.head().await?;
        let observed = wait_for_new_commit(
            &self.repo,
            &initial_head,
            self.config.timeouts.impl_poll(),
            self.config.timeouts.impl_timeout(),
        )
        .await?;
        // The briefs must not ship with the implementation; the external
        // commit may or may not have included them, both are accepted.
        self.workspace.clear_task(&task_id)?;

        if observed.is_none() {
            warn!(task_id = %task_id, "implementation timed out");
            self.client
                .complete(&self.agent_id, &task_id, false, Some(branch), None)
                .await?;
            return Ok(());
        }

        // Local test gate before publishing.
        if self.config.quality_gates.run_tests && !self.run_local_checks().await? {
            warn!(task_id = %task_id, "local quality checks failed");
            self.client
                .complete(&self.agent_id, &task_id, false, Some(branch), None)
                .await?;
            return Ok(());
        }

        // Publish: push and optionally open a PR.
        let mut pr_handle = None;
        if self.config.git.push_to_remote && self.config.git.use_branches {
            if let Err(e) = self.repo.push(&branch, true).await {
                warn!(task_id = %task_id, error = %e, "push failed");
                self.client
                    .complete(&self.agent_id, &task_id, false, Some(branch), None)
                    .await?;
                return Ok(());
            }
            if self.config.git.auto_pr {
                let title = format!("{} ({})", task.title, task_id);
                let body = format!(
                    "## Task {task_id}\n\n{}\n\n### Acceptance criteria\n\n{}\n\nImplemented by `{}` on `{branch}`.\n",
                    task.description,
                    task.acceptance_criteria.as_deref().unwrap_or("n/a"),
                    self.agent_id,
                );
                match self.gh.create_pr(&title, &body, &main, &branch).await {
                    Ok(url) => {
                        info!(pr = %url, "pull request created");
                        pr_handle = Some(url);
                    }
                    Err(e) => {
                        // The merge worker falls back to a local merge.
                        warn!(error = %e, "PR creation failed, continuing without one");
                    }
                }
            }
        }

        self.client
            .complete(&self.agent_id, &task_id, true, Some(branch), pr_handle)
            .await?;
        info!(task_id = %task_id, "completion signalled");
        Ok(())
    }

    async fn run_local_checks(&self) -> Result<bool, AgentError> {
        let checks = effective_checks(&self.config.quality_gates.checks, &self.project_root);
        let report = run_checks(
            &checks,
            &self.project_root,
            self.config.timeouts.merge_step_timeout(),
        )
        .await?;
        Ok(report.passed())
    }

    fn branch_from_notification(&self, notification: &Notification) -> String {
        notification.data["branch"]
            .as_str()
            .map(str::to_string)
            .unwrap_or_else(|| {
                self.config
                    .git
                    .branch_name(&self.agent_id, &notification.task_id)
            })
    }

    /// Fix loop for a `tests_failed` event: brief, wait for a fix commit,
    /// re-run the checks, re-push and re-signal. Bounded iterations.
    async fn run_test_fix_loop(&self, notification: &Notification) -> Result<(), AgentError> {
        let task_id = notification.task_id.clone();
        let branch = self.branch_from_notification(notification);
        let check = notification.data["check"].as_str().unwrap_or("tests");
        let mut output = notification.data["output"].as_str().unwrap_or("").to_string();

        self.repo.checkout(&branch).await?;

        for iteration in 1..=self.config.advanced.fix_max_iterations {
            info!(task_id = %task_id, iteration, "test fix loop: waiting for fix commit");
            self.workspace.prepare_fix(
                &task_id,
                &FixContext::TestFailure {
                    check: check.to_string(),
                    output: output.clone(),
                    branch: branch.clone(),
                },
            )?;

            let initial_head = self.repo.head().await?;
            let observed = wait_for_new_commit(
                &self.repo,
                &initial_head,
                self.config.timeouts.impl_poll(),
                self.config.timeouts.fix_timeout(),
            )
            .await?;
            self.workspace.clear_fix(&task_id)?;

            if observed.is_none() {
                warn!(task_id = %task_id, "fix wait timed out");
                break;
            }

            if self.run_local_checks().await? {
                if self.config.git.push_to_remote {
                    if let Err(e) = self.repo.push(&branch, true).await {
                        warn!(task_id = %task_id, error = %e, "re-push failed");
                        break;
                    }
                }
                self.client
                    .complete(&self.agent_id, &task_id, true, Some(branch), None)
                    .await?;
                info!(task_id = %task_id, "fix verified, completion re-signalled");
                return Ok(());
            }

            warn!(task_id = %task_id, iteration, "checks still failing after fix");
            let checks = effective_checks(&self.config.quality_gates.checks, &self.project_root);
            let report = run_checks(
                &checks,
                &self.project_root,
                self.config.timeouts.merge_step_timeout(),
            )
            .await?;
            output = report
                .first_required_failure()
                .map(|f| f.output.clone())
                .unwrap_or_default();
        }

        warn!(task_id = %task_id, "fix iterations exhausted, failing task");
        self.client
            .complete(&self.agent_id, &task_id, false, Some(branch), None)
            .await?;
        Ok(())
    }

    /// Fix loop for a `conflict_detected` event: rebase onto the mainline;
    /// clean rebases push with force-with-lease and re-signal, conflicted
    /// rebases surface a brief and wait for the resolution commit.
    async fn run_conflict_fix_loop(&self, notification: &Notification) -> Result<(), AgentError> {
        let task_id = notification.task_id.clone();
        let branch = self.branch_from_notification(notification);
        let main = &self.config.git.main_branch;

        self.repo.checkout(&branch).await?;

        for iteration in 1..=self.config.advanced.fix_max_iterations {
            let rebase = self
                .repo
                .rebase_onto_mainline(main, self.config.git.push_to_remote)
                .await?;

            if rebase.success() {
                if self.config.git.push_to_remote {
                    self.repo.push_force_with_lease().await?;
                }
                self.workspace.clear_fix(&task_id)?;
                self.client
                    .complete(&self.agent_id, &task_id, true, Some(branch), None)
                    .await?;
                info!(task_id = %task_id, iteration, "rebase clean, completion re-signalled");
                return Ok(());
            }

            // The rebase stopped on conflicts; leave it in progress so the
            // implementer can resolve and `git rebase --continue`.
            let files = self.repo.conflicted_files().await?;
            warn!(task_id = %task_id, conflicts = files.len(), "rebase conflicts, waiting for resolution");
            self.workspace.prepare_fix(
                &task_id,
                &FixContext::MergeConflict {
                    branch: branch.clone(),
                    files,
                },
            )?;

            let initial_head = self.repo.head().await?;
            let observed = wait_for_new_commit(
                &self.repo,
                &initial_head,
                self.config.timeouts.impl_poll(),
                self.config.timeouts.fix_timeout(),
            )
            .await?;
            self.workspace.clear_fix(&task_id)?;

            if observed.is_none() {
                warn!(task_id = %task_id, "conflict resolution timed out");
                self.repo.rebase_abort().await?;
                break;
            }
        }

        warn!(task_id = %task_id, "conflict fix iterations exhausted, failing task");
        self.client
            .complete(&self.agent_id, &task_id, false, Some(branch), None)
            .await?;
        Ok(())
    }
}
