//! Coordinator operations
//!
//! Register/heartbeat/claim/complete/unregister/status, backed entirely by
//! the state store. Claims are serialized per task by the store's
//! set-if-absent lock primitive; no in-process mutex is involved. The
//! coordinator is the only writer for transitions into `in_progress`,
//! `done`, `failed`-on-complete and `blocked`; the merge worker and reaper
//! own their respective transitions.

use crate::agent::{AgentRecord, AgentState};
use crate::audit;
use crate::config::OrchestratorConfig;
use crate::error::CoordinatorError;
use crate::phase::Phase;
use crate::protocol::{StatusResponse, StatusStats};
use crate::scheduler::PhaseScheduler;
use crate::store::{keys, StateStore};
use crate::task::{MergeRequest, Task, TaskStatus};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Result alias for coordinator operations.
pub type Result<T> = std::result::Result<T, CoordinatorError>;

/// Outcome of a claim attempt.
#[derive(Debug, Clone)]
pub enum ClaimOutcome {
    /// A task was claimed under an exclusive lock.
    Claimed {
        /// The claimed task (already marked in_progress)
        task: Task,
        /// Role derived from the task kind
        role: String,
    },
    /// Nothing claimable right now.
    NoTasks {
        /// Active phase index, if a phase is active
        phase: Option<u32>,
        /// `no_active_phase` or `no_tasks_available`
        reason: &'static str,
    },
}

/// Readiness of a task's dependency set.
enum DepState {
    /// All dependencies merged
    Ready,
    /// At least one dependency not yet merged
    NotReady,
    /// A dependency failed; the task was transitioned to blocked
    Blocked,
}

/// Shared coordinator context (no globals: store, config and bus are owned
/// here and passed to handlers explicitly).
pub struct Coordinator {
    store: Arc<dyn StateStore>,
    config: OrchestratorConfig,
    scheduler: PhaseScheduler,
}

impl Coordinator {
    /// Create a coordinator over the shared store.
    #[must_use]
    pub fn new(store: Arc<dyn StateStore>, config: OrchestratorConfig) -> Self {
        let scheduler = PhaseScheduler::new(store.clone());
        Self {
            store,
            config,
            scheduler,
        }
    }

    /// The orchestrator config snapshot returned to registering agents.
    #[must_use]
    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// The underlying store.
    #[must_use]
    pub fn store(&self) -> Arc<dyn StateStore> {
        self.store.clone()
    }

    /// The phase scheduler.
    #[must_use]
    pub fn scheduler(&self) -> &PhaseScheduler {
        &self.scheduler
    }

    async fn load_task(&self, task_id: &str) -> Result<Task> {
        let raw = self
            .store
            .hget(keys::TASKS, task_id)
            .await?
            .ok_or_else(|| CoordinatorError::UnknownTask(task_id.to_string()))?;
        Ok(serde_json::from_str(&raw)?)
    }

    async fn save_task(&self, task: &Task) -> Result<()> {
        let payload = serde_json::to_string(task)?;
        self.store.hset(keys::TASKS, &task.id, &payload).await?;
        Ok(())
    }

    async fn load_agent(&self, agent_id: &str) -> Result<AgentRecord> {
        let raw = self
            .store
            .hget(keys::AGENTS, agent_id)
            .await?
            .ok_or_else(|| CoordinatorError::UnknownAgent(agent_id.to_string()))?;
        Ok(serde_json::from_str(&raw)?)
    }

    async fn save_agent(&self, agent: &AgentRecord) -> Result<()> {
        let payload = serde_json::to_string(agent)?;
        self.store
            .hset(keys::AGENTS, &agent.agent_id, &payload)
            .await?;
        Ok(())
    }

    /// Register a new agent. A preferred id is honored unless taken;
    /// otherwise ids are generated from the registry size.
    pub async fn register(
        &self,
        capabilities: Vec<String>,
        preferred_id: Option<String>,
    ) -> Result<AgentRecord> {
        if let Some(id) = preferred_id {
            let record = AgentRecord::new(id.clone(), capabilities);
            let payload = serde_json::to_string(&record)?;
            if !self.store.hset_nx(keys::AGENTS, &id, &payload).await? {
                return Err(CoordinatorError::AgentIdTaken(id));
            }
            info!(agent_id = %id, "agent registered");
            return Ok(record);
        }

        let mut n = self.store.hlen(keys::AGENTS).await? + 1;
        loop {
            let id = format!("agent-{n}");
            let record = AgentRecord::new(id.clone(), capabilities.clone());
            let payload = serde_json::to_string(&record)?;
            if self.store.hset_nx(keys::AGENTS, &id, &payload).await? {
                info!(agent_id = %id, "agent registered");
                return Ok(record);
            }
            n += 1;
        }
    }

    /// Record a heartbeat for a live agent.
    pub async fn heartbeat(&self, agent_id: &str) -> Result<()> {
        let mut agent = self.load_agent(agent_id).await?;
        agent.last_heartbeat = Utc::now();
        self.save_agent(&agent).await
    }

    /// Unregister an agent, releasing its claim if it holds one.
    pub async fn unregister(&self, agent_id: &str) -> Result<()> {
        let agent = self.load_agent(agent_id).await?;

        if let Some(task_id) = &agent.current_task {
            self.store.delete(&keys::task_lock(task_id)).await?;
            if let Ok(mut task) = self.load_task(task_id).await {
                if task.status == TaskStatus::InProgress
                    && task.assigned_agent.as_deref() == Some(agent_id)
                {
                    task.status = TaskStatus::Pending;
                    task.assigned_agent = None;
                    task.claimed_at = None;
                    self.save_task(&task).await?;
                    info!(task_id = %task_id, agent_id = %agent_id, "task released on unregister");
                }
            }
        }

        self.store.hdel(keys::AGENTS, agent_id).await?;
        info!(agent_id = %agent_id, "agent unregistered");
        Ok(())
    }

    /// Check a task's dependencies. A failed dependency transitions the task
    /// to blocked with a diagnostic; the phase scheduler treats blocked as
    /// terminal.
    async fn dependency_state(&self, task: &mut Task) -> Result<DepState> {
        for dep_id in task.dependencies.clone() {
            let Some(raw) = self.store.hget(keys::TASKS, &dep_id).await? else {
                warn!(task_id = %task.id, dependency = %dep_id, "dependency not found");
                return Ok(DepState::NotReady);
            };
            let dep: Task = serde_json::from_str(&raw)?;
            match dep.status {
                TaskStatus::Merged => continue,
                TaskStatus::Failed => {
                    task.status = TaskStatus::Blocked;
                    task.blocked_reason = Some(format!("dependency {dep_id} failed"));
                    self.save_task(task).await?;
                    warn!(task_id = %task.id, dependency = %dep_id, "task blocked by failed dependency");
                    audit::record(
                        self.store.as_ref(),
                        "coordinator",
                        "task_blocked",
                        serde_json::json!({ "task_id": task.id, "dependency": dep_id }),
                    )
                    .await?;
                    return Ok(DepState::Blocked);
                }
                _ => return Ok(DepState::NotReady),
            }
        }
        Ok(DepState::Ready)
    }

    /// Claim the next available task in the active phase.
    ///
    /// Candidates are pending tasks whose dependencies are all merged,
    /// ordered by priority (H, M, L) then task id for a deterministic
    /// tie-break. The first candidate whose lock is acquired wins; lock
    /// contention is not an error, the next candidate is tried.
    pub async fn claim(&self, agent_id: &str) -> Result<ClaimOutcome> {
        let mut agent = self.load_agent(agent_id).await?;

        let Some(phase) = self.scheduler.current_phase().await? else {
            return Ok(ClaimOutcome::NoTasks {
                phase: None,
                reason: "no_active_phase",
            });
        };

        // One task per agent: a working agent must complete (or be reaped)
        // before claiming again.
        if agent.state == AgentState::Working && agent.current_task.is_some() {
            warn!(
                agent_id = %agent_id,
                current_task = ?agent.current_task,
                "claim rejected: agent already holds a task"
            );
            return Ok(ClaimOutcome::NoTasks {
                phase: Some(phase.index),
                reason: "agent_busy",
            });
        }

        let mut candidates = Vec::new();
        for task_id in &phase.tasks {
            let Some(raw) = self.store.hget(keys::TASKS, task_id).await? else {
                continue;
            };
            let mut task: Task = serde_json::from_str(&raw)?;
            if task.status != TaskStatus::Pending {
                continue;
            }
            if !self.config.agent_assignment.enabled(task.kind) {
                debug!(task_id = %task.id, kind = %task.kind, "kind disabled for auto-claim");
                continue;
            }
            match self.dependency_state(&mut task).await? {
                DepState::Ready => candidates.push(task),
                DepState::NotReady | DepState::Blocked => continue,
            }
        }

        candidates.sort_by(|a, b| a.priority.cmp(&b.priority).then(a.id.cmp(&b.id)));

        for mut task in candidates {
            let lock_key = keys::task_lock(&task.id);
            let acquired = self
                .store
                .set_nx_ex(&lock_key, agent_id, self.config.timeouts.task_lock_ttl())
                .await?;
            if !acquired {
                // Another agent claimed it first; try the next candidate.
                continue;
            }

            let role = task.kind.role().to_string();
            task.status = TaskStatus::InProgress;
            task.assigned_agent = Some(agent_id.to_string());
            task.claimed_at = Some(Utc::now());
            self.save_task(&task).await?;

            agent.state = AgentState::Working;
            agent.current_task = Some(task.id.clone());
            agent.current_role = Some(role.clone());
            self.save_agent(&agent).await?;

            info!(task_id = %task.id, agent_id = %agent_id, role = %role, "task claimed");
            audit::record(
                self.store.as_ref(),
                "coordinator",
                "task_claimed",
                serde_json::json!({ "task_id": task.id, "agent_id": agent_id }),
            )
            .await?;

            return Ok(ClaimOutcome::Claimed { task, role });
        }

        Ok(ClaimOutcome::NoTasks {
            phase: Some(phase.index),
            reason: "no_tasks_available",
        })
    }

    /// Complete a task.
    ///
    /// Success marks the task done and enqueues a merge request; failure
    /// finalizes the task and re-checks phase advancement. A task in a
    /// fix-loop status (`conflict`, `test_failed`, `merge_failed`) may be
    /// re-completed by its owning agent, which re-enqueues the merge.
    pub async fn complete(
        &self,
        agent_id: &str,
        task_id: &str,
        success: bool,
        branch_name: Option<String>,
        pr_handle: Option<String>,
    ) -> Result<Option<usize>> {
        let mut task = self.load_task(task_id).await?;

        match task.status {
            TaskStatus::InProgress => {
                let lock_key = keys::task_lock(task_id);
                match self.store.get(&lock_key).await? {
                    None => {
                        return Err(CoordinatorError::LockNotHeld {
                            task: task_id.to_string(),
                            agent: agent_id.to_string(),
                        })
                    }
                    Some(holder) if holder != agent_id => {
                        return Err(CoordinatorError::WrongAgent {
                            task: task_id.to_string(),
                        })
                    }
                    Some(_) => {}
                }
            }
            status if status.is_fixable() => {
                // Fix-loop re-signal: the claim lock is long gone, but only
                // the owning agent may re-complete.
                if task.assigned_agent.as_deref() != Some(agent_id) {
                    return Err(CoordinatorError::WrongAgent {
                        task: task_id.to_string(),
                    });
                }
            }
            status => {
                return Err(CoordinatorError::InvalidTransition {
                    task: task_id.to_string(),
                    status: status.to_string(),
                })
            }
        }

        let now = Utc::now();
        let queue_position = if success {
            let branch = branch_name
                .or_else(|| task.branch_name.clone())
                .ok_or_else(|| CoordinatorError::MissingBranch(task_id.to_string()))?;

            task.status = TaskStatus::Done;
            task.completed_at = Some(now);
            task.branch_name = Some(branch.clone());
            if pr_handle.is_some() {
                task.pr_handle = pr_handle.clone();
            }
            self.save_task(&task).await?;

            let request = MergeRequest::new(task_id, branch, task.pr_handle.clone(), agent_id);
            let payload = serde_json::to_string(&request)?;
            let depth = self.store.rpush(keys::MERGE_QUEUE, &payload).await?;
            info!(task_id = %task_id, agent_id = %agent_id, queue_depth = depth, "task done, merge queued");
            Some(depth)
        } else {
            task.status = TaskStatus::Failed;
            task.completed_at = Some(now);
            self.save_task(&task).await?;
            warn!(task_id = %task_id, agent_id = %agent_id, "task failed");
            audit::record(
                self.store.as_ref(),
                "coordinator",
                "task_failed",
                serde_json::json!({ "task_id": task_id, "agent_id": agent_id }),
            )
            .await?;
            None
        };

        self.store.delete(&keys::task_lock(task_id)).await?;

        // The agent may already be gone (reaped or unregistered); completion
        // still stands.
        if let Ok(mut agent) = self.load_agent(agent_id).await {
            agent.state = AgentState::Idle;
            agent.current_task = None;
            agent.current_role = None;
            if success {
                agent.tasks_completed += 1;
            } else {
                agent.tasks_failed += 1;
            }
            self.save_agent(&agent).await?;
        }

        if !success {
            // A failed task is terminal; the phase may now be able to close.
            self.scheduler.check_phase_advancement().await?;
        }

        Ok(queue_position)
    }

    /// Fetch one task.
    pub async fn get_task(&self, task_id: &str) -> Result<Task> {
        self.load_task(task_id).await
    }

    /// Full orchestrator status.
    pub async fn status(&self) -> Result<StatusResponse> {
        let mut agents = HashMap::new();
        for (id, raw) in self.store.hgetall(keys::AGENTS).await? {
            agents.insert(id, serde_json::from_str::<AgentRecord>(&raw)?);
        }

        let mut tasks = HashMap::new();
        for (id, raw) in self.store.hgetall(keys::TASKS).await? {
            tasks.insert(id, serde_json::from_str::<Task>(&raw)?);
        }

        let phases: Vec<Phase> = match self.store.get(keys::PHASES).await? {
            Some(raw) => serde_json::from_str(&raw)?,
            None => Vec::new(),
        };
        let current_phase = self.scheduler.current_phase().await?;
        let merge_queue_depth = self.store.llen(keys::MERGE_QUEUE).await?;

        let count_status =
            |status: TaskStatus| tasks.values().filter(|t| t.status == status).count();
        let stats = StatusStats {
            total_agents: agents.len(),
            active_agents: agents
                .values()
                .filter(|a| a.state == AgentState::Working)
                .count(),
            idle_agents: agents
                .values()
                .filter(|a| a.state == AgentState::Idle)
                .count(),
            total_tasks: tasks.len(),
            pending_tasks: count_status(TaskStatus::Pending),
            in_progress_tasks: count_status(TaskStatus::InProgress),
            done_tasks: count_status(TaskStatus::Done),
            merged_tasks: count_status(TaskStatus::Merged),
            failed_tasks: count_status(TaskStatus::Failed),
            blocked_tasks: count_status(TaskStatus::Blocked),
            current_phase: current_phase.as_ref().map(|p| p.index),
            total_phases: phases.len(),
            merge_queue_depth,
        };

        Ok(StatusResponse {
            agents,
            tasks,
            phases,
            current_phase,
            stats,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backlog;
    use crate::store::MemoryStore;
    use crate::task::{Priority, TaskKind};

    const YAML: &str = r#"
backlog:
  - { id: T001, title: Schema, kind: setup }
  - { id: T002, title: API, kind: development, pri: H, dependencies: [T001] }
  - { id: T003, title: CLI, kind: development, pri: L, dependencies: [T001] }
  - { id: T004, title: Docs, kind: documentation, dependencies: [T001] }
  - { id: T005, title: E2E, kind: testing, dependencies: [T002, T003] }
"#;

    async fn setup() -> (Coordinator, MemoryStore) {
        let store = MemoryStore::new();
        backlog::initialize(&store, YAML).await.unwrap();
        let coordinator = Coordinator::new(Arc::new(store.clone()), OrchestratorConfig::default());
        (coordinator, store)
    }

    async fn set_status(store: &MemoryStore, task_id: &str, status: TaskStatus) {
        let raw = store.hget(keys::TASKS, task_id).await.unwrap().unwrap();
        let mut task: Task = serde_json::from_str(&raw).unwrap();
        task.status = status;
        store
            .hset(keys::TASKS, task_id, &serde_json::to_string(&task).unwrap())
            .await
            .unwrap();
    }

    fn claimed_id(outcome: &ClaimOutcome) -> &str {
        match outcome {
            ClaimOutcome::Claimed { task, .. } => &task.id,
            ClaimOutcome::NoTasks { reason, .. } => panic!("expected a claim, got {reason}"),
        }
    }

    #[tokio::test]
    async fn test_register_generates_sequential_ids() {
        let (coordinator, _) = setup().await;
        let a = coordinator.register(vec![], None).await.unwrap();
        let b = coordinator.register(vec![], None).await.unwrap();
        assert_eq!(a.agent_id, "agent-1");
        assert_eq!(b.agent_id, "agent-2");
    }

    #[tokio::test]
    async fn test_register_preferred_id_conflict() {
        let (coordinator, _) = setup().await;
        coordinator
            .register(vec![], Some("alpha".into()))
            .await
            .unwrap();
        let err = coordinator
            .register(vec![], Some("alpha".into()))
            .await
            .unwrap_err();
        assert!(matches!(err, CoordinatorError::AgentIdTaken(_)));
    }

    #[tokio::test]
    async fn test_heartbeat_unknown_agent() {
        let (coordinator, _) = setup().await;
        assert!(matches!(
            coordinator.heartbeat("ghost").await.unwrap_err(),
            CoordinatorError::UnknownAgent(_)
        ));
    }

    #[tokio::test]
    async fn test_claim_respects_phase_membership() {
        let (coordinator, _) = setup().await;
        let agent = coordinator.register(vec![], None).await.unwrap();

        // Phase 1 holds only T001; dependent tasks are not claimable yet.
        let outcome = coordinator.claim(&agent.agent_id).await.unwrap();
        assert_eq!(claimed_id(&outcome), "T001");

        // A second agent finds nothing claimable in phase 1.
        let other = coordinator.register(vec![], None).await.unwrap();
        let again = coordinator.claim(&other.agent_id).await.unwrap();
        match again {
            ClaimOutcome::NoTasks { phase, reason } => {
                assert_eq!(phase, Some(1));
                assert_eq!(reason, "no_tasks_available");
            }
            ClaimOutcome::Claimed { task, .. } => panic!("unexpected claim of {}", task.id),
        }
    }

    #[tokio::test]
    async fn test_claim_orders_by_priority_then_id() {
        let (coordinator, store) = setup().await;
        let agent = coordinator.register(vec![], None).await.unwrap();

        // Finish phase 1 so phase 2 (T002 H, T003 L, T004 M) activates.
        set_status(&store, "T001", TaskStatus::Merged).await;
        coordinator
            .scheduler()
            .check_phase_advancement()
            .await
            .unwrap();

        let first = coordinator.claim(&agent.agent_id).await.unwrap();
        assert_eq!(claimed_id(&first), "T002");
        coordinator
            .complete(&agent.agent_id, "T002", true, Some("b/T002".into()), None)
            .await
            .unwrap();

        let second = coordinator.claim(&agent.agent_id).await.unwrap();
        assert_eq!(claimed_id(&second), "T004");
    }

    #[tokio::test]
    async fn test_concurrent_claims_get_distinct_tasks() {
        let (coordinator, store) = setup().await;
        let coordinator = Arc::new(coordinator);
        let a = coordinator.register(vec![], None).await.unwrap();
        let b = coordinator.register(vec![], None).await.unwrap();

        set_status(&store, "T001", TaskStatus::Merged).await;
        coordinator
            .scheduler()
            .check_phase_advancement()
            .await
            .unwrap();

        let ca = {
            let c = coordinator.clone();
            let id = a.agent_id.clone();
            tokio::spawn(async move { c.claim(&id).await.unwrap() })
        };
        let cb = {
            let c = coordinator.clone();
            let id = b.agent_id.clone();
            tokio::spawn(async move { c.claim(&id).await.unwrap() })
        };
        let (ra, rb) = (ca.await.unwrap(), cb.await.unwrap());
        let (ta, tb) = (claimed_id(&ra).to_string(), claimed_id(&rb).to_string());
        assert_ne!(ta, tb, "two agents must never claim the same task");
    }

    #[tokio::test]
    async fn test_failed_dependency_blocks_dependent() {
        let (coordinator, store) = setup().await;
        let agent = coordinator.register(vec![], None).await.unwrap();

        set_status(&store, "T001", TaskStatus::Merged).await;
        coordinator
            .scheduler()
            .check_phase_advancement()
            .await
            .unwrap();
        set_status(&store, "T002", TaskStatus::Failed).await;
        set_status(&store, "T003", TaskStatus::Merged).await;
        set_status(&store, "T004", TaskStatus::Merged).await;
        coordinator
            .scheduler()
            .check_phase_advancement()
            .await
            .unwrap();

        // Phase 3 holds T005, whose dependency T002 failed.
        let outcome = coordinator.claim(&agent.agent_id).await.unwrap();
        assert!(matches!(outcome, ClaimOutcome::NoTasks { .. }));

        let task = coordinator.get_task("T005").await.unwrap();
        assert_eq!(task.status, TaskStatus::Blocked);
        assert_eq!(
            task.blocked_reason.as_deref(),
            Some("dependency T002 failed")
        );
    }

    #[tokio::test]
    async fn test_kind_gating_skips_disabled_kinds() {
        let store = MemoryStore::new();
        backlog::initialize(&store, YAML).await.unwrap();
        let mut config = OrchestratorConfig::default();
        config.agent_assignment.disable(TaskKind::Setup);
        let coordinator = Coordinator::new(Arc::new(store), config);

        let agent = coordinator.register(vec![], None).await.unwrap();
        let outcome = coordinator.claim(&agent.agent_id).await.unwrap();
        assert!(matches!(outcome, ClaimOutcome::NoTasks { .. }));
    }

    #[tokio::test]
    async fn test_complete_success_enqueues_merge() {
        let (coordinator, store) = setup().await;
        let agent = coordinator.register(vec![], None).await.unwrap();
        coordinator.claim(&agent.agent_id).await.unwrap();

        let position = coordinator
            .complete(
                &agent.agent_id,
                "T001",
                true,
                Some("agent-1/task-T001".into()),
                None,
            )
            .await
            .unwrap();
        assert_eq!(position, Some(1));

        let task = coordinator.get_task("T001").await.unwrap();
        assert_eq!(task.status, TaskStatus::Done);
        assert!(store
            .get(&keys::task_lock("T001"))
            .await
            .unwrap()
            .is_none());

        let raw = store
            .blpop(keys::MERGE_QUEUE, std::time::Duration::from_millis(10))
            .await
            .unwrap()
            .unwrap();
        let request: MergeRequest = serde_json::from_str(&raw).unwrap();
        assert_eq!(request.task_id, "T001");
        assert_eq!(request.branch_name, "agent-1/task-T001");
        assert_eq!(request.agent_id, agent.agent_id);
    }

    #[tokio::test]
    async fn test_complete_requires_branch_on_success() {
        let (coordinator, _) = setup().await;
        let agent = coordinator.register(vec![], None).await.unwrap();
        coordinator.claim(&agent.agent_id).await.unwrap();

        let err = coordinator
            .complete(&agent.agent_id, "T001", true, None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, CoordinatorError::MissingBranch(_)));
    }

    #[tokio::test]
    async fn test_complete_rejects_non_holder() {
        let (coordinator, _) = setup().await;
        let a = coordinator.register(vec![], None).await.unwrap();
        let b = coordinator.register(vec![], None).await.unwrap();
        coordinator.claim(&a.agent_id).await.unwrap();

        let err = coordinator
            .complete(&b.agent_id, "T001", true, Some("x".into()), None)
            .await
            .unwrap_err();
        assert!(matches!(err, CoordinatorError::WrongAgent { .. }));
    }

    #[tokio::test]
    async fn test_repeated_complete_rejected() {
        let (coordinator, _) = setup().await;
        let agent = coordinator.register(vec![], None).await.unwrap();
        coordinator.claim(&agent.agent_id).await.unwrap();
        coordinator
            .complete(&agent.agent_id, "T001", true, Some("b".into()), None)
            .await
            .unwrap();

        let err = coordinator
            .complete(&agent.agent_id, "T001", true, Some("b".into()), None)
            .await
            .unwrap_err();
        assert!(matches!(err, CoordinatorError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn test_terminal_status_never_transitions() {
        let (coordinator, store) = setup().await;
        let agent = coordinator.register(vec![], None).await.unwrap();

        set_status(&store, "T001", TaskStatus::Merged).await;
        let err = coordinator
            .complete(&agent.agent_id, "T001", true, Some("b".into()), None)
            .await
            .unwrap_err();
        assert!(matches!(err, CoordinatorError::InvalidTransition { .. }));

        // A merged task is not pending, so it is never a claim candidate.
        set_status(&store, "T002", TaskStatus::Failed).await;
        let err = coordinator
            .complete(&agent.agent_id, "T002", false, None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, CoordinatorError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn test_fix_resignal_reenqueues_merge() {
        let (coordinator, store) = setup().await;
        let agent = coordinator.register(vec![], None).await.unwrap();
        coordinator.claim(&agent.agent_id).await.unwrap();
        coordinator
            .complete(&agent.agent_id, "T001", true, Some("b".into()), None)
            .await
            .unwrap();
        // Drain the first merge request.
        store
            .blpop(keys::MERGE_QUEUE, std::time::Duration::from_millis(10))
            .await
            .unwrap();

        // Merge worker pushed the task into the fix loop.
        set_status(&store, "T001", TaskStatus::TestFailed).await;

        let position = coordinator
            .complete(&agent.agent_id, "T001", true, Some("b".into()), None)
            .await
            .unwrap();
        assert_eq!(position, Some(1));
        let task = coordinator.get_task("T001").await.unwrap();
        assert_eq!(task.status, TaskStatus::Done);
    }

    #[tokio::test]
    async fn test_complete_failure_is_terminal_and_advances_phase() {
        let store = MemoryStore::new();
        let yaml = "backlog:\n  - { id: T001, title: A, kind: setup }\n";
        backlog::initialize(&store, yaml).await.unwrap();
        let coordinator = Coordinator::new(Arc::new(store.clone()), OrchestratorConfig::default());

        let agent = coordinator.register(vec![], None).await.unwrap();
        coordinator.claim(&agent.agent_id).await.unwrap();
        coordinator
            .complete(&agent.agent_id, "T001", false, None, None)
            .await
            .unwrap();

        let task = coordinator.get_task("T001").await.unwrap();
        assert_eq!(task.status, TaskStatus::Failed);
        // Single phase, single failed task: the backlog is complete.
        assert!(store.get(keys::CURRENT_PHASE).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_unregister_releases_claim() {
        let (coordinator, store) = setup().await;
        let agent = coordinator.register(vec![], None).await.unwrap();
        coordinator.claim(&agent.agent_id).await.unwrap();

        coordinator.unregister(&agent.agent_id).await.unwrap();
        let task = coordinator.get_task("T001").await.unwrap();
        assert_eq!(task.status, TaskStatus::Pending);
        assert!(task.assigned_agent.is_none());
        assert!(store
            .get(&keys::task_lock("T001"))
            .await
            .unwrap()
            .is_none());
        assert_eq!(store.hlen(keys::AGENTS).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_status_counters() {
        let (coordinator, _) = setup().await;
        let agent = coordinator.register(vec![], None).await.unwrap();
        coordinator.claim(&agent.agent_id).await.unwrap();

        let status = coordinator.status().await.unwrap();
        assert_eq!(status.stats.total_tasks, 5);
        assert_eq!(status.stats.in_progress_tasks, 1);
        assert_eq!(status.stats.pending_tasks, 4);
        assert_eq!(status.stats.active_agents, 1);
        assert_eq!(status.stats.current_phase, Some(1));
        assert_eq!(status.stats.total_phases, 3);
        assert_eq!(status.stats.merge_queue_depth, 0);
    }

    #[tokio::test]
    async fn test_claim_priority_tie_breaks_lexicographically() {
        let store = MemoryStore::new();
        let yaml = r#"
backlog:
  - { id: T-b, title: B, kind: development, pri: H }
  - { id: T-a, title: A, kind: development, pri: H }
"#;
        backlog::initialize(&store, yaml).await.unwrap();
        let coordinator = Coordinator::new(Arc::new(store), OrchestratorConfig::default());
        let agent = coordinator.register(vec![], None).await.unwrap();
        let outcome = coordinator.claim(&agent.agent_id).await.unwrap();
        assert_eq!(claimed_id(&outcome), "T-a");
        match outcome {
            ClaimOutcome::Claimed { role, .. } => assert_eq!(role, "developer"),
            ClaimOutcome::NoTasks { .. } => unreachable!(),
        }

        // T-b is still pending, but a working agent holds one task at a time.
        let busy = coordinator.claim(&agent.agent_id).await.unwrap();
        match busy {
            ClaimOutcome::NoTasks { reason, .. } => assert_eq!(reason, "agent_busy"),
            ClaimOutcome::Claimed { task, .. } => panic!("unexpected claim of {}", task.id),
        }
    }
}
