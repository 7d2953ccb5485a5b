//! Phase scheduler
//!
//! Runs after every task reaches a terminal state. When every task in the
//! active phase is terminal the phase completes and the next one activates;
//! a broadcast event wakes idle agents so they do not wait out a full poll
//! interval. When no further phases exist the backlog is complete.

use crate::audit;
use crate::error::CoordinatorError;
use crate::notify::{NotificationBus, OrchestratorEvent};
use crate::phase::Phase;
use crate::store::{keys, StateStore};
use crate::task::Task;
use chrono::Utc;
use std::sync::Arc;
use tracing::{info, warn};

/// Result of a phase-advancement check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PhaseTransition {
    /// The active phase completed and the next one was activated.
    Advanced {
        /// Index of the phase that completed
        completed: u32,
        /// Index of the phase that became active
        activated: u32,
    },
    /// The final phase completed; the backlog is done.
    BacklogComplete {
        /// Index of the last phase
        completed: u32,
    },
}

/// Checks and performs phase advancement.
#[derive(Clone)]
pub struct PhaseScheduler {
    store: Arc<dyn StateStore>,
    notify: NotificationBus,
}

impl PhaseScheduler {
    /// Create a scheduler over the shared store.
    #[must_use]
    pub fn new(store: Arc<dyn StateStore>) -> Self {
        let notify = NotificationBus::new(store.clone());
        Self { store, notify }
    }

    /// Load the active phase, if any.
    pub async fn current_phase(&self) -> Result<Option<Phase>, CoordinatorError> {
        match self.store.get(keys::CURRENT_PHASE).await? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    /// If every task in the active phase is terminal, complete it and
    /// activate the next phase (or finish the backlog).
    pub async fn check_phase_advancement(
        &self,
    ) -> Result<Option<PhaseTransition>, CoordinatorError> {
        let Some(mut current) = self.current_phase().await? else {
            return Ok(None);
        };

        for task_id in &current.tasks {
            let Some(raw) = self.store.hget(keys::TASKS, task_id).await? else {
                warn!(task_id = %task_id, "phase references unknown task; ignoring");
                continue;
            };
            let task: Task = serde_json::from_str(&raw)?;
            if !task.status.is_terminal() {
                return Ok(None);
            }
        }

        let now = Utc::now();
        current.complete(now);
        info!(phase = current.index, name = %current.name, "phase complete");

        let mut phases: Vec<Phase> = match self.store.get(keys::PHASES).await? {
            Some(raw) => serde_json::from_str(&raw)?,
            None => Vec::new(),
        };
        if let Some(slot) = phases.iter_mut().find(|p| p.index == current.index) {
            *slot = current.clone();
        }

        audit::record(
            self.store.as_ref(),
            "scheduler",
            "phase_completed",
            serde_json::json!({ "phase": current.index, "name": current.name }),
        )
        .await?;

        // Phases are 1-based, so the completed index doubles as the position
        // of the next phase in the list.
        let next = phases
            .iter_mut()
            .find(|p| p.index == current.index + 1)
            .map(|p| {
                p.activate(now);
                p.clone()
            });

        let transition = match next {
            Some(next_phase) => {
                self.store
                    .set(keys::PHASES, &serde_json::to_string(&phases)?)
                    .await?;
                self.store
                    .set(keys::CURRENT_PHASE, &serde_json::to_string(&next_phase)?)
                    .await?;

                info!(phase = next_phase.index, name = %next_phase.name, "phase activated");
                self.notify
                    .broadcast(&OrchestratorEvent::PhaseStarted {
                        index: next_phase.index,
                        name: next_phase.name.clone(),
                    })
                    .await?;
                audit::record(
                    self.store.as_ref(),
                    "scheduler",
                    "phase_started",
                    serde_json::json!({ "phase": next_phase.index, "name": next_phase.name }),
                )
                .await?;

                PhaseTransition::Advanced {
                    completed: current.index,
                    activated: next_phase.index,
                }
            }
            None => {
                self.store
                    .set(keys::PHASES, &serde_json::to_string(&phases)?)
                    .await?;
                self.store.delete(keys::CURRENT_PHASE).await?;

                info!("all phases complete");
                self.notify
                    .broadcast(&OrchestratorEvent::BacklogComplete)
                    .await?;
                audit::record(
                    self.store.as_ref(),
                    "scheduler",
                    "backlog_complete",
                    serde_json::json!({ "phases": phases.len() }),
                )
                .await?;

                PhaseTransition::BacklogComplete {
                    completed: current.index,
                }
            }
        };

        Ok(Some(transition))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backlog;
    use crate::store::MemoryStore;
    use crate::task::TaskStatus;

    async fn seed(store: &MemoryStore) {
        let yaml = r#"
backlog:
  - { id: T001, title: A, kind: setup }
  - { id: T002, title: B, kind: setup }
  - { id: T003, title: C, kind: development, dependencies: [T001, T002] }
"#;
        backlog::initialize(store, yaml).await.unwrap();
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

    #[tokio::test]
    async fn test_no_advancement_while_tasks_open() {
        let store = MemoryStore::new();
        seed(&store).await;
        let scheduler = PhaseScheduler::new(Arc::new(store.clone()));

        set_status(&store, "T001", TaskStatus::Merged).await;
        assert_eq!(scheduler.check_phase_advancement().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_advances_when_all_terminal() {
        let store = MemoryStore::new();
        seed(&store).await;
        let scheduler = PhaseScheduler::new(Arc::new(store.clone()));

        set_status(&store, "T001", TaskStatus::Merged).await;
        // Blocked and failed are terminal for phase accounting.
        set_status(&store, "T002", TaskStatus::Failed).await;

        let transition = scheduler.check_phase_advancement().await.unwrap();
        assert_eq!(
            transition,
            Some(PhaseTransition::Advanced {
                completed: 1,
                activated: 2
            })
        );

        let current = scheduler.current_phase().await.unwrap().unwrap();
        assert_eq!(current.index, 2);
        assert_eq!(current.tasks, vec!["T003"]);
    }

    #[tokio::test]
    async fn test_broadcasts_phase_start() {
        let store = MemoryStore::new();
        seed(&store).await;
        let scheduler = PhaseScheduler::new(Arc::new(store.clone()));
        let bus = NotificationBus::new(Arc::new(store.clone()) as Arc<dyn StateStore>);
        let mut events = bus.subscribe_events().await.unwrap();

        set_status(&store, "T001", TaskStatus::Merged).await;
        set_status(&store, "T002", TaskStatus::Merged).await;
        scheduler.check_phase_advancement().await.unwrap();

        let raw = tokio::time::timeout(std::time::Duration::from_secs(1), events.recv())
            .await
            .unwrap()
            .unwrap();
        let event: OrchestratorEvent = serde_json::from_str(&raw).unwrap();
        assert!(matches!(event, OrchestratorEvent::PhaseStarted { index: 2, .. }));
    }

    #[tokio::test]
    async fn test_backlog_completes_after_last_phase() {
        let store = MemoryStore::new();
        seed(&store).await;
        let scheduler = PhaseScheduler::new(Arc::new(store.clone()));

        set_status(&store, "T001", TaskStatus::Merged).await;
        set_status(&store, "T002", TaskStatus::Merged).await;
        scheduler.check_phase_advancement().await.unwrap();

        set_status(&store, "T003", TaskStatus::Blocked).await;
        let transition = scheduler.check_phase_advancement().await.unwrap();
        assert_eq!(
            transition,
            Some(PhaseTransition::BacklogComplete { completed: 2 })
        );

        assert!(scheduler.current_phase().await.unwrap().is_none());
        // Re-checking with no active phase is a no-op.
        assert_eq!(scheduler.check_phase_advancement().await.unwrap(), None);
    }
}
