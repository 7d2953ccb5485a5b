//! Dead-agent reaper
//!
//! Background sweep that releases claim locks orphaned by dead agents and
//! resets their tasks to pending. The reaper is the only writer authorized
//! to forcibly unlock and reset a task; lock expiration alone never resets
//! anything. Agents do not self-cancel claims on heartbeat miss.

use crate::audit;
use crate::config::TimeoutsConfig;
use crate::error::CoordinatorError;
use crate::notify::{NotificationBus, OrchestratorEvent};
use crate::scheduler::PhaseScheduler;
use crate::store::{keys, StateStore};
use crate::task::{Task, TaskStatus};
use chrono::Utc;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Background sweeper for orphaned claims.
pub struct Reaper {
    store: Arc<dyn StateStore>,
    scheduler: PhaseScheduler,
    notify: NotificationBus,
    timeouts: TimeoutsConfig,
}

impl Reaper {
    /// Create a reaper over the shared store.
    #[must_use]
    pub fn new(store: Arc<dyn StateStore>, timeouts: TimeoutsConfig) -> Self {
        let scheduler = PhaseScheduler::new(store.clone());
        let notify = NotificationBus::new(store.clone());
        Self {
            store,
            scheduler,
            notify,
            timeouts,
        }
    }

    /// Run the sweep loop until cancelled.
    pub async fn run(&self, shutdown: CancellationToken) {
        info!(
            interval_secs = self.timeouts.reaper_interval,
            timeout_secs = self.timeouts.agent_timeout,
            "reaper started"
        );
        loop {
            tokio::select! {
                () = tokio::time::sleep(self.timeouts.reaper_interval()) => {
                    match self.sweep().await {
                        Ok(0) => {}
                        Ok(count) => info!(reset = count, "reaper cycle complete"),
                        Err(e) => error!(error = %e, "reaper cycle failed"),
                    }
                }
                () = shutdown.cancelled() => {
                    info!("reaper shutting down");
                    break;
                }
            }
        }
    }

    /// One sweep: reap every agent whose heartbeat is older than
    /// `agent_timeout`, releasing its lock and resetting its task.
    /// Returns the number of tasks reset.
    pub async fn sweep(&self) -> Result<u32, CoordinatorError> {
        let now = Utc::now();
        let agents = self.store.hgetall(keys::AGENTS).await?;
        let mut reset_count = 0u32;
        let mut reaped_any = false;

        for (agent_id, raw) in agents {
            let agent: crate::agent::AgentRecord = match serde_json::from_str(&raw) {
                Ok(agent) => agent,
                Err(e) => {
                    error!(agent_id = %agent_id, error = %e, "undecodable agent record, skipping");
                    continue;
                }
            };

            let age = agent.heartbeat_age(now);
            if age <= self.timeouts.agent_timeout as i64 {
                continue;
            }
            warn!(agent_id = %agent_id, heartbeat_age_secs = age, "agent is dead");

            if let Some(task_id) = &agent.current_task {
                let lock_released = self.store.delete(&keys::task_lock(task_id)).await?;
                if lock_released {
                    info!(task_id = %task_id, "released orphaned claim lock");
                }

                if let Some(raw_task) = self.store.hget(keys::TASKS, task_id).await? {
                    let mut task: Task = serde_json::from_str(&raw_task)?;
                    if task.status == TaskStatus::InProgress
                        && task.assigned_agent.as_deref() == Some(agent_id.as_str())
                    {
                        task.status = TaskStatus::Pending;
                        task.assigned_agent = None;
                        task.claimed_at = None;
                        self.store
                            .hset(keys::TASKS, task_id, &serde_json::to_string(&task)?)
                            .await?;
                        info!(task_id = %task_id, "reset orphaned task to pending");
                        reset_count += 1;

                        self.notify
                            .broadcast(&OrchestratorEvent::TaskReset {
                                task_id: task_id.clone(),
                                agent_id: agent_id.clone(),
                            })
                            .await?;
                        audit::record(
                            self.store.as_ref(),
                            "reaper",
                            "task_reset",
                            serde_json::json!({
                                "task_id": task_id,
                                "agent_id": agent_id,
                                "heartbeat_age_secs": age,
                            }),
                        )
                        .await?;
                    }
                }
            }

            self.store.hdel(keys::AGENTS, &agent_id).await?;
            reaped_any = true;
            audit::record(
                self.store.as_ref(),
                "reaper",
                "agent_reaped",
                serde_json::json!({ "agent_id": agent_id, "heartbeat_age_secs": age }),
            )
            .await?;
        }

        if reaped_any {
            // A reset task cannot complete a phase, but a reaped idle agent
            // does not change task state either; re-evaluate regardless so
            // liveness never depends on the next completion.
            self.scheduler.check_phase_advancement().await?;
        }

        Ok(reset_count)
    }
}
