//! Orchestrator configuration
//!
//! The recognized option surface, shared by the coordinator server, the merge
//! worker and agent runtimes. Registration returns a snapshot of this config
//! to each agent so runtimes need no separate config file.

use crate::task::TaskKind;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

fn default_true() -> bool {
    true
}

/// Git workflow options.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitConfig {
    /// Per-task branches isolate concurrent work; always true for multi-agent.
    #[serde(default = "default_true")]
    pub use_branches: bool,
    /// Gates remote push and PR creation.
    #[serde(default)]
    pub push_to_remote: bool,
    /// Gates PR creation independent of push.
    #[serde(default)]
    pub auto_pr: bool,
    /// Mainline branch name.
    #[serde(default = "default_main_branch")]
    pub main_branch: String,
    /// Template for per-task branch names; `{agent_id}` and `{task_id}`
    /// placeholders are substituted.
    #[serde(default = "default_branch_pattern")]
    pub branch_pattern: String,
}

fn default_main_branch() -> String {
    "main".to_string()
}

fn default_branch_pattern() -> String {
    "{agent_id}/task-{task_id}".to_string()
}

impl Default for GitConfig {
    fn default() -> Self {
        Self {
            use_branches: true,
            push_to_remote: false,
            auto_pr: false,
            main_branch: default_main_branch(),
            branch_pattern: default_branch_pattern(),
        }
    }
}

impl GitConfig {
    /// Render the branch name for an agent/task pair.
    #[must_use]
    pub fn branch_name(&self, agent_id: &str, task_id: &str) -> String {
        self.branch_pattern
            .replace("{agent_id}", agent_id)
            .replace("{task_id}", task_id)
    }
}

/// A single quality check invoked during the merge test gate and the agent's
/// local test run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualityCheck {
    /// Display name
    pub name: String,
    /// Command line, split on whitespace into an argv list
    pub command: String,
    /// Required checks gate progression; advisory checks are only logged.
    #[serde(default)]
    pub required: bool,
}

impl QualityCheck {
    /// Create a check.
    #[must_use]
    pub fn new(name: impl Into<String>, command: impl Into<String>, required: bool) -> Self {
        Self {
            name: name.into(),
            command: command.into(),
            required,
        }
    }

    /// The command split into an argv list.
    #[must_use]
    pub fn argv(&self) -> Vec<String> {
        self.command.split_whitespace().map(String::from).collect()
    }
}

/// Quality gate options.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualityGatesConfig {
    /// Master switch for the merge test gate and local agent test runs.
    #[serde(default = "default_true")]
    pub run_tests: bool,
    /// Ordered check list. When empty, defaults are derived from the detected
    /// project kind.
    #[serde(default)]
    pub checks: Vec<QualityCheck>,
}

impl Default for QualityGatesConfig {
    fn default() -> Self {
        Self {
            run_tests: true,
            checks: Vec::new(),
        }
    }
}

/// Timeout and interval knobs, all in seconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutsConfig {
    /// Claim lock TTL. Should be roughly 2x `agent_timeout` so the lock
    /// cannot expire and be re-claimed before the reaper resets the task.
    #[serde(default = "default_task_lock_ttl")]
    pub task_lock_ttl: u64,
    /// Heartbeat age after which an agent is considered dead.
    #[serde(default = "default_agent_timeout")]
    pub agent_timeout: u64,
    /// Agent heartbeat cadence.
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval: u64,
    /// Sleep between claim attempts when no task is available.
    #[serde(default = "default_claim_wait")]
    pub claim_wait: u64,
    /// Branch-head polling cadence while waiting for an implementation.
    #[serde(default = "default_impl_poll")]
    pub impl_poll: u64,
    /// Wall-clock limit on the implementation wait.
    #[serde(default = "default_impl_timeout")]
    pub impl_timeout: u64,
    /// Wall-clock limit per fix-loop iteration.
    #[serde(default = "default_fix_timeout")]
    pub fix_timeout: u64,
    /// Dead-agent reaper cadence.
    #[serde(default = "default_reaper_interval")]
    pub reaper_interval: u64,
    /// Limit per merge-worker step subprocess (tests are the long pole).
    #[serde(default = "default_merge_step_timeout")]
    pub merge_step_timeout: u64,
}

fn default_task_lock_ttl() -> u64 {
    600
}
fn default_agent_timeout() -> u64 {
    300
}
fn default_heartbeat_interval() -> u64 {
    30
}
fn default_claim_wait() -> u64 {
    3
}
fn default_impl_poll() -> u64 {
    10
}
fn default_impl_timeout() -> u64 {
    3600
}
fn default_fix_timeout() -> u64 {
    1800
}
fn default_reaper_interval() -> u64 {
    60
}
fn default_merge_step_timeout() -> u64 {
    1800
}

impl Default for TimeoutsConfig {
    fn default() -> Self {
        Self {
            task_lock_ttl: default_task_lock_ttl(),
            agent_timeout: default_agent_timeout(),
            heartbeat_interval: default_heartbeat_interval(),
            claim_wait: default_claim_wait(),
            impl_poll: default_impl_poll(),
            impl_timeout: default_impl_timeout(),
            fix_timeout: default_fix_timeout(),
            reaper_interval: default_reaper_interval(),
            merge_step_timeout: default_merge_step_timeout(),
        }
    }
}

impl TimeoutsConfig {
    /// Claim lock TTL as a duration.
    #[must_use]
    pub fn task_lock_ttl(&self) -> Duration {
        Duration::from_secs(self.task_lock_ttl)
    }

    /// Dead-agent threshold as a duration.
    #[must_use]
    pub fn agent_timeout(&self) -> Duration {
        Duration::from_secs(self.agent_timeout)
    }

    /// Heartbeat cadence as a duration.
    #[must_use]
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval)
    }

    /// Claim retry sleep as a duration.
    #[must_use]
    pub fn claim_wait(&self) -> Duration {
        Duration::from_secs(self.claim_wait)
    }

    /// Implementation poll cadence as a duration.
    #[must_use]
    pub fn impl_poll(&self) -> Duration {
        Duration::from_secs(self.impl_poll)
    }

    /// Implementation wait limit as a duration.
    #[must_use]
    pub fn impl_timeout(&self) -> Duration {
        Duration::from_secs(self.impl_timeout)
    }

    /// Fix-iteration limit as a duration.
    #[must_use]
    pub fn fix_timeout(&self) -> Duration {
        Duration::from_secs(self.fix_timeout)
    }

    /// Reaper cadence as a duration.
    #[must_use]
    pub fn reaper_interval(&self) -> Duration {
        Duration::from_secs(self.reaper_interval)
    }

    /// Merge-step subprocess limit as a duration.
    #[must_use]
    pub fn merge_step_timeout(&self) -> Duration {
        Duration::from_secs(self.merge_step_timeout)
    }
}

/// Advanced tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdvancedConfig {
    /// Bound on merge retries before a task is marked failed.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Bound on fix-loop iterations per task.
    #[serde(default = "default_fix_max_iterations")]
    pub fix_max_iterations: u32,
}

fn default_max_retries() -> u32 {
    3
}
fn default_fix_max_iterations() -> u32 {
    3
}

impl Default for AdvancedConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            fix_max_iterations: default_fix_max_iterations(),
        }
    }
}

/// Per-kind claim gating.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KindAssignment {
    /// When false, tasks of this kind are never auto-claimed.
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl Default for KindAssignment {
    fn default() -> Self {
        Self { enabled: true }
    }
}

/// Operator switches for disabling auto-claim of specific task kinds.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AgentAssignmentConfig {
    /// Kind → gating flags; absent kinds default to enabled.
    pub kinds: BTreeMap<TaskKind, KindAssignment>,
}

impl AgentAssignmentConfig {
    /// Whether tasks of `kind` may be auto-claimed.
    #[must_use]
    pub fn enabled(&self, kind: TaskKind) -> bool {
        self.kinds.get(&kind).map_or(true, |k| k.enabled)
    }

    /// Disable auto-claim for a kind (used by tests and operators).
    pub fn disable(&mut self, kind: TaskKind) {
        self.kinds.insert(kind, KindAssignment { enabled: false });
    }
}

/// Full orchestrator configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Git workflow options
    #[serde(default)]
    pub git: GitConfig,
    /// Quality gate options
    #[serde(default)]
    pub quality_gates: QualityGatesConfig,
    /// Timeouts and intervals
    #[serde(default)]
    pub timeouts: TimeoutsConfig,
    /// Advanced tuning
    #[serde(default)]
    pub advanced: AdvancedConfig,
    /// Per-kind claim gating
    #[serde(default)]
    pub agent_assignment: AgentAssignmentConfig,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = OrchestratorConfig::default();
        assert!(config.git.use_branches);
        assert!(!config.git.push_to_remote);
        assert_eq!(config.git.main_branch, "main");
        assert_eq!(config.timeouts.task_lock_ttl, 600);
        assert_eq!(config.timeouts.agent_timeout, 300);
        assert_eq!(config.advanced.max_retries, 3);
        assert!(config.quality_gates.run_tests);
        assert!(config.quality_gates.checks.is_empty());
    }

    #[test]
    fn test_lock_ttl_exceeds_reaper_window() {
        // The lock must not expire before agent_timeout + one reaper tick.
        let t = TimeoutsConfig::default();
        assert!(t.task_lock_ttl > t.agent_timeout + t.reaper_interval);
    }

    #[test]
    fn test_branch_name_pattern() {
        let git = GitConfig::default();
        assert_eq!(git.branch_name("agent-1", "T007"), "agent-1/task-T007");

        let custom = GitConfig {
            branch_pattern: "work/{task_id}".into(),
            ..GitConfig::default()
        };
        assert_eq!(custom.branch_name("agent-1", "T007"), "work/T007");
    }

    #[test]
    fn test_kind_gating_defaults_enabled() {
        let mut assignment = AgentAssignmentConfig::default();
        assert!(assignment.enabled(TaskKind::Documentation));
        assignment.disable(TaskKind::Documentation);
        assert!(!assignment.enabled(TaskKind::Documentation));
        assert!(assignment.enabled(TaskKind::Development));
    }

    #[test]
    fn test_deserialize_partial_toml_like_json() {
        let value = serde_json::json!({
            "git": { "push_to_remote": true, "main_branch": "trunk" },
            "timeouts": { "agent_timeout": 120 },
            "agent_assignment": { "documentation": { "enabled": false } }
        });
        let config: OrchestratorConfig = serde_json::from_value(value).unwrap();
        assert!(config.git.push_to_remote);
        assert_eq!(config.git.main_branch, "trunk");
        assert_eq!(config.timeouts.agent_timeout, 120);
        assert_eq!(config.timeouts.heartbeat_interval, 30);
        assert!(!config.agent_assignment.enabled(TaskKind::Documentation));
    }

    #[test]
    fn test_check_argv_split() {
        let check = QualityCheck::new("Tests Pass", "cargo test --workspace", true);
        assert_eq!(check.argv(), vec!["cargo", "test", "--workspace"]);
    }
}
