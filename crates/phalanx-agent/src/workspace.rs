//! Workspace brief files
//!
//! On claim, the agent materializes a human-readable task brief
//! (`CURRENT_TASK.md`) and a machine-readable context file
//! (`.agent-context/task-{id}.json`) inside the working tree for the
//! external implementer. A symmetric pair (`FIX_TASK.md`,
//! `.agent-context/fix-{id}-{kind}.json`) drives the fix loop. The briefs
//! are removed once the awaited commit lands; the commit is authored
//! externally and may or may not include them, both are accepted.

use crate::error::AgentError;
use chrono::Utc;
use phalanx_core::task::Task;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Name of the human-readable task brief.
pub const TASK_BRIEF: &str = "CURRENT_TASK.md";
/// Name of the human-readable fix brief.
pub const FIX_BRIEF: &str = "FIX_TASK.md";
/// Directory holding machine-readable context files.
pub const CONTEXT_DIR: &str = ".agent-context";

/// Failure context rendered into a fix brief.
#[derive(Debug, Clone)]
pub enum FixContext {
    /// A required quality check failed during the merge test gate.
    TestFailure {
        /// Failing check name
        check: String,
        /// Captured check output
        output: String,
        /// Task branch
        branch: String,
    },
    /// The merge probe or rebase reported conflicts.
    MergeConflict {
        /// Task branch
        branch: String,
        /// Conflicted files
        files: Vec<String>,
    },
}

impl FixContext {
    fn kind(&self) -> &'static str {
        match self {
            Self::TestFailure { .. } => "test_failure",
            Self::MergeConflict { .. } => "merge_conflict",
        }
    }
}

/// Brief-file manager rooted at the agent's working tree.
#[derive(Debug, Clone)]
pub struct Workspace {
    root: PathBuf,
}

impl Workspace {
    /// Create a manager for a working tree.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Path of the task brief.
    #[must_use]
    pub fn task_brief_path(&self) -> PathBuf {
        self.root.join(TASK_BRIEF)
    }

    /// Path of the fix brief.
    #[must_use]
    pub fn fix_brief_path(&self) -> PathBuf {
        self.root.join(FIX_BRIEF)
    }

    fn context_dir(&self) -> PathBuf {
        self.root.join(CONTEXT_DIR)
    }

    /// Write the task brief and context file for a claimed task.
    pub fn prepare_task(
        &self,
        task: &Task,
        role: &str,
        agent_id: &str,
        branch: &str,
    ) -> Result<(), AgentError> {
        let deps = if task.dependencies.is_empty() {
            "none".to_string()
        } else {
            task.dependencies.join(", ")
        };
        let brief = format!(
            "# Current task: {title}\n\n\
             - Task id: `{id}`\n\
             - Kind: `{kind}`\n\
             - Priority: `{priority:?}`\n\
             - Agent: `{agent_id}`\n\
             - Branch: `{branch}`\n\
             - Dependencies: {deps}\n\n\
             ## Description\n\n{description}\n\n\
             ## Acceptance criteria\n\n{criteria}\n\n\
             ## When done\n\n\
             Commit your work on this branch:\n\n\
             ```\n\
             git add .\n\
             git commit -m \"feat: {title} ({id})\"\n\
             ```\n\n\
             The orchestrator detects the commit and continues automatically.\n\n\
             Started: {started}\n",
            title = task.title,
            id = task.id,
            kind = task.kind,
            priority = task.priority,
            description = if task.description.is_empty() {
                "No description provided."
            } else {
                &task.description
            },
            criteria = task
                .acceptance_criteria
                .as_deref()
                .unwrap_or("No acceptance criteria provided."),
            started = Utc::now().to_rfc3339(),
        );
        std::fs::write(self.task_brief_path(), brief)?;
        debug!(path = %self.task_brief_path().display(), "task brief written");

        std::fs::create_dir_all(self.context_dir())?;
        let context = serde_json::json!({
            "task": task,
            "role": role,
            "agent_id": agent_id,
            "branch": branch,
            "started_at": Utc::now(),
        });
        let context_path = self.context_dir().join(format!("task-{}.json", task.id));
        std::fs::write(&context_path, serde_json::to_string_pretty(&context)?)?;
        debug!(path = %context_path.display(), "task context written");
        Ok(())
    }

    /// Remove the task brief and context file.
    pub fn clear_task(&self, task_id: &str) -> Result<(), AgentError> {
        remove_if_exists(&self.task_brief_path())?;
        remove_if_exists(&self.context_dir().join(format!("task-{task_id}.json")))?;
        Ok(())
    }

    /// Write the fix brief and context file for a failure notification.
    pub fn prepare_fix(&self, task_id: &str, context: &FixContext) -> Result<(), AgentError> {
        let brief = match context {
            FixContext::TestFailure {
                check,
                output,
                branch,
            } => format!(
                "# Fix required: tests failed for {task_id}\n\n\
                 - Failing check: `{check}`\n\
                 - Branch: `{branch}`\n\
                 - Detected: {now}\n\n\
                 ## Captured output\n\n\
                 ```\n{output}\n```\n\n\
                 ## What to do\n\n\
                 1. Read the output above and find the root cause\n\
                 2. Fix the code on this branch\n\
                 3. Run the checks locally to verify\n\
                 4. Commit the fix:\n\n\
                 ```\n\
                 git add .\n\
                 git commit -m \"fix: {task_id} test failures\"\n\
                 ```\n\n\
                 The agent detects the commit, re-runs the checks and retries.\n",
                now = Utc::now().to_rfc3339(),
            ),
            FixContext::MergeConflict { branch, files } => {
                let file_list = if files.is_empty() {
                    "- (see `git status`)".to_string()
                } else {
                    files
                        .iter()
                        .map(|f| format!("- {f}"))
                        .collect::<Vec<_>>()
                        .join("\n")
                };
                format!(
                    "# Fix required: merge conflict on {task_id}\n\n\
                     - Branch: `{branch}`\n\
                     - Detected: {now}\n\n\
                     ## Conflicted files\n\n{file_list}\n\n\
                     ## What to do\n\n\
                     1. Resolve the conflict markers (`<<<<<<<`, `=======`, `>>>>>>>`) in each file\n\
                     2. Stage the resolutions: `git add .`\n\
                     3. Continue the rebase: `git rebase --continue`\n\n\
                     The agent detects the resulting commit and retries the merge.\n",
                    now = Utc::now().to_rfc3339(),
                )
            }
        };
        std::fs::write(self.fix_brief_path(), brief)?;
        debug!(path = %self.fix_brief_path().display(), "fix brief written");

        std::fs::create_dir_all(self.context_dir())?;
        let (payload, kind) = match context {
            FixContext::TestFailure {
                check,
                output,
                branch,
            } => (
                serde_json::json!({
                    "task_id": task_id,
                    "error_kind": context.kind(),
                    "check": check,
                    "output": output,
                    "branch": branch,
                    "created_at": Utc::now(),
                }),
                context.kind(),
            ),
            FixContext::MergeConflict { branch, files } => (
                serde_json::json!({
                    "task_id": task_id,
                    "error_kind": context.kind(),
                    "branch": branch,
                    "conflicted_files": files,
                    "created_at": Utc::now(),
                }),
                context.kind(),
            ),
        };
        let context_path = self
            .context_dir()
            .join(format!("fix-{task_id}-{kind}.json"));
        std::fs::write(&context_path, serde_json::to_string_pretty(&payload)?)?;
        Ok(())
    }

    /// Remove the fix brief and its context files.
    pub fn clear_fix(&self, task_id: &str) -> Result<(), AgentError> {
        remove_if_exists(&self.fix_brief_path())?;
        for kind in ["test_failure", "merge_conflict"] {
            remove_if_exists(&self.context_dir().join(format!("fix-{task_id}-{kind}.json")))?;
        }
        Ok(())
    }
}

fn remove_if_exists(path: &Path) -> std::io::Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}
