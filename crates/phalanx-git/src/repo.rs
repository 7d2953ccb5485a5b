//! Typed git repository operations
//!
//! Thin wrappers over the git CLI used by the merge worker and the agent
//! runtime. Ref names are validated before reaching the command line.

use crate::error::GitError;
use crate::process::{run, CommandOutcome};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

/// Validate a branch or remote name (prevents flag and command injection).
#[must_use]
pub fn is_valid_ref_name(name: &str) -> bool {
    if name.is_empty() || name.len() > 255 {
        return false;
    }
    // Must not start with - (could be interpreted as a flag)
    if name.starts_with('-') {
        return false;
    }
    let dangerous = ['`', '$', '|', ';', '&', '>', '<', '\n', '\r', '\0', ' '];
    if name.chars().any(|c| dangerous.contains(&c)) {
        return false;
    }
    if name.contains("..") {
        return false;
    }
    true
}

fn validate_ref(name: &str) -> Result<(), GitError> {
    if is_valid_ref_name(name) {
        Ok(())
    } else {
        Err(GitError::InvalidRefName(name.to_string()))
    }
}

/// Result of a dry-run merge probe.
#[derive(Debug, Clone)]
pub struct ConflictProbe {
    /// Whether the probe reported a textual conflict
    pub conflict: bool,
    /// Conflicted files at probe time
    pub files: Vec<String>,
    /// Combined probe output (for diagnostics)
    pub output: String,
}

/// A git working tree rooted at a fixed path.
///
/// The coordinator host's working tree is shared by the merge worker only;
/// agents operate on their own workspaces.
#[derive(Debug, Clone)]
pub struct GitRepo {
    root: PathBuf,
    step_timeout: Duration,
}

impl GitRepo {
    /// Open a working tree.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            step_timeout: Duration::from_secs(1800),
        }
    }

    /// Override the per-operation timeout.
    #[must_use]
    pub fn with_step_timeout(mut self, timeout: Duration) -> Self {
        self.step_timeout = timeout;
        self
    }

    /// The working tree root.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    async fn git(&self, args: &[&str]) -> Result<CommandOutcome, GitError> {
        run("git", args, &self.root, Some(self.step_timeout)).await
    }

    /// Run git and require a zero exit.
    async fn git_ok(&self, args: &[&str]) -> Result<CommandOutcome, GitError> {
        let outcome = self.git(args).await?;
        if outcome.success() {
            Ok(outcome)
        } else {
            Err(GitError::CommandFailed {
                command: format!("git {}", args.join(" ")),
                stderr: outcome.combined_output().trim().to_string(),
            })
        }
    }

    /// Name of the checked-out branch.
    pub async fn current_branch(&self) -> Result<String, GitError> {
        let outcome = self.git_ok(&["branch", "--show-current"]).await?;
        Ok(outcome.stdout.trim().to_string())
    }

    /// Commit hash of HEAD.
    pub async fn head(&self) -> Result<String, GitError> {
        let outcome = self.git_ok(&["rev-parse", "HEAD"]).await?;
        Ok(outcome.stdout.trim().to_string())
    }

    /// Subject line of the HEAD commit.
    pub async fn head_message(&self) -> Result<String, GitError> {
        let outcome = self.git_ok(&["log", "-1", "--pretty=%s"]).await?;
        Ok(outcome.stdout.trim().to_string())
    }

    /// Whether the working tree has uncommitted changes.
    pub async fn has_uncommitted_changes(&self) -> Result<bool, GitError> {
        let outcome = self.git_ok(&["status", "--porcelain"]).await?;
        Ok(!outcome.stdout.trim().is_empty())
    }

    /// Stash everything, including untracked files.
    pub async fn stash_push(&self, message: &str) -> Result<(), GitError> {
        self.git_ok(&["stash", "push", "--include-untracked", "-m", message])
            .await?;
        Ok(())
    }

    /// Check out an existing ref.
    pub async fn checkout(&self, name: &str) -> Result<(), GitError> {
        validate_ref(name)?;
        self.git_ok(&["checkout", name]).await?;
        Ok(())
    }

    /// Switch to the mainline branch, stashing uncommitted changes first if
    /// necessary. A no-op when already on it.
    pub async fn checkout_mainline(&self, main_branch: &str) -> Result<(), GitError> {
        validate_ref(main_branch)?;
        if self.current_branch().await? == main_branch {
            return Ok(());
        }
        if self.has_uncommitted_changes().await? {
            warn!("uncommitted changes in working tree, stashing before checkout");
            self.stash_push("auto-stash before mainline checkout").await?;
        }
        self.git_ok(&["checkout", main_branch]).await?;
        Ok(())
    }

    /// Pull the current branch. Tolerant: a missing or unreachable remote is
    /// reported in the outcome, not as an error.
    pub async fn pull(&self) -> Result<CommandOutcome, GitError> {
        self.git(&["pull", "--rebase"]).await
    }

    /// Whether a local branch exists.
    pub async fn branch_exists(&self, name: &str) -> Result<bool, GitError> {
        validate_ref(name)?;
        let outcome = self.git(&["rev-parse", "--verify", "--quiet", name]).await?;
        Ok(outcome.success())
    }

    /// Create and check out a branch, or just check it out when it already
    /// exists (a re-claimed task reuses its branch).
    pub async fn create_branch(&self, name: &str) -> Result<(), GitError> {
        validate_ref(name)?;
        if self.branch_exists(name).await? {
            debug!(branch = %name, "branch exists, checking out");
            self.git_ok(&["checkout", name]).await?;
        } else {
            self.git_ok(&["checkout", "-b", name]).await?;
        }
        Ok(())
    }

    /// Delete a local branch. Idempotent: a missing branch is not an error.
    pub async fn delete_branch(&self, name: &str) -> Result<(), GitError> {
        validate_ref(name)?;
        let outcome = self.git(&["branch", "-D", name]).await?;
        if !outcome.success() {
            debug!(branch = %name, stderr = %outcome.stderr.trim(), "local branch delete skipped");
        }
        Ok(())
    }

    /// Dry-run merge of `branch` into the current branch: merge without
    /// committing, record conflicts, then abort (ignoring "no merge to
    /// abort").
    pub async fn merge_probe(&self, branch: &str) -> Result<ConflictProbe, GitError> {
        validate_ref(branch)?;
        let outcome = self.git(&["merge", "--no-commit", "--no-ff", branch]).await?;
        let output = outcome.combined_output();
        let conflict = !outcome.success() && output.contains("CONFLICT");

        let files = if conflict {
            self.conflicted_files().await?
        } else {
            Vec::new()
        };

        let abort = self.git(&["merge", "--abort"]).await?;
        if !abort.success() {
            debug!("no merge to abort after probe");
        }

        Ok(ConflictProbe {
            conflict,
            files,
            output,
        })
    }

    /// Files currently in the unmerged state.
    pub async fn conflicted_files(&self) -> Result<Vec<String>, GitError> {
        let outcome = self
            .git_ok(&["diff", "--name-only", "--diff-filter=U"])
            .await?;
        Ok(outcome
            .stdout
            .lines()
            .filter(|line| !line.is_empty())
            .map(String::from)
            .collect())
    }

    /// Squash-merge `branch` into the current branch with a deterministic
    /// commit message.
    pub async fn squash_merge(&self, branch: &str) -> Result<(), GitError> {
        validate_ref(branch)?;
        self.git_ok(&["merge", "--squash", branch]).await?;
        let message = format!("Merge {branch}");
        self.git_ok(&["commit", "-m", &message]).await?;
        Ok(())
    }

    /// Push a branch to origin.
    pub async fn push(&self, branch: &str, set_upstream: bool) -> Result<(), GitError> {
        validate_ref(branch)?;
        if set_upstream {
            self.git_ok(&["push", "-u", "origin", branch]).await?;
        } else {
            self.git_ok(&["push", "origin", branch]).await?;
        }
        Ok(())
    }

    /// Push the current branch with `--force-with-lease` (after a rebase).
    pub async fn push_force_with_lease(&self) -> Result<(), GitError> {
        self.git_ok(&["push", "--force-with-lease"]).await?;
        Ok(())
    }

    /// Delete a remote branch. Best-effort: the provider may have deleted it
    /// already when merging the PR.
    pub async fn push_delete(&self, branch: &str) -> Result<(), GitError> {
        validate_ref(branch)?;
        let outcome = self.git(&["push", "origin", "--delete", branch]).await?;
        if !outcome.success() {
            debug!(branch = %branch, "remote branch delete skipped");
        }
        Ok(())
    }

    /// URL of a named remote, when configured.
    pub async fn remote_url(&self, name: &str) -> Result<Option<String>, GitError> {
        validate_ref(name)?;
        let outcome = self.git(&["remote", "get-url", name]).await?;
        if outcome.success() {
            Ok(Some(outcome.stdout.trim().to_string()))
        } else {
            Ok(None)
        }
    }

    /// Rebase the current branch onto the mainline. With a remote, pulls
    /// the remote mainline with `--rebase`; locally, rebases onto the local
    /// mainline branch. Conflicts are reported in the outcome.
    pub async fn rebase_onto_mainline(
        &self,
        main_branch: &str,
        use_remote: bool,
    ) -> Result<CommandOutcome, GitError> {
        validate_ref(main_branch)?;
        if use_remote {
            self.git(&["pull", "origin", main_branch, "--rebase"]).await
        } else {
            self.git(&["rebase", main_branch]).await
        }
    }

    /// Abort an in-progress rebase, ignoring "no rebase in progress".
    pub async fn rebase_abort(&self) -> Result<(), GitError> {
        let outcome = self.git(&["rebase", "--abort"]).await?;
        if !outcome.success() {
            debug!("no rebase to abort");
        }
        Ok(())
    }
}
