//! Hosting-provider CLI integration (gh)
//!
//! PR creation (agent side) and PR squash-merge (merge worker side). The
//! availability probe returns a structured reason so precondition failures
//! surface as task failures instead of mid-flight surprises.

use crate::error::GitError;
use crate::process::run;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

/// Wrapper around the `gh` CLI rooted at a working tree.
#[derive(Debug, Clone)]
pub struct GhCli {
    root: PathBuf,
    timeout: Duration,
}

impl GhCli {
    /// Create a wrapper for a working tree.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            timeout: Duration::from_secs(120),
        }
    }

    /// Override the per-command timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Check that `gh` is installed and authenticated. Returns a structured
    /// reason on failure.
    pub async fn check_available(&self) -> Result<(), GitError> {
        let which = run("gh", &["--version"], &self.root, Some(self.timeout)).await;
        match which {
            Ok(outcome) if outcome.success() => {}
            _ => {
                return Err(GitError::GhUnavailable(
                    "gh CLI not installed (https://cli.github.com)".to_string(),
                ))
            }
        }

        let auth = run("gh", &["auth", "status"], &self.root, Some(self.timeout)).await?;
        if !auth.success() {
            return Err(GitError::GhUnavailable(
                "gh CLI not authenticated (run: gh auth login)".to_string(),
            ));
        }
        Ok(())
    }

    /// Create a pull request; returns its URL.
    pub async fn create_pr(
        &self,
        title: &str,
        body: &str,
        base: &str,
        head: &str,
    ) -> Result<String, GitError> {
        let outcome = run(
            "gh",
            &[
                "pr", "create", "--title", title, "--body", body, "--base", base, "--head", head,
            ],
            &self.root,
            Some(self.timeout),
        )
        .await?;

        if outcome.success() {
            Ok(outcome.stdout.trim().to_string())
        } else {
            Err(GitError::CommandFailed {
                command: "gh pr create".to_string(),
                stderr: outcome.combined_output().trim().to_string(),
            })
        }
    }

    /// Squash-merge a pull request by handle (URL or number), deleting the
    /// source branch on the provider side.
    pub async fn merge_pr(&self, pr_handle: &str) -> Result<(), GitError> {
        let pr_number = Self::pr_number(pr_handle);
        debug!(pr = %pr_number, "merging pull request via gh");

        let outcome = run(
            "gh",
            &["pr", "merge", &pr_number, "--squash", "--delete-branch"],
            &self.root,
            Some(self.timeout),
        )
        .await?;

        if outcome.success() {
            Ok(())
        } else {
            warn!(pr = %pr_number, stderr = %outcome.stderr.trim(), "gh pr merge failed");
            Err(GitError::CommandFailed {
                command: format!("gh pr merge {pr_number}"),
                stderr: outcome.combined_output().trim().to_string(),
            })
        }
    }

    /// Extract the PR number from a handle (last URL segment), passing bare
    /// numbers through.
    fn pr_number(pr_handle: &str) -> String {
        pr_handle
            .rsplit('/')
            .next()
            .unwrap_or(pr_handle)
            .to_string()
    }

    /// The working tree root.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pr_number_from_url() {
        assert_eq!(
            GhCli::pr_number("https://github.com/acme/repo/pull/42"),
            "42"
        );
        assert_eq!(GhCli::pr_number("17"), "17");
    }
}
