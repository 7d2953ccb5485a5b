//! Quality check execution
//!
//! Runs the configured checks in order. Required checks gate progression;
//! advisory checks are logged. A timeout counts as a required-check failure.

use crate::error::GitError;
use crate::process::run;
use phalanx_core::config::QualityCheck;
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};

/// Result of one quality check.
#[derive(Debug, Clone)]
pub struct CheckOutcome {
    /// Check name from config
    pub name: String,
    /// Whether the check gates progression
    pub required: bool,
    /// Whether the check exited zero within its timeout
    pub passed: bool,
    /// Combined captured output
    pub output: String,
    /// Whether the check was killed by the timeout
    pub timed_out: bool,
}

/// Results of a full check run.
#[derive(Debug, Clone, Default)]
pub struct CheckReport {
    /// Per-check outcomes, in execution order
    pub outcomes: Vec<CheckOutcome>,
}

impl CheckReport {
    /// Whether all required checks passed.
    #[must_use]
    pub fn passed(&self) -> bool {
        self.outcomes
            .iter()
            .filter(|o| o.required)
            .all(|o| o.passed)
    }

    /// The first failing required check, if any.
    #[must_use]
    pub fn first_required_failure(&self) -> Option<&CheckOutcome> {
        self.outcomes.iter().find(|o| o.required && !o.passed)
    }
}

/// Run every check in `cwd`. Execution stops at the first failing required
/// check (its output is what the owning agent needs); advisory failures are
/// logged and do not stop the run.
pub async fn run_checks(
    checks: &[QualityCheck],
    cwd: &Path,
    timeout: Duration,
) -> Result<CheckReport, GitError> {
    let mut report = CheckReport::default();

    for check in checks {
        let argv = check.argv();
        let Some((program, args)) = argv.split_first() else {
            return Err(GitError::EmptyCommand(check.name.clone()));
        };
        let args: Vec<&str> = args.iter().map(String::as_str).collect();

        info!(check = %check.name, command = %check.command, "running quality check");
        let outcome = run(program, &args, cwd, Some(timeout)).await?;
        let passed = outcome.success();

        if passed {
            info!(check = %check.name, "quality check passed");
        } else if check.required {
            warn!(check = %check.name, timed_out = outcome.timed_out, "required quality check failed");
        } else {
            warn!(check = %check.name, "advisory quality check failed");
        }

        let failed_required = check.required && !passed;
        report.outcomes.push(CheckOutcome {
            name: check.name.clone(),
            required: check.required,
            passed,
            output: outcome.combined_output(),
            timed_out: outcome.timed_out,
        });
        if failed_required {
            break;
        }
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn cwd() -> PathBuf {
        std::env::temp_dir()
    }

    #[tokio::test]
    async fn test_all_required_pass() {
        let checks = vec![
            QualityCheck::new("first", "true", true),
            QualityCheck::new("second", "true", true),
        ];
        let report = run_checks(&checks, &cwd(), Duration::from_secs(5))
            .await
            .unwrap();
        assert!(report.passed());
        assert_eq!(report.outcomes.len(), 2);
    }

    #[tokio::test]
    async fn test_required_failure_stops_run() {
        let checks = vec![
            QualityCheck::new("failing", "false", true),
            QualityCheck::new("never-runs", "true", true),
        ];
        let report = run_checks(&checks, &cwd(), Duration::from_secs(5))
            .await
            .unwrap();
        assert!(!report.passed());
        assert_eq!(report.outcomes.len(), 1);
        assert_eq!(report.first_required_failure().unwrap().name, "failing");
    }

    #[tokio::test]
    async fn test_advisory_failure_does_not_gate() {
        let checks = vec![
            QualityCheck::new("advisory", "false", false),
            QualityCheck::new("required", "true", true),
        ];
        let report = run_checks(&checks, &cwd(), Duration::from_secs(5))
            .await
            .unwrap();
        assert!(report.passed());
        assert_eq!(report.outcomes.len(), 2);
        assert!(!report.outcomes[0].passed);
    }

    #[tokio::test]
    async fn test_timeout_counts_as_required_failure() {
        let checks = vec![QualityCheck::new("slow", "sleep 5", true)];
        let report = run_checks(&checks, &cwd(), Duration::from_millis(50))
            .await
            .unwrap();
        assert!(!report.passed());
        assert!(report.outcomes[0].timed_out);
    }

    #[tokio::test]
    async fn test_empty_command_rejected() {
        let checks = vec![QualityCheck::new("empty", "", true)];
        let err = run_checks(&checks, &cwd(), Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, GitError::EmptyCommand(_)));
    }
}
