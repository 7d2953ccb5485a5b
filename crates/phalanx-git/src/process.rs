//! Subprocess execution with typed outcomes
//!
//! Subprocess results are values, not exceptions: callers dispatch on
//! `{exit_code, stdout, stderr, timed_out}` instead of catching errors.
//! A timeout counts as a failed outcome, not a separate error path.

use crate::error::GitError;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

/// Outcome of one subprocess run.
#[derive(Debug, Clone)]
pub struct CommandOutcome {
    /// Exit code, when the process exited normally
    pub exit_code: Option<i32>,
    /// Captured stdout
    pub stdout: String,
    /// Captured stderr
    pub stderr: String,
    /// Whether the run was killed by the timeout
    pub timed_out: bool,
}

impl CommandOutcome {
    /// Whether the process exited zero within the timeout.
    #[must_use]
    pub fn success(&self) -> bool {
        !self.timed_out && self.exit_code == Some(0)
    }

    /// Stdout and stderr concatenated (for notifications and briefs).
    #[must_use]
    pub fn combined_output(&self) -> String {
        let mut out = self.stdout.clone();
        if !self.stderr.is_empty() {
            if !out.is_empty() && !out.ends_with('\n') {
                out.push('\n');
            }
            out.push_str(&self.stderr);
        }
        out
    }

    fn timed_out_marker() -> Self {
        Self {
            exit_code: None,
            stdout: String::new(),
            stderr: "timed out".to_string(),
            timed_out: true,
        }
    }
}

/// Run `program args...` in `cwd`, capturing output, with an optional
/// wall-clock timeout. The child is killed when the timeout fires.
pub async fn run(
    program: &str,
    args: &[&str],
    cwd: &Path,
    timeout: Option<Duration>,
) -> Result<CommandOutcome, GitError> {
    let command_line = format!("{program} {}", args.join(" "));
    debug!(command = %command_line, cwd = %cwd.display(), "running subprocess");

    let mut cmd = Command::new(program);
    cmd.args(args)
        .current_dir(cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let output_future = cmd.output();
    let output = match timeout {
        Some(limit) => match tokio::time::timeout(limit, output_future).await {
            Ok(result) => result,
            Err(_) => {
                debug!(command = %command_line, "subprocess timed out");
                return Ok(CommandOutcome::timed_out_marker());
            }
        },
        None => output_future.await,
    }
    .map_err(|e| GitError::Spawn {
        command: command_line,
        source: e,
    })?;

    Ok(CommandOutcome {
        exit_code: output.status.code(),
        stdout: String::from_utf8_lossy(&output.stdout).to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        timed_out: false,
    })
}
