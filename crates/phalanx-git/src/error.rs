//! Error types for phalanx-git

use thiserror::Error;

/// Git / subprocess layer error
#[derive(Debug, Error)]
pub enum GitError {
    /// The subprocess could not be spawned at all.
    #[error("failed to spawn `{command}`: {source}")]
    Spawn {
        /// The command line that failed to start
        command: String,
        /// Underlying I/O error
        source: std::io::Error,
    },

    /// A command that must succeed exited nonzero.
    #[error("`{command}` failed: {stderr}")]
    CommandFailed {
        /// The command line
        command: String,
        /// Captured stderr (trimmed)
        stderr: String,
    },

    /// A branch or remote name failed validation.
    #[error("invalid ref name: {0}")]
    InvalidRefName(String),

    /// An empty command line was configured.
    #[error("empty command for check `{0}`")]
    EmptyCommand(String),

    /// The hosting-provider CLI is unusable.
    #[error("gh CLI unavailable: {0}")]
    GhUnavailable(String),
}
