//! Error types for phalanx-agent

use phalanx_core::error::StoreError;
use phalanx_git::GitError;
use thiserror::Error;

/// Agent runtime error
#[derive(Debug, Error)]
pub enum AgentError {
    /// HTTP transport failure talking to the coordinator.
    #[error("coordinator request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The coordinator rejected the request.
    #[error("coordinator returned {status}: {message}")]
    Api {
        /// HTTP status code
        status: u16,
        /// Error body message
        message: String,
    },

    /// Git operation failed.
    #[error(transparent)]
    Git(#[from] GitError),

    /// State store failure (notification subscription).
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Payload could not be decoded.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Workspace file I/O failed.
    #[error("workspace io error: {0}")]
    Io(#[from] std::io::Error),

    /// An environment precondition does not hold (missing remote,
    /// unauthenticated PR CLI). The task completes with failure and this
    /// structured reason.
    #[error("precondition failed: {0}")]
    Precondition(String),
}
