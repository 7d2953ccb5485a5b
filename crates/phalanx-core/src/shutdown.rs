//! Graceful shutdown coordination
//!
//! Hands cancellation tokens to long-lived components (merge worker, reaper,
//! HTTP server) so one signal stops everything.

use tokio_util::sync::CancellationToken;

/// Shutdown controller for coordinating graceful shutdown.
#[derive(Debug, Clone, Default)]
pub struct ShutdownController {
    root: CancellationToken,
}

impl ShutdownController {
    /// Create a controller.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A child token to hand to a component; cancelled when shutdown begins.
    #[must_use]
    pub fn token(&self) -> CancellationToken {
        self.root.child_token()
    }

    /// Begin shutdown: cancel every issued token.
    pub fn shutdown(&self) {
        self.root.cancel();
    }

    /// Whether shutdown has begun.
    #[must_use]
    pub fn is_shutting_down(&self) -> bool {
        self.root.is_cancelled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_tokens_cancel_together() {
        let controller = ShutdownController::new();
        let a = controller.token();
        let b = controller.token();
        assert!(!controller.is_shutting_down());

        controller.shutdown();
        assert!(controller.is_shutting_down());
        a.cancelled().await;
        b.cancelled().await;
    }
}
