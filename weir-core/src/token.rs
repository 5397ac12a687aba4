//! Cooperative cancellation token.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Lightweight cooperative cancellation token.
///
/// The token is a clonable handle over one process-scoped flag: the
/// orchestrator (or the signal relay) requests stop, every blocking
/// primitive and stage loop observes it. A stop request never retracts.
///
/// Stopping is a request, not a forced termination: a worker inside a
/// stage call finishes that call and observes the token on its next loop
/// iteration. Requesting stop is distinct from closing a queue — stop
/// means "unwind everything", closure means "no more items arrive here".
#[derive(Clone, Debug, Default)]
pub struct StopToken {
    flag: Arc<AtomicBool>,
}

impl StopToken {
    /// Create a fresh token with stop not requested.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request stop. Idempotent; relaxed ordering is sufficient because
    /// observers only ever poll the flag.
    pub fn request_stop(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    /// Returns true once stop has been requested.
    pub fn stop_requested(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_unset() {
        let token = StopToken::new();
        assert!(!token.stop_requested());
    }

    #[test]
    fn request_is_idempotent_and_sticky() {
        let token = StopToken::new();
        token.request_stop();
        token.request_stop();
        assert!(token.stop_requested());
    }

    #[test]
    fn clones_share_the_flag() {
        let token = StopToken::new();
        let observer = token.clone();
        token.request_stop();
        assert!(observer.stop_requested());
    }
}
