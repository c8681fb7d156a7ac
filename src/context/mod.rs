//! Context Controller & Cancellation Manager (spec §4.F): timed/delayed
//! cancellation, a concurrent-operation harness, and a propagation-chain
//! verifier, all built on a cooperative ambient cancellation token.

mod cancellation;
mod controller;

pub use cancellation::{
    CancellationManager, CancellationPoint, ConcurrentTestConfig, ConcurrentTestReport,
    OperationOutcome, OperationRecord, PropagationConfig, PropagationRecord,
};
pub use controller::{ContextController, ContextEvent, ContextState};

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum ContextError {
    #[error("context {token_id} was cancelled")]
    Cancelled { token_id: Uuid },
    #[error("context propagation was not observed within the verification ceiling")]
    VerificationTimedOut,
    #[error("operation returned successfully instead of propagating cancellation")]
    PropagationNotObserved,
    #[error("operation returned an error unrelated to the ambient cancellation: {0}")]
    UnrelatedError(String),
}

/// An ambient, cooperative cancellation token (spec §4.F, §5). Cloning
/// shares the same underlying flag and identity; every clone observes the
/// same cancellation.
#[derive(Debug, Clone)]
pub struct CancellationToken {
    id: Uuid,
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// The cancellation error carrying this token's identity, for
    /// operations that need to return or wrap it.
    pub fn error(&self) -> ContextError {
        ContextError::Cancelled { token_id: self.id }
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_cancellation_state() {
        let token = CancellationToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());
        token.cancel();
        assert!(clone.is_cancelled());
    }

    #[test]
    fn error_carries_token_identity() {
        let token = CancellationToken::new();
        match token.error() {
            ContextError::Cancelled { token_id } => assert_eq!(token_id, token.id()),
            other => panic!("unexpected error variant: {other:?}"),
        }
    }
}
