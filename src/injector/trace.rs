//! Propagation traces: an append-only timeline for a single injected error
//! as it travels through operation wrappers (spec §3).

use std::time::SystemTime;
use uuid::Uuid;

use super::point::ErrorKind;

/// What happened to an error at a given hop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropagationAction {
    Caught,
    Wrapped,
    Returned,
    Handled,
}

/// A single hop in a [`PropagationTrace`].
#[derive(Debug, Clone)]
pub struct TraceEntry {
    pub timestamp: SystemTime,
    pub operation: String,
    pub component: String,
    pub action: PropagationAction,
    pub error_kind: ErrorKind,
    pub message: String,
    pub stack_depth: usize,
}

/// An append-only timeline for a single injected error.
#[derive(Debug, Clone)]
pub struct PropagationTrace {
    pub error_id: Uuid,
    pub original_error: String,
    pub entries: Vec<TraceEntry>,
    pub start_time: SystemTime,
    pub end_time: Option<SystemTime>,
}

impl PropagationTrace {
    pub(crate) fn open(error_id: Uuid, original_error: String) -> Self {
        Self {
            error_id,
            original_error,
            entries: Vec::new(),
            start_time: SystemTime::now(),
            end_time: None,
        }
    }

    pub(crate) fn push(
        &mut self,
        operation: String,
        component: String,
        action: PropagationAction,
        error_kind: ErrorKind,
        message: String,
    ) {
        let stack_depth = self.entries.len();
        self.entries.push(TraceEntry {
            timestamp: SystemTime::now(),
            operation,
            component,
            action,
            error_kind,
            message,
            stack_depth,
        });
        if matches!(action, PropagationAction::Handled) {
            self.end_time = Some(SystemTime::now());
        }
    }
}

/// A single recorded recovery attempt against a tracked error.
#[derive(Debug, Clone)]
pub struct RecoveryAttempt {
    pub error_id: Uuid,
    pub recovery_kind: String,
    pub attempt_n: u32,
    pub success: bool,
    pub duration: std::time::Duration,
    pub recorded_at: SystemTime,
}
