//! Cross-engine error taxonomy (spec §7).
//!
//! Each engine owns its own error enum; `Error` is the top-level enum the
//! orchestrator uses to report failures that cross engine boundaries. Engine
//! code never depends on this type directly, mirroring the per-module
//! `Result` alias style used throughout the teacher and the rest of the
//! pack.

use crate::context::ContextError;
use crate::corruptor::CorruptionError;
use crate::diskspace::DiskSpaceError;
use crate::injector::{InjectedError, InjectorError};
use crate::orchestrator::OrchestratorError;
use crate::permission::PermissionError;

/// A top-level error wrapping every engine's own error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Injector(#[from] InjectorError),
    #[error(transparent)]
    Injected(#[from] InjectedError),
    #[error(transparent)]
    DiskSpace(#[from] DiskSpaceError),
    #[error(transparent)]
    Permission(#[from] PermissionError),
    #[error(transparent)]
    Corruption(#[from] CorruptionError),
    #[error(transparent)]
    Context(#[from] ContextError),
    #[error(transparent)]
    Orchestrator(#[from] OrchestratorError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
