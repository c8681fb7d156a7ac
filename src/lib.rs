//! faultkit: a deterministic fault-injection and scenario-orchestration
//! toolkit for testing backup/archiving tools.
//!
//! Six engines compose into a [`orchestrator::ScenarioOrchestrator`]: an
//! [`injector::ErrorInjector`] for probabilistic, pattern-matched error
//! injection; a [`diskspace::VirtualDisk`] simulating bounded free space; a
//! [`permission::PermissionSandbox`] for restorable permission
//! manipulation; an [`corruptor::ArchiveCorruptor`] for byte-level ZIP
//! corruption; a [`context::ContextController`] and
//! [`context::CancellationManager`] for cooperative cancellation; and the
//! orchestrator itself, which wires the others into phased, reproducible
//! scenario runs.
//!
//! Every engine is a constructed object — there is no global mutable
//! state — and every decision that would otherwise be random is derived
//! from a caller-supplied seed through [`rng::DeterministicStream`], so the
//! same seed and the same scenario reproduce byte-identical results.

pub mod context;
pub mod corruptor;
pub mod diskspace;
mod error;
pub mod facades;
pub mod injector;
pub mod orchestrator;
pub mod permission;
pub mod rng;

pub use error::{Error, Result};
