//! The scenario-level event log and run summary (spec §3's "Event log"
//! section and `Execution` entity).

use std::collections::HashMap;
use std::time::{Duration, SystemTime};

use super::{Phase, StepResult};

/// The fixed set of event types a runtime appends to its log (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    StepStarted,
    StepCompleted,
    StepFailed,
    StepRetried,
    StepSkipped,
    ScenarioStarted,
    ScenarioCompleted,
    ScenarioFailed,
    ResourceAllocated,
    ResourceReleased,
    PhaseStarted,
    PhaseCompleted,
}

/// A single append-only log entry.
#[derive(Debug, Clone)]
pub struct Event {
    pub timestamp: SystemTime,
    pub kind: EventKind,
    pub step_id: Option<String>,
    pub phase: Option<Phase>,
    pub message: String,
    pub error: Option<String>,
    pub duration: Option<Duration>,
}

/// Summary of a scenario run (spec §3).
#[derive(Debug, Clone)]
pub struct Execution {
    pub scenario_id: String,
    pub start_time: SystemTime,
    pub end_time: SystemTime,
    pub success: bool,
    pub steps_executed: usize,
    pub steps_failed: usize,
    pub steps_skipped: usize,
    pub events: Vec<Event>,
    pub step_results: HashMap<String, StepResult>,
    /// `seed=<n> scenario=<id> step=<id>` — carried over from the
    /// teacher's `print_failure_info` reproduction-hint habit (see
    /// SPEC_FULL.md §3.1); `None` when the run succeeded.
    pub reproduction_hint: Option<String>,
}
