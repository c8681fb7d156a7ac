//! Scenarios, steps and their results (spec §3's `Scenario`/`Step` entities).

use std::sync::Arc;
use std::time::Duration;

use super::{Phase, Runtime};

/// A step-level failure. Carries a plain message rather than a boxed
/// `dyn Error` so [`StepResult`] stays `Clone` for history snapshots;
/// engine errors convert in via `From<crate::Error>`.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{0}")]
pub struct StepError(String);

impl StepError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

impl From<crate::Error> for StepError {
    fn from(err: crate::Error) -> Self {
        Self(err.to_string())
    }
}

impl From<std::io::Error> for StepError {
    fn from(err: std::io::Error) -> Self {
        Self(err.to_string())
    }
}

pub type StepFn = Arc<dyn Fn(&Arc<Runtime>) -> std::result::Result<(), StepError> + Send + Sync>;
pub type ValidationFn = StepFn;
pub type StepCallback = Arc<dyn Fn(&Arc<Runtime>, &StepResult) + Send + Sync>;

/// The disposition of a single step attempt, recorded once per step per
/// scenario run (spec §5: "step results are written exactly once per step").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepStatus {
    Succeeded,
    Failed,
    Skipped,
    TimedOut,
}

/// What happened when a step ran (or was skipped).
#[derive(Debug, Clone)]
pub struct StepResult {
    pub step_id: String,
    pub status: StepStatus,
    pub attempts: u32,
    pub error: Option<String>,
    pub duration: Duration,
}

/// A single unit of work within a scenario's phase.
#[derive(Clone)]
pub struct Step {
    pub id: String,
    pub name: String,
    pub phase: Phase,
    pub function: StepFn,
    pub validation: Option<ValidationFn>,
    pub timeout: Option<Duration>,
    pub retryable: bool,
    pub max_retries: u32,
    pub prerequisites: Vec<String>,
    pub on_success: Option<StepCallback>,
    pub on_failure: Option<StepCallback>,
    pub on_timeout: Option<StepCallback>,
}

impl Step {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        phase: Phase,
        function: impl Fn(&Arc<Runtime>) -> std::result::Result<(), StepError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            phase,
            function: Arc::new(function),
            validation: None,
            timeout: None,
            retryable: false,
            max_retries: 0,
            prerequisites: Vec::new(),
            on_success: None,
            on_failure: None,
            on_timeout: None,
        }
    }

    pub fn with_validation(
        mut self,
        validation: impl Fn(&Arc<Runtime>) -> std::result::Result<(), StepError> + Send + Sync + 'static,
    ) -> Self {
        self.validation = Some(Arc::new(validation));
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_retries(mut self, max_retries: u32) -> Self {
        self.retryable = true;
        self.max_retries = max_retries;
        self
    }

    pub fn with_prerequisite(mut self, step_id: impl Into<String>) -> Self {
        self.prerequisites.push(step_id.into());
        self
    }

    pub fn with_on_success(
        mut self,
        callback: impl Fn(&Arc<Runtime>, &StepResult) + Send + Sync + 'static,
    ) -> Self {
        self.on_success = Some(Arc::new(callback));
        self
    }

    pub fn with_on_failure(
        mut self,
        callback: impl Fn(&Arc<Runtime>, &StepResult) + Send + Sync + 'static,
    ) -> Self {
        self.on_failure = Some(Arc::new(callback));
        self
    }

    pub fn with_on_timeout(
        mut self,
        callback: impl Fn(&Arc<Runtime>, &StepResult) + Send + Sync + 'static,
    ) -> Self {
        self.on_timeout = Some(Arc::new(callback));
        self
    }
}

/// A declarative, phased test plan (spec §3, glossary).
pub struct Scenario {
    pub id: String,
    pub name: String,
    pub description: String,
    pub tags: Vec<String>,
    pub timeout: Duration,
    pub steps: Vec<Step>,
    pub parallel_groups: std::collections::HashMap<Phase, Vec<String>>,
    /// Other scenario ids this one is conceptually related to. Spec §3
    /// names this field but defines no cross-scenario ordering behavior
    /// for it (only step prerequisites are enforced) — kept as metadata a
    /// test author can read back, per SPEC_FULL.md §4's open-question
    /// resolution for the sibling step-prerequisite invariant.
    pub dependencies: Vec<String>,
    pub fail_fast: bool,
}

impl Scenario {
    pub fn new(id: impl Into<String>, name: impl Into<String>, timeout: Duration) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: String::new(),
            tags: Vec::new(),
            timeout,
            steps: Vec::new(),
            parallel_groups: std::collections::HashMap::new(),
            dependencies: Vec::new(),
            fail_fast: false,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    pub fn with_step(mut self, step: Step) -> Self {
        self.steps.push(step);
        self
    }

    /// Mark `step_ids` as the parallel group for `phase`: within that
    /// phase, every other step runs sequentially first, then these run
    /// concurrently under a barrier (spec §4.G).
    pub fn with_parallel_group(mut self, phase: Phase, step_ids: impl IntoIterator<Item = String>) -> Self {
        self.parallel_groups.insert(phase, step_ids.into_iter().collect());
        self
    }

    pub fn with_fail_fast(mut self, fail_fast: bool) -> Self {
        self.fail_fast = fail_fast;
        self
    }
}
