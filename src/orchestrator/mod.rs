//! Scenario Orchestrator (spec §4.G): a phased, dependency-aware executor
//! that composes the error injector, disk-space simulator, permission
//! simulator and context controller into reproducible test runs.

mod execution;
mod runtime;
mod scenario;
mod timing;

pub use execution::{Event, EventKind, Execution};
pub use runtime::{Runtime, SharedData};
pub use scenario::{
    Scenario, Step, StepCallback, StepError, StepFn, StepResult, StepStatus, ValidationFn,
};
pub use timing::TimingCoordinator;

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// The four fixed phases a scenario runs through, in order (spec §3, §4.G).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Phase {
    Setup,
    Execution,
    Verification,
    Cleanup,
}

impl Phase {
    pub const ORDER: [Phase; 4] = [Phase::Setup, Phase::Execution, Phase::Verification, Phase::Cleanup];
}

#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error("scenario {0:?} is already registered")]
    DuplicateScenario(String),
    #[error("no scenario registered with id {0:?}")]
    UnknownScenario(String),
    #[error("step {step:?} in scenario {scenario:?} lists unknown prerequisite {prerequisite:?}")]
    UnknownPrerequisite {
        scenario: String,
        step: String,
        prerequisite: String,
    },
    #[error("failed to allocate runtime: {0}")]
    RuntimeAllocation(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, OrchestratorError>;

/// Owns registered scenarios and their execution history.
pub struct ScenarioOrchestrator {
    scenarios: Mutex<HashMap<String, Arc<Scenario>>>,
    history: Mutex<Vec<Execution>>,
}

impl Default for ScenarioOrchestrator {
    fn default() -> Self {
        Self::new()
    }
}

impl ScenarioOrchestrator {
    pub fn new() -> Self {
        Self {
            scenarios: Mutex::new(HashMap::new()),
            history: Mutex::new(Vec::new()),
        }
    }

    /// Reject duplicates by id, and validate every step's prerequisites
    /// point to existing step ids in the same scenario.
    pub fn register_scenario(&self, scenario: Scenario) -> Result<()> {
        let mut scenarios = self.scenarios.lock();
        if scenarios.contains_key(&scenario.id) {
            return Err(OrchestratorError::DuplicateScenario(scenario.id));
        }

        let step_ids: std::collections::HashSet<&str> =
            scenario.steps.iter().map(|s| s.id.as_str()).collect();
        for step in &scenario.steps {
            for prereq in &step.prerequisites {
                if !step_ids.contains(prereq.as_str()) {
                    return Err(OrchestratorError::UnknownPrerequisite {
                        scenario: scenario.id.clone(),
                        step: step.id.clone(),
                        prerequisite: prereq.clone(),
                    });
                }
            }
        }

        scenarios.insert(scenario.id.clone(), Arc::new(scenario));
        Ok(())
    }

    pub fn history(&self) -> Vec<Execution> {
        self.history.lock().clone()
    }

    /// Run every phase of `id` in fixed order, aggregating step results
    /// into an [`Execution`]. Always tears the runtime down, even when a
    /// phase fails.
    pub fn execute_scenario(&self, id: &str, seed: i64) -> Result<Execution> {
        let scenario = self
            .scenarios
            .lock()
            .get(id)
            .cloned()
            .ok_or_else(|| OrchestratorError::UnknownScenario(id.to_string()))?;

        let runtime = Arc::new(Runtime::allocate(seed)?);
        let deadline = Instant::now() + scenario.timeout;
        let start_time = std::time::SystemTime::now();

        runtime.emit(EventKind::ScenarioStarted, None, None, format!("scenario {id} started"));

        let mut abort = false;
        let mut last_failed_step: Option<String> = None;

        for &phase in &Phase::ORDER {
            runtime.emit(EventKind::PhaseStarted, None, Some(phase), format!("{phase:?} phase started"));

            if abort && phase != Phase::Cleanup {
                for step in scenario.steps.iter().filter(|s| s.phase == phase) {
                    skip_step(&runtime, step, "skipped: fail_fast short-circuit after an earlier failure");
                }
            } else {
                let phase_steps: Vec<&Step> = scenario.steps.iter().filter(|s| s.phase == phase).collect();
                let parallel_ids: &[String] = scenario
                    .parallel_groups
                    .get(&phase)
                    .map(|v| v.as_slice())
                    .unwrap_or(&[]);

                let (parallel, sequential): (Vec<&Step>, Vec<&Step>) = phase_steps
                    .into_iter()
                    .partition(|s| parallel_ids.iter().any(|id| id == &s.id));

                for step in sequential {
                    if !abort {
                        run_step(&runtime, step, deadline, &mut abort, &mut last_failed_step, scenario.fail_fast);
                    } else {
                        skip_step(&runtime, step, "skipped: fail_fast short-circuit after an earlier failure");
                    }
                }

                if !abort && !parallel.is_empty() {
                    run_parallel_group(&runtime, &parallel, deadline);
                    if scenario.fail_fast
                        && parallel.iter().any(|s| {
                            runtime
                                .step_result(&s.id)
                                .is_some_and(|r| !matches!(r.status, StepStatus::Succeeded))
                        })
                    {
                        abort = true;
                    }
                } else if abort {
                    for step in parallel {
                        skip_step(&runtime, step, "skipped: fail_fast short-circuit after an earlier failure");
                    }
                }
            }

            runtime.emit(EventKind::PhaseCompleted, None, Some(phase), format!("{phase:?} phase completed"));
        }

        let end_time = std::time::SystemTime::now();
        let step_results = runtime.step_results_snapshot();
        let success = step_results.values().all(|r| !matches!(r.status, StepStatus::Failed | StepStatus::TimedOut));

        if success {
            runtime.emit(EventKind::ScenarioCompleted, None, None, format!("scenario {id} completed"));
        } else {
            runtime.emit(EventKind::ScenarioFailed, None, None, format!("scenario {id} failed"));
        }

        let reproduction_hint = (!success).then(|| {
            format!(
                "seed={} scenario={} step={}",
                seed,
                scenario.id,
                last_failed_step.as_deref().unwrap_or("unknown")
            )
        });

        runtime.teardown();

        let execution = Execution {
            scenario_id: scenario.id.clone(),
            start_time,
            end_time,
            success,
            steps_executed: step_results.values().filter(|r| r.status != StepStatus::Skipped).count(),
            steps_failed: step_results
                .values()
                .filter(|r| matches!(r.status, StepStatus::Failed | StepStatus::TimedOut))
                .count(),
            steps_skipped: step_results.values().filter(|r| r.status == StepStatus::Skipped).count(),
            events: runtime.events_snapshot(),
            step_results,
            reproduction_hint,
        };

        self.history.lock().push(execution.clone());
        Ok(execution)
    }
}

fn skip_step(runtime: &Runtime, step: &Step, reason: &str) {
    runtime.emit(EventKind::StepSkipped, Some(step.id.clone()), Some(step.phase), reason.to_string());
    runtime.record_step_result(StepResult {
        step_id: step.id.clone(),
        status: StepStatus::Skipped,
        attempts: 0,
        error: None,
        duration: Duration::ZERO,
    });
}

/// Skip `step` if any prerequisite has not produced a successful result,
/// otherwise execute it with retry/timeout/validation/callback handling.
fn run_step(
    runtime: &Arc<Runtime>,
    step: &Step,
    scenario_deadline: Instant,
    abort: &mut bool,
    last_failed_step: &mut Option<String>,
    fail_fast: bool,
) {
    let prereqs_met = step.prerequisites.iter().all(|p| {
        runtime.step_result(p).is_some_and(|r| r.status == StepStatus::Succeeded)
    });
    if !prereqs_met {
        skip_step(runtime, step, "skipped: an unmet prerequisite");
        return;
    }

    let result = execute_step(runtime, step, scenario_deadline);
    let failed = matches!(result.status, StepStatus::Failed | StepStatus::TimedOut);
    runtime.record_step_result(result);
    if failed {
        *last_failed_step = Some(step.id.clone());
        if fail_fast {
            *abort = true;
        }
    }
}

fn run_parallel_group(runtime: &Arc<Runtime>, steps: &[&Step], deadline: Instant) {
    thread::scope(|scope| {
        let mut handles = Vec::new();
        for step in steps {
            let runtime = runtime.clone();
            let step = (*step).clone();
            handles.push(scope.spawn(move || {
                let prereqs_met = step.prerequisites.iter().all(|p| {
                    runtime.step_result(p).is_some_and(|r| r.status == StepStatus::Succeeded)
                });
                if !prereqs_met {
                    skip_step(&runtime, &step, "skipped: an unmet prerequisite");
                    return;
                }
                let result = execute_step(&runtime, &step, deadline);
                runtime.record_step_result(result);
            }));
        }
        for handle in handles {
            let _ = handle.join();
        }
    });
}

enum StepOutcome {
    Failed(StepError),
    TimedOut,
}

/// Bind the step to its deadline, invoke its function, retry on failure up
/// to `max_retries` with a `(attempt+1) * 1s` backoff bounded by the step
/// deadline, then run validation if configured (spec §4.G).
fn execute_step(runtime: &Arc<Runtime>, step: &Step, scenario_deadline: Instant) -> StepResult {
    let step_deadline = step
        .timeout
        .map(|t| Instant::now() + t)
        .map(|d| d.min(scenario_deadline))
        .unwrap_or(scenario_deadline);

    let start = Instant::now();
    let mut attempts = 0u32;
    let mut final_error: Option<StepError> = None;
    let mut timed_out = false;

    loop {
        attempts += 1;
        runtime.emit(
            EventKind::StepStarted,
            Some(step.id.clone()),
            Some(step.phase),
            format!("step {} started (attempt {attempts})", step.id),
        );

        match run_bounded(runtime, &step.function, step_deadline) {
            Ok(()) => {
                if let Some(validation) = &step.validation {
                    match run_bounded(runtime, validation, step_deadline) {
                        Ok(()) => {
                            final_error = None;
                            timed_out = false;
                            break;
                        }
                        Err(StepOutcome::Failed(e)) => {
                            final_error = Some(StepError::new(format!("validation failed: {e}")));
                            break;
                        }
                        Err(StepOutcome::TimedOut) => {
                            timed_out = true;
                            final_error = Some(StepError::new("validation exceeded its deadline"));
                            break;
                        }
                    }
                }
                final_error = None;
                timed_out = false;
                break;
            }
            Err(StepOutcome::TimedOut) => {
                timed_out = true;
                final_error = Some(StepError::new("step exceeded its deadline"));
                break;
            }
            Err(StepOutcome::Failed(e)) => {
                if step.retryable && attempts <= step.max_retries {
                    runtime.emit(
                        EventKind::StepRetried,
                        Some(step.id.clone()),
                        Some(step.phase),
                        format!("step {} failed on attempt {attempts}, retrying: {e}", step.id),
                    );
                    let backoff = Duration::from_secs((attempts + 1) as u64);
                    let remaining = step_deadline.saturating_duration_since(Instant::now());
                    thread::sleep(backoff.min(remaining));
                    continue;
                }
                final_error = Some(e);
                break;
            }
        }
    }

    let duration = start.elapsed();
    let status = if final_error.is_none() {
        StepStatus::Succeeded
    } else if timed_out {
        StepStatus::TimedOut
    } else {
        StepStatus::Failed
    };

    let result = StepResult {
        step_id: step.id.clone(),
        status,
        attempts,
        error: final_error.as_ref().map(|e| e.to_string()),
        duration,
    };

    match status {
        StepStatus::Succeeded => {
            runtime.emit(
                EventKind::StepCompleted,
                Some(step.id.clone()),
                Some(step.phase),
                format!("step {} succeeded", step.id),
            );
            if let Some(callback) = &step.on_success {
                callback(runtime, &result);
            }
        }
        StepStatus::TimedOut => {
            runtime.emit(
                EventKind::StepFailed,
                Some(step.id.clone()),
                Some(step.phase),
                format!("step {} timed out", step.id),
            );
            if let Some(callback) = &step.on_timeout {
                callback(runtime, &result);
            }
        }
        _ => {
            runtime.emit(
                EventKind::StepFailed,
                Some(step.id.clone()),
                Some(step.phase),
                format!("step {} failed: {}", step.id, result.error.as_deref().unwrap_or("")),
            );
            if let Some(callback) = &step.on_failure {
                callback(runtime, &result);
            }
        }
    }

    result
}

/// Run `function` on a detached thread and wait for it with a timeout,
/// the same recv-with-ceiling pattern [`crate::context::CancellationManager::verify_context_propagation`]
/// uses — a hung step cannot hang the scenario, though a truly wedged step
/// function keeps running in the background.
fn run_bounded(
    runtime: &Arc<Runtime>,
    function: &StepFn,
    deadline: Instant,
) -> std::result::Result<(), StepOutcome> {
    let remaining = deadline.saturating_duration_since(Instant::now());
    let function = function.clone();
    let runtime = runtime.clone();
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let result = function(&runtime);
        let _ = tx.send(result);
    });
    match rx.recv_timeout(remaining) {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(StepOutcome::Failed(e)),
        Err(_) => Err(StepOutcome::TimedOut),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn ok_step(id: &str, phase: Phase) -> Step {
        Step::new(id, id, phase, |_rt| Ok(()))
    }

    #[test]
    fn four_phase_scenario_runs_in_order() {
        let orchestrator = ScenarioOrchestrator::new();
        let scenario = Scenario::new("s1", "basic", Duration::from_secs(5))
            .with_step(ok_step("setup", Phase::Setup))
            .with_step(ok_step("exec", Phase::Execution))
            .with_step(ok_step("verify", Phase::Verification))
            .with_step(ok_step("cleanup", Phase::Cleanup));
        orchestrator.register_scenario(scenario).unwrap();

        let execution = orchestrator.execute_scenario("s1", 1).unwrap();
        assert!(execution.success);
        assert_eq!(execution.steps_executed, 4);
        assert_eq!(execution.steps_failed, 0);
        assert_eq!(execution.steps_skipped, 0);
    }

    #[test]
    fn duplicate_scenario_id_rejected() {
        let orchestrator = ScenarioOrchestrator::new();
        let scenario = || Scenario::new("dup", "dup", Duration::from_secs(1));
        orchestrator.register_scenario(scenario()).unwrap();
        let err = orchestrator.register_scenario(scenario()).unwrap_err();
        assert!(matches!(err, OrchestratorError::DuplicateScenario(_)));
    }

    #[test]
    fn unknown_prerequisite_rejected_at_registration() {
        let orchestrator = ScenarioOrchestrator::new();
        let scenario = Scenario::new("s", "s", Duration::from_secs(1))
            .with_step(ok_step("a", Phase::Setup).with_prerequisite("ghost"));
        let err = orchestrator.register_scenario(scenario).unwrap_err();
        assert!(matches!(err, OrchestratorError::UnknownPrerequisite { .. }));
    }

    #[test]
    fn fail_fast_skips_verification_but_always_runs_cleanup() {
        // spec §8 concrete scenario 6.
        let orchestrator = ScenarioOrchestrator::new();
        let scenario = Scenario::new("ff", "fail-fast", Duration::from_secs(5))
            .with_fail_fast(true)
            .with_step(ok_step("setup", Phase::Setup))
            .with_step(Step::new("exec-fail", "exec-fail", Phase::Execution, |_rt| {
                Err(StepError::new("boom"))
            }))
            .with_step(ok_step("verify", Phase::Verification))
            .with_step(ok_step("cleanup", Phase::Cleanup));
        orchestrator.register_scenario(scenario).unwrap();

        let execution = orchestrator.execute_scenario("ff", 1).unwrap();
        assert!(!execution.success);
        assert_eq!(execution.step_results["verify"].status, StepStatus::Skipped);
        assert_eq!(execution.step_results["cleanup"].status, StepStatus::Succeeded);
        assert!(execution.steps_failed >= 1);
        assert!(execution.steps_skipped >= 1);
        assert!(execution.reproduction_hint.is_some());
    }

    #[test]
    fn unmet_prerequisite_skips_dependent_step() {
        let orchestrator = ScenarioOrchestrator::new();
        let scenario = Scenario::new("s", "s", Duration::from_secs(5))
            .with_step(Step::new("a", "a", Phase::Setup, |_rt| Err(StepError::new("nope"))))
            .with_step(ok_step("b", Phase::Setup).with_prerequisite("a"));
        orchestrator.register_scenario(scenario).unwrap();

        let execution = orchestrator.execute_scenario("s", 1).unwrap();
        assert_eq!(execution.step_results["b"].status, StepStatus::Skipped);
    }

    #[test]
    fn retry_exhausts_at_max_retries_plus_one_attempts() {
        let orchestrator = ScenarioOrchestrator::new();
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = attempts.clone();
        let scenario = Scenario::new("s", "s", Duration::from_secs(5)).with_step(
            Step::new("flaky", "flaky", Phase::Setup, move |_rt| {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(StepError::new("always fails"))
            })
            .with_retries(2),
        );
        orchestrator.register_scenario(scenario).unwrap();

        let execution = orchestrator.execute_scenario("s", 1).unwrap();
        assert_eq!(execution.step_results["flaky"].attempts, 3);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        assert_eq!(execution.step_results["flaky"].status, StepStatus::Failed);
    }

    #[test]
    fn validation_failure_demotes_step_to_failed() {
        let orchestrator = ScenarioOrchestrator::new();
        let scenario = Scenario::new("s", "s", Duration::from_secs(5)).with_step(
            Step::new("checked", "checked", Phase::Setup, |_rt| Ok(()))
                .with_validation(|_rt| Err(StepError::new("invariant violated"))),
        );
        orchestrator.register_scenario(scenario).unwrap();

        let execution = orchestrator.execute_scenario("s", 1).unwrap();
        assert_eq!(execution.step_results["checked"].status, StepStatus::Failed);
    }

    #[test]
    fn step_timeout_fires_on_timeout_callback() {
        let orchestrator = ScenarioOrchestrator::new();
        let fired = Arc::new(AtomicU32::new(0));
        let flag = fired.clone();
        let scenario = Scenario::new("s", "s", Duration::from_secs(5)).with_step(
            Step::new("slow", "slow", Phase::Setup, |_rt| {
                std::thread::sleep(Duration::from_millis(200));
                Ok(())
            })
            .with_timeout(Duration::from_millis(20))
            .with_on_timeout(move |_rt, _result| {
                flag.fetch_add(1, Ordering::SeqCst);
            }),
        );
        orchestrator.register_scenario(scenario).unwrap();

        let execution = orchestrator.execute_scenario("s", 1).unwrap();
        assert_eq!(execution.step_results["slow"].status, StepStatus::TimedOut);
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn parallel_group_runs_steps_concurrently() {
        let orchestrator = ScenarioOrchestrator::new();
        let scenario = Scenario::new("s", "s", Duration::from_secs(5))
            .with_step(ok_step("p1", Phase::Execution))
            .with_step(ok_step("p2", Phase::Execution))
            .with_parallel_group(Phase::Execution, ["p1".to_string(), "p2".to_string()]);
        orchestrator.register_scenario(scenario).unwrap();

        let execution = orchestrator.execute_scenario("s", 1).unwrap();
        assert!(execution.success);
        assert_eq!(execution.step_results["p1"].status, StepStatus::Succeeded);
        assert_eq!(execution.step_results["p2"].status, StepStatus::Succeeded);
    }

    #[test]
    fn history_accumulates_across_runs() {
        let orchestrator = ScenarioOrchestrator::new();
        let scenario = Scenario::new("s", "s", Duration::from_secs(5)).with_step(ok_step("a", Phase::Setup));
        orchestrator.register_scenario(scenario).unwrap();
        orchestrator.execute_scenario("s", 1).unwrap();
        orchestrator.execute_scenario("s", 2).unwrap();
        assert_eq!(orchestrator.history().len(), 2);
    }
}
