//! Error Injector (spec §4.B): probabilistic, pattern-matched, counted
//! injection of categorized errors at named operation points.

mod point;
mod trace;

pub use point::{ErrorCategory, ErrorKind, InjectedError, InjectionPoint, InjectionPredicate};
pub use trace::{PropagationAction, PropagationTrace, RecoveryAttempt, TraceEntry};

use std::collections::HashMap;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use uuid::Uuid;

use crate::rng::{AtomicCount, DeterministicStream};

#[derive(Debug, thiserror::Error)]
pub enum InjectorError {
    #[error("injection point {0:?} is already registered")]
    DuplicatePoint(String),
    #[error("no injection point registered with id {0:?}")]
    UnknownPoint(String),
}

pub type Result<T> = std::result::Result<T, InjectorError>;

/// A consistent, non-live snapshot of the injector's counters.
#[derive(Debug, Clone, Copy, Default)]
pub struct InjectorStatsSnapshot {
    pub total_checks: i64,
    pub total_injections: i64,
    pub active_points: usize,
}

#[derive(Default)]
struct InjectorStats {
    total_checks: AtomicCount,
    total_injections: AtomicCount,
}

/// Decides whether to fail a named operation, emits typed errors, and
/// records propagation traces.
pub struct ErrorInjector {
    enabled: AtomicBool,
    stream: DeterministicStream,
    points: RwLock<Vec<(String, InjectionPoint)>>,
    operation_counts: Mutex<HashMap<(String, String), u64>>,
    point_fire_counts: Mutex<HashMap<String, u64>>,
    traces: Mutex<HashMap<Uuid, PropagationTrace>>,
    recovery_attempts: Mutex<Vec<RecoveryAttempt>>,
    stats: InjectorStats,
}

impl ErrorInjector {
    /// Build a disabled-by-default injector driven by `seed`.
    pub fn new(seed: i64) -> Self {
        Self {
            enabled: AtomicBool::new(false),
            stream: DeterministicStream::new(seed),
            points: RwLock::new(Vec::new()),
            operation_counts: Mutex::new(HashMap::new()),
            point_fire_counts: Mutex::new(HashMap::new()),
            traces: Mutex::new(HashMap::new()),
            recovery_attempts: Mutex::new(Vec::new()),
            stats: InjectorStats::default(),
        }
    }

    pub fn add_injection_point(&self, id: impl Into<String>, point: InjectionPoint) -> Result<()> {
        let id = id.into();
        let mut points = self.points.write();
        if points.iter().any(|(existing, _)| existing == &id) {
            return Err(InjectorError::DuplicatePoint(id));
        }
        points.push((id, point));
        Ok(())
    }

    pub fn remove_injection_point(&self, id: &str) -> Result<()> {
        let mut points = self.points.write();
        let before = points.len();
        points.retain(|(existing, _)| existing != id);
        if points.len() == before {
            return Err(InjectorError::UnknownPoint(id.to_string()));
        }
        Ok(())
    }

    pub fn enable(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    /// Clear registered points, counters, traces and recovery attempts.
    /// Does not change the enabled flag.
    pub fn reset(&self) {
        self.points.write().clear();
        self.operation_counts.lock().clear();
        self.point_fire_counts.lock().clear();
        self.traces.lock().clear();
        self.recovery_attempts.lock().clear();
        self.stats.total_checks.set(0);
        self.stats.total_injections.set(0);
    }

    pub fn stats(&self) -> InjectorStatsSnapshot {
        InjectorStatsSnapshot {
            total_checks: self.stats.total_checks.get(),
            total_injections: self.stats.total_injections.get(),
            active_points: self.points.read().len(),
        }
    }

    pub fn propagation_traces(&self) -> Vec<PropagationTrace> {
        self.traces.lock().values().cloned().collect()
    }

    pub fn recovery_attempts(&self) -> Vec<RecoveryAttempt> {
        self.recovery_attempts.lock().clone()
    }

    pub fn track_error_propagation(
        &self,
        error_id: Uuid,
        operation: impl Into<String>,
        component: impl Into<String>,
        action: PropagationAction,
        kind: ErrorKind,
        message: impl Into<String>,
    ) {
        let operation = operation.into();
        let component = component.into();
        let message = message.into();
        let mut traces = self.traces.lock();
        let entry = traces
            .entry(error_id)
            .or_insert_with(|| PropagationTrace::open(error_id, message.clone()));
        entry.push(operation, component, action, kind, message);
    }

    pub fn track_recovery_attempt(
        &self,
        error_id: Uuid,
        recovery_kind: impl Into<String>,
        attempt_n: u32,
        success: bool,
        duration: Duration,
    ) {
        self.recovery_attempts.lock().push(RecoveryAttempt {
            error_id,
            recovery_kind: recovery_kind.into(),
            attempt_n,
            success,
            duration,
            recorded_at: std::time::SystemTime::now(),
        });
    }

    /// The core decision algorithm (spec §4.B, steps 1-5).
    pub fn should_inject_error(&self, operation: &str, path: &str) -> (Option<InjectedError>, bool) {
        if !self.is_enabled() {
            return (None, false);
        }
        self.stats.total_checks.increment();

        let key = (operation.to_string(), path.to_string());
        let count = {
            let mut counts = self.operation_counts.lock();
            let c = counts.entry(key).or_insert(0);
            *c += 1;
            *c
        };

        let points = self.points.read();
        for (id, point) in points.iter() {
            if !point.matches(operation, path) {
                continue;
            }
            if point.trigger_count > 0 && count != point.trigger_count {
                continue;
            }
            let fire_count_so_far = *self.point_fire_counts.lock().get(id).unwrap_or(&0);
            if point.max_injections > 0 && fire_count_so_far >= point.max_injections {
                continue;
            }

            let fires = if point.probability >= 1.0 {
                true
            } else {
                let context = draw_context(id, count);
                self.stream.probability(context) < point.probability
            };
            if !fires {
                continue;
            }

            if let Some(delay) = point.delay_before {
                thread::sleep(delay);
            }

            *self.point_fire_counts.lock().entry(id.clone()).or_insert(0) += 1;
            self.stats.total_injections.increment();

            let err = point.template.instantiate(operation, path);
            let error_id = Uuid::new_v4();
            self.traces
                .lock()
                .insert(error_id, PropagationTrace::open(error_id, err.to_string()));

            tracing::debug!(point = %id, %operation, %path, %count, "injection fired");

            if let Some(delay) = point.delay_after {
                thread::sleep(delay);
            }

            return (Some(err), true);
        }

        (None, false)
    }
}

fn draw_context(point_id: &str, count: u64) -> u64 {
    let mut hasher = DefaultHasher::new();
    point_id.hash(&mut hasher);
    count.hash(&mut hasher);
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn template() -> InjectedError {
        InjectedError::new(
            ErrorKind::Transient,
            ErrorCategory::Filesystem,
            "simulated failure",
            "write",
            "/tmp",
        )
    }

    #[test]
    fn disabled_injector_never_fires() {
        let injector = ErrorInjector::new(1);
        injector
            .add_injection_point("always", InjectionPoint::new("write", "", template()))
            .unwrap();
        let (err, fired) = injector.should_inject_error("write", "/tmp/x");
        assert!(!fired);
        assert!(err.is_none());
    }

    #[test]
    fn trigger_count_fires_exactly_once() {
        let injector = ErrorInjector::new(1);
        injector.enable(true);
        injector
            .add_injection_point(
                "third",
                InjectionPoint::new("write", "", template()).with_trigger_count(3),
            )
            .unwrap();

        for i in 1..=2 {
            let (_, fired) = injector.should_inject_error("write", "/tmp/x");
            assert!(!fired, "should not fire before the 3rd call (call {i})");
        }
        let (_, fired) = injector.should_inject_error("write", "/tmp/x");
        assert!(fired, "should fire on exactly the 3rd call");
        let (_, fired) = injector.should_inject_error("write", "/tmp/x");
        assert!(!fired, "should not fire again after the 3rd call");
    }

    #[test]
    fn max_injections_caps_fire_count() {
        let injector = ErrorInjector::new(1);
        injector.enable(true);
        injector
            .add_injection_point(
                "always",
                InjectionPoint::new("write", "", template()).with_max_injections(2),
            )
            .unwrap();

        let mut fired_count = 0;
        for _ in 0..5 {
            let (_, fired) = injector.should_inject_error("write", "/tmp/x");
            if fired {
                fired_count += 1;
            }
        }
        assert_eq!(fired_count, 2);
    }

    #[test]
    fn probability_zero_never_fires() {
        let injector = ErrorInjector::new(1);
        injector.enable(true);
        injector
            .add_injection_point(
                "never",
                InjectionPoint::new("write", "", template()).with_probability(0.0),
            )
            .unwrap();
        for _ in 0..20 {
            let (_, fired) = injector.should_inject_error("write", "/tmp/x");
            assert!(!fired);
        }
    }

    #[test]
    fn reproducible_with_same_seed() {
        let mk = || {
            let injector = ErrorInjector::new(99);
            injector.enable(true);
            injector
                .add_injection_point(
                    "sometimes",
                    InjectionPoint::new("write", "", template()).with_probability(0.5),
                )
                .unwrap();
            injector
        };
        let a = mk();
        let b = mk();
        let seq_a: Vec<bool> = (0..10)
            .map(|_| a.should_inject_error("write", "/tmp/x").1)
            .collect();
        let seq_b: Vec<bool> = (0..10)
            .map(|_| b.should_inject_error("write", "/tmp/x").1)
            .collect();
        assert_eq!(seq_a, seq_b);
    }

    #[test]
    fn duplicate_point_rejected() {
        let injector = ErrorInjector::new(1);
        injector
            .add_injection_point("dup", InjectionPoint::new("write", "", template()))
            .unwrap();
        let err = injector
            .add_injection_point("dup", InjectionPoint::new("write", "", template()))
            .unwrap_err();
        assert!(matches!(err, InjectorError::DuplicatePoint(_)));
    }

    #[test]
    fn reset_clears_points_and_stats() {
        let injector = ErrorInjector::new(1);
        injector.enable(true);
        injector
            .add_injection_point("p", InjectionPoint::new("write", "", template()))
            .unwrap();
        injector.should_inject_error("write", "/tmp/x");
        injector.reset();
        assert_eq!(injector.stats().active_points, 0);
        assert_eq!(injector.stats().total_checks, 0);
    }
}
