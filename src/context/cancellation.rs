use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use super::{CancellationToken, ContextError};

/// A named hook an operation calls to give the test harness a chance to
/// cancel it deterministically (spec §4.F, glossary).
pub struct CancellationPoint {
    pub id: String,
    pub stage: String,
    enabled: AtomicBool,
    execution_count: AtomicU64,
    trigger: Box<dyn Fn(&CancellationToken) -> Option<ContextError> + Send + Sync>,
}

impl CancellationPoint {
    pub fn new(
        id: impl Into<String>,
        stage: impl Into<String>,
        trigger: impl Fn(&CancellationToken) -> Option<ContextError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            id: id.into(),
            stage: stage.into(),
            enabled: AtomicBool::new(true),
            execution_count: AtomicU64::new(0),
            trigger: Box::new(trigger),
        }
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    pub fn execution_count(&self) -> u64 {
        self.execution_count.load(Ordering::SeqCst)
    }
}

/// Owns the registry of named cancellation points and the concurrent-test
/// and propagation-chain harnesses (spec §4.F).
pub struct CancellationManager {
    enabled: AtomicBool,
    points: Mutex<HashMap<String, Arc<CancellationPoint>>>,
}

impl Default for CancellationManager {
    fn default() -> Self {
        Self::new()
    }
}

impl CancellationManager {
    pub fn new() -> Self {
        Self {
            enabled: AtomicBool::new(true),
            points: Mutex::new(HashMap::new()),
        }
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    pub fn register_point(&self, point: CancellationPoint) {
        self.points.lock().insert(point.id.clone(), Arc::new(point));
    }

    pub fn point(&self, id: &str) -> Option<Arc<CancellationPoint>> {
        self.points.lock().get(id).cloned()
    }

    /// If the point exists, is enabled, and the manager is globally
    /// enabled, invoke its trigger and return its error. Afterward, if
    /// `token` is already cancelled, return its cancellation error.
    /// Counters update atomically.
    pub fn inject_cancellation(
        &self,
        point_id: &str,
        token: &CancellationToken,
    ) -> Result<(), ContextError> {
        if self.enabled.load(Ordering::SeqCst) {
            if let Some(point) = self.point(point_id)
                && point.enabled.load(Ordering::SeqCst)
            {
                point.execution_count.fetch_add(1, Ordering::SeqCst);
                if let Some(err) = (point.trigger)(token) {
                    return Err(err);
                }
            }
        }
        if token.is_cancelled() {
            return Err(token.error());
        }
        Ok(())
    }

    /// Run `NumOperations` copies of `op` under a semaphore of width
    /// `MaxConcurrency`, with optional stagger, per-operation deadline and
    /// scheduled cancellation (spec §4.F).
    pub fn run_concurrent_test<F>(&self, config: &ConcurrentTestConfig, op: F) -> ConcurrentTestReport
    where
        F: Fn(usize, &CancellationToken) -> OperationOutcome + Sync,
    {
        if let Some(delay) = config.scheduled_cancellation {
            let token = config.token.clone();
            std::thread::spawn(move || {
                std::thread::sleep(delay);
                token.cancel();
            });
        }

        let semaphore = Semaphore::new(config.max_concurrency.max(1));
        let records: Mutex<Vec<OperationRecord>> = Mutex::new(Vec::new());

        std::thread::scope(|scope| {
            for index in 0..config.num_operations {
                let semaphore = &semaphore;
                let op = &op;
                let records = &records;
                let token = config.token.clone();
                let stagger = config.stagger;
                let deadline = config.per_operation_deadline;
                scope.spawn(move || {
                    if let Some(delay) = stagger {
                        std::thread::sleep(delay * index as u32);
                    }
                    semaphore.acquire();
                    let start = Instant::now();
                    let outcome = op(index, &token);
                    let elapsed = start.elapsed();
                    semaphore.release();

                    let timed_out = deadline.is_some_and(|d| elapsed > d);
                    records.lock().push(OperationRecord {
                        index,
                        duration: elapsed,
                        error: outcome.error,
                        cancelled: outcome.cancelled || token.is_cancelled(),
                        timed_out,
                    });
                });
            }
        });

        ConcurrentTestReport::from_records(records.into_inner())
    }

    /// Recursively invoke a nested operation to depth `chain_depth`,
    /// sleeping `propagation_delay` at each level; at every level checks
    /// the ambient token first and short-circuits if it has fired.
    pub fn test_propagation(&self, config: &PropagationConfig) -> Vec<PropagationRecord> {
        let start = Instant::now();
        let mut records = Vec::new();
        propagate(config, 0, start, &mut records);
        records
    }

    /// Run `op` expecting it to honor `token`'s cancellation: it must
    /// return the token's own cancellation error (or a wrapping of it),
    /// never `Ok` and never an unrelated error. Bounded by a five-second
    /// hard ceiling so a hung operation cannot hang the test.
    pub fn verify_context_propagation<F>(&self, token: &CancellationToken, op: F) -> Result<(), ContextError>
    where
        F: FnOnce(&CancellationToken) -> Option<ContextError> + Send + 'static,
    {
        const CEILING: Duration = Duration::from_secs(5);
        let token_for_thread = token.clone();
        let (tx, rx) = std::sync::mpsc::channel();
        std::thread::spawn(move || {
            let outcome = op(&token_for_thread);
            let _ = tx.send(outcome);
        });

        match rx.recv_timeout(CEILING) {
            Ok(None) => Err(ContextError::PropagationNotObserved),
            Ok(Some(ContextError::Cancelled { token_id })) if token_id == token.id() => Ok(()),
            Ok(Some(other)) => Err(ContextError::UnrelatedError(other.to_string())),
            Err(_) => Err(ContextError::VerificationTimedOut),
        }
    }
}

fn propagate(config: &PropagationConfig, depth: u32, start: Instant, records: &mut Vec<PropagationRecord>) {
    if config.token.is_cancelled() {
        records.push(PropagationRecord {
            depth,
            propagated: true,
            elapsed: start.elapsed(),
        });
        return;
    }
    records.push(PropagationRecord {
        depth,
        propagated: false,
        elapsed: start.elapsed(),
    });
    if depth + 1 >= config.chain_depth {
        return;
    }
    std::thread::sleep(config.propagation_delay);
    propagate(config, depth + 1, start, records);
}

/// Configuration for [`CancellationManager::run_concurrent_test`].
pub struct ConcurrentTestConfig {
    pub num_operations: usize,
    pub max_concurrency: usize,
    pub stagger: Option<Duration>,
    pub per_operation_deadline: Option<Duration>,
    pub scheduled_cancellation: Option<Duration>,
    pub token: CancellationToken,
}

/// Per-operation outcome an operation hands back to the harness.
#[derive(Debug, Clone, Default)]
pub struct OperationOutcome {
    pub error: Option<String>,
    pub cancelled: bool,
}

/// A single operation's recorded outcome.
#[derive(Debug, Clone)]
pub struct OperationRecord {
    pub index: usize,
    pub duration: Duration,
    pub error: Option<String>,
    pub cancelled: bool,
    pub timed_out: bool,
}

/// Aggregated results of a concurrent-operation test run.
#[derive(Debug, Clone)]
pub struct ConcurrentTestReport {
    pub records: Vec<OperationRecord>,
    pub min_duration: Duration,
    pub avg_duration: Duration,
    pub max_duration: Duration,
    pub error_count: usize,
    pub cancelled_count: usize,
    pub timed_out_count: usize,
}

impl ConcurrentTestReport {
    fn from_records(mut records: Vec<OperationRecord>) -> Self {
        records.sort_by_key(|r| r.index);
        let durations: Vec<Duration> = records.iter().map(|r| r.duration).collect();
        let min_duration = durations.iter().min().copied().unwrap_or_default();
        let max_duration = durations.iter().max().copied().unwrap_or_default();
        let avg_duration = if durations.is_empty() {
            Duration::default()
        } else {
            durations.iter().sum::<Duration>() / durations.len() as u32
        };
        let error_count = records.iter().filter(|r| r.error.is_some()).count();
        let cancelled_count = records.iter().filter(|r| r.cancelled).count();
        let timed_out_count = records.iter().filter(|r| r.timed_out).count();
        Self {
            records,
            min_duration,
            avg_duration,
            max_duration,
            error_count,
            cancelled_count,
            timed_out_count,
        }
    }
}

/// Configuration for [`CancellationManager::test_propagation`].
pub struct PropagationConfig {
    pub chain_depth: u32,
    pub propagation_delay: Duration,
    pub token: CancellationToken,
}

/// One level of a propagation-chain test.
#[derive(Debug, Clone)]
pub struct PropagationRecord {
    pub depth: u32,
    pub propagated: bool,
    pub elapsed: Duration,
}

/// A minimal counting semaphore built on `parking_lot`'s mutex/condvar,
/// used to bound concurrency in [`CancellationManager::run_concurrent_test`].
struct Semaphore {
    state: Mutex<usize>,
    cvar: Condvar,
}

impl Semaphore {
    fn new(permits: usize) -> Self {
        Self {
            state: Mutex::new(permits),
            cvar: Condvar::new(),
        }
    }

    fn acquire(&self) {
        let mut permits = self.state.lock();
        self.cvar.wait_while(&mut permits, |p| *p == 0);
        *permits -= 1;
    }

    fn release(&self) {
        let mut permits = self.state.lock();
        *permits += 1;
        self.cvar.notify_one();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::CancellationToken;

    #[test]
    fn inject_cancellation_invokes_registered_trigger() {
        let manager = CancellationManager::new();
        manager.register_point(CancellationPoint::new("write", "execution", |_token| {
            Some(ContextError::UnrelatedError("boom".to_string()))
        }));
        let token = CancellationToken::new();
        let result = manager.inject_cancellation("write", &token);
        assert!(result.is_err());
        assert_eq!(manager.point("write").unwrap().execution_count(), 1);
    }

    #[test]
    fn inject_cancellation_falls_back_to_token_error() {
        let manager = CancellationManager::new();
        let token = CancellationToken::new();
        token.cancel();
        let result = manager.inject_cancellation("missing", &token);
        assert!(matches!(result, Err(ContextError::Cancelled { .. })));
    }

    #[test]
    fn run_concurrent_test_bounds_concurrency_and_reports_durations() {
        let manager = CancellationManager::new();
        let config = ConcurrentTestConfig {
            num_operations: 8,
            max_concurrency: 2,
            stagger: None,
            per_operation_deadline: None,
            scheduled_cancellation: None,
            token: CancellationToken::new(),
        };
        let report = manager.run_concurrent_test(&config, |_index, _token| OperationOutcome::default());
        assert_eq!(report.records.len(), 8);
        assert_eq!(report.error_count, 0);
    }

    #[test]
    fn scheduled_cancellation_reaches_later_operations() {
        let manager = CancellationManager::new();
        let token = CancellationToken::new();
        let config = ConcurrentTestConfig {
            num_operations: 4,
            max_concurrency: 1,
            stagger: Some(Duration::from_millis(30)),
            per_operation_deadline: None,
            scheduled_cancellation: Some(Duration::from_millis(10)),
            token,
        };
        let report = manager.run_concurrent_test(&config, |_index, token| OperationOutcome {
            error: None,
            cancelled: token.is_cancelled(),
        });
        assert!(report.cancelled_count >= 1);
    }

    #[test]
    fn test_propagation_reaches_configured_depth() {
        let manager = CancellationManager::new();
        let config = PropagationConfig {
            chain_depth: 4,
            propagation_delay: Duration::from_millis(1),
            token: CancellationToken::new(),
        };
        let records = manager.test_propagation(&config);
        assert_eq!(records.len(), 4);
        assert!(records.iter().all(|r| !r.propagated));
    }

    #[test]
    fn test_propagation_short_circuits_once_cancelled() {
        let manager = CancellationManager::new();
        let token = CancellationToken::new();
        token.cancel();
        let config = PropagationConfig {
            chain_depth: 10,
            propagation_delay: Duration::from_millis(1),
            token,
        };
        let records = manager.test_propagation(&config);
        assert_eq!(records.len(), 1);
        assert!(records[0].propagated);
    }

    #[test]
    fn verify_context_propagation_accepts_matching_cancellation() {
        let manager = CancellationManager::new();
        let token = CancellationToken::new();
        let token_id = token.id();
        let result = manager.verify_context_propagation(&token, move |_t| {
            Some(ContextError::Cancelled { token_id })
        });
        assert!(result.is_ok());
    }

    #[test]
    fn verify_context_propagation_rejects_success() {
        let manager = CancellationManager::new();
        let token = CancellationToken::new();
        let result = manager.verify_context_propagation(&token, |_t| None);
        assert!(matches!(result, Err(ContextError::PropagationNotObserved)));
    }
}
