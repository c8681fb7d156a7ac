//! Named inter-step timing primitives (spec §4.G's optional Timing
//! Coordinator): barriers, one-shot signals and sleep-delays keyed by
//! operation name, for scenarios that need hand-crafted synchronization.

use std::collections::HashMap;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

struct Barrier {
    target: usize,
    arrived: usize,
}

/// Concurrency-safe registry of named barriers, one-shot signals and
/// delays, shared across a scenario's parallel steps.
#[derive(Default)]
pub struct TimingCoordinator {
    barriers: Mutex<HashMap<String, Barrier>>,
    barrier_cvar: Condvar,
    signals: Mutex<HashMap<String, bool>>,
    signal_cvar: Condvar,
}

impl TimingCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or reuse) a barrier named `name` expected to be awaited by
    /// `target` participants, then block until all have arrived.
    pub fn await_barrier(&self, name: &str, target: usize) {
        let mut barriers = self.barriers.lock();
        let barrier = barriers.entry(name.to_string()).or_insert(Barrier { target, arrived: 0 });
        barrier.arrived += 1;
        if barrier.arrived >= barrier.target {
            self.barrier_cvar.notify_all();
            return;
        }
        let generation_target = barrier.target;
        self.barrier_cvar.wait_while(&mut barriers, |b| {
            b.get(name).map(|entry| entry.arrived < generation_target).unwrap_or(false)
        });
    }

    /// Signal a named one-shot event; all current and future waiters on
    /// that name observe it as fired.
    pub fn signal(&self, name: &str) {
        self.signals.lock().insert(name.to_string(), true);
        self.signal_cvar.notify_all();
    }

    /// Block until `name` has been signaled, or `timeout` elapses. Returns
    /// `true` if the signal fired before the timeout.
    pub fn wait_for_signal(&self, name: &str, timeout: Duration) -> bool {
        let mut signals = self.signals.lock();
        if signals.get(name).copied().unwrap_or(false) {
            return true;
        }
        let result = self
            .signal_cvar
            .wait_for(&mut signals, timeout);
        !result.timed_out() && signals.get(name).copied().unwrap_or(false)
    }

    /// Sleep for a fixed delay keyed by operation name — a seam tests can
    /// use for hand-crafted timing without hardcoding raw `sleep` calls.
    pub fn delay(&self, _name: &str, duration: Duration) {
        std::thread::sleep(duration);
    }
}
