use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use super::CancellationToken;

/// The controller's lifecycle state (spec §4.F): `idle → active →
/// (cancelled|completed)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextState {
    Idle,
    Active,
    Cancelled,
    Completed,
}

/// A recorded state transition, in happens-before order for a single
/// controller (spec §5).
#[derive(Debug, Clone)]
pub struct ContextEvent {
    pub from: ContextState,
    pub to: ContextState,
    pub at: Instant,
}

struct Inner {
    state: ContextState,
    events: Vec<ContextEvent>,
}

/// Wraps an ambient [`CancellationToken`] plus an optional deadline, and
/// can be configured to cancel itself after a delay via a background
/// timer thread.
pub struct ContextController {
    token: CancellationToken,
    timeout: Option<Duration>,
    inner: Mutex<Inner>,
    timer: Mutex<Option<Arc<TimerHandle>>>,
}

struct TimerHandle {
    stop: Mutex<bool>,
    cvar: Condvar,
}

impl ContextController {
    pub fn new(timeout: Option<Duration>) -> Self {
        Self {
            token: CancellationToken::new(),
            timeout,
            inner: Mutex::new(Inner {
                state: ContextState::Idle,
                events: Vec::new(),
            }),
            timer: Mutex::new(None),
        }
    }

    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub fn state(&self) -> ContextState {
        self.inner.lock().state
    }

    pub fn events(&self) -> Vec<ContextEvent> {
        self.inner.lock().events.clone()
    }

    fn transition(&self, to: ContextState) {
        let mut inner = self.inner.lock();
        let from = inner.state;
        inner.state = to;
        inner.events.push(ContextEvent {
            from,
            to,
            at: Instant::now(),
        });
    }

    /// Begin a timed cancellation after `delay`. Idempotent while the
    /// controller is already active — a second call is a no-op rather than
    /// spawning a competing timer.
    pub fn start_controlled_cancellation(self: &Arc<Self>, delay: Duration) {
        if self.state() == ContextState::Active {
            return;
        }
        self.transition(ContextState::Active);

        let handle = Arc::new(TimerHandle {
            stop: Mutex::new(false),
            cvar: Condvar::new(),
        });
        *self.timer.lock() = Some(handle.clone());

        let controller = self.clone();
        std::thread::spawn(move || {
            let mut stop = handle.stop.lock();
            let result = handle.cvar.wait_for(&mut stop, delay);
            let fired = !*stop && result.timed_out();
            drop(stop);
            if fired {
                controller.token.cancel();
                controller.transition(ContextState::Cancelled);
            }
        });
    }

    /// Mark the controller completed without cancellation (e.g. the
    /// wrapped operation finished on its own). Idempotent.
    pub fn complete(&self) {
        if self.state() == ContextState::Active {
            self.transition(ContextState::Completed);
        }
        self.release_timer();
    }

    /// Stop the controller, releasing any pending timer. Safe to call
    /// multiple times; no events are appended once stopped.
    pub fn stop(&self) {
        self.release_timer();
        let state = self.state();
        if state == ContextState::Active {
            self.transition(ContextState::Completed);
        }
    }

    fn release_timer(&self) {
        if let Some(handle) = self.timer.lock().take() {
            *handle.stop.lock() = true;
            handle.cvar.notify_all();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn starts_idle_and_transitions_to_active() {
        let controller = Arc::new(ContextController::new(None));
        assert_eq!(controller.state(), ContextState::Idle);
        controller.start_controlled_cancellation(Duration::from_secs(60));
        assert_eq!(controller.state(), ContextState::Active);
        controller.stop();
    }

    #[test]
    fn start_is_idempotent_while_active() {
        let controller = Arc::new(ContextController::new(None));
        controller.start_controlled_cancellation(Duration::from_secs(60));
        controller.start_controlled_cancellation(Duration::from_secs(60));
        assert_eq!(controller.events().len(), 1);
        controller.stop();
    }

    #[test]
    fn stop_is_idempotent_and_appends_no_further_events_after() {
        let controller = Arc::new(ContextController::new(None));
        controller.start_controlled_cancellation(Duration::from_millis(50));
        controller.stop();
        let count_after_first_stop = controller.events().len();
        controller.stop();
        assert_eq!(controller.events().len(), count_after_first_stop);
    }

    #[test]
    fn delayed_cancellation_fires_and_cancels_token() {
        let controller = Arc::new(ContextController::new(None));
        let token = controller.token();
        controller.start_controlled_cancellation(Duration::from_millis(20));
        std::thread::sleep(Duration::from_millis(100));
        assert!(token.is_cancelled());
        assert_eq!(controller.state(), ContextState::Cancelled);
    }
}
