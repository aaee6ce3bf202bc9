//! Timer scheduling behind a trait, so progress reporting can run on a
//! deterministic clock in tests.

use crossbeam_channel::RecvTimeoutError;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

/// Callback run when a timer fires.
pub type Callback = Box<dyn FnOnce() + Send>;

/// Schedules callbacks.
pub trait Clock: Send + Sync {
    /// Runs `callback` once after `delay`, unless the returned timer is stopped first.
    fn after(&self, delay: Duration, callback: Callback) -> Timer;
}

/// Handle of a scheduled callback.
pub struct Timer {
    cancel: Mutex<Option<Box<dyn FnOnce() + Send>>>,
}

impl Timer {
    fn new(cancel: impl FnOnce() + Send + 'static) -> Self {
        Self {
            cancel: Mutex::new(Some(Box::new(cancel))),
        }
    }

    /// Prevents the callback from running if it has not started yet.
    pub fn stop(&self) {
        if let Some(cancel) = self.cancel.lock().take() {
            cancel();
        }
    }
}

/// Wall clock, one sleeping thread per pending timer.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn after(&self, delay: Duration, callback: Callback) -> Timer {
        let (cancel, cancelled) = crossbeam_channel::bounded::<()>(1);
        let spawned = std::thread::Builder::new()
            .name("progress-timer".into())
            .spawn(move || {
                // Dropping the sender wakes the thread with `Disconnected`.
                if cancelled.recv_timeout(delay) == Err(RecvTimeoutError::Timeout) {
                    callback();
                }
            });
        if let Err(err) = spawned {
            tracing::warn!(error = %err, "cannot start progress timer");
        }
        Timer::new(move || drop(cancel))
    }
}

#[derive(Default)]
struct MockState {
    now: Duration,
    next_id: u64,
    pending: Vec<(Duration, u64, Callback)>,
}

/// Manually advanced clock.
///
/// Due callbacks run synchronously inside [`MockClock::advance`], in due
/// order, each with the clock set to its due time.
#[derive(Clone, Default)]
pub struct MockClock {
    state: Arc<Mutex<MockState>>,
}

impl MockClock {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Time elapsed since the clock was created.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.state.lock().now
    }

    /// Number of scheduled, not yet fired timers.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.state.lock().pending.len()
    }

    /// Moves the clock forward by `by`, firing every timer that becomes due.
    pub fn advance(&self, by: Duration) {
        let target = self.state.lock().now + by;
        loop {
            let due = {
                let mut state = self.state.lock();
                let next = state
                    .pending
                    .iter()
                    .enumerate()
                    .filter(|(_, (at, _, _))| *at <= target)
                    .min_by_key(|(_, (at, id, _))| (*at, *id))
                    .map(|(index, _)| index);
                match next {
                    Some(index) => {
                        let (at, _, callback) = state.pending.remove(index);
                        state.now = at;
                        callback
                    }
                    None => {
                        state.now = target;
                        return;
                    }
                }
            };
            // Run without the lock, the callback may schedule again.
            due();
        }
    }
}

impl Clock for MockClock {
    fn after(&self, delay: Duration, callback: Callback) -> Timer {
        let id = {
            let mut state = self.state.lock();
            let id = state.next_id;
            state.next_id += 1;
            let at = state.now + delay;
            state.pending.push((at, id, callback));
            id
        };
        let state = Arc::downgrade(&self.state);
        Timer::new(move || {
            if let Some(state) = state.upgrade() {
                state.lock().pending.retain(|(_, pending, _)| *pending != id);
            }
        })
    }
}
