//! Interruptible waits shared between the run loop and its workers.
//!
//! Every blocking wait in pvbench (run duration, reporting cadence, sampler
//! interval, simulated frame period) goes through a [`StopSignal`] so a single
//! Ctrl-C wakes all of them at once.

use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::{Duration, Instant};

#[derive(Debug, Default)]
struct Shared {
    stopped: Mutex<bool>,
    cond: Condvar,
    children: Mutex<Vec<Arc<Shared>>>,
}

impl Shared {
    fn is_stopped(&self) -> bool {
        *self.stopped.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn trigger(&self) {
        {
            let mut stopped = self.stopped.lock().unwrap_or_else(PoisonError::into_inner);
            *stopped = true;
            self.cond.notify_all();
        }
        let children = self.children.lock().unwrap_or_else(PoisonError::into_inner);
        for child in children.iter() {
            child.trigger();
        }
    }
}

/// Cloneable stop flag with a condition variable behind it.
///
/// Clones share the same flag. A [`child`](StopSignal::child) signal stops when
/// its parent stops, but can also be triggered on its own without affecting
/// the parent.
#[derive(Debug, Clone, Default)]
pub struct StopSignal {
    inner: Arc<Shared>,
}

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the flag and wakes every waiter, including child signals.
    pub fn trigger(&self) {
        self.inner.trigger();
    }

    pub fn is_stopped(&self) -> bool {
        self.inner.is_stopped()
    }

    /// Creates a signal that is triggered together with this one.
    pub fn child(&self) -> StopSignal {
        let child = Arc::new(Shared::default());
        let mut children = self
            .inner
            .children
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if self.inner.is_stopped() {
            *child.stopped.lock().unwrap_or_else(PoisonError::into_inner) = true;
        }
        children.push(Arc::clone(&child));
        StopSignal { inner: child }
    }

    /// Blocks for up to `timeout`.
    ///
    /// Returns `true` if the signal was triggered (before or during the wait),
    /// `false` if the full timeout elapsed.
    pub fn wait(&self, timeout: Duration) -> bool {
        let guard = self
            .inner
            .stopped
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let (guard, _) = self
            .inner
            .cond
            .wait_timeout_while(guard, timeout, |stopped| !*stopped)
            .unwrap_or_else(PoisonError::into_inner);
        *guard
    }

    /// Blocks until `deadline`; same return convention as [`wait`](Self::wait).
    pub fn wait_until(&self, deadline: Instant) -> bool {
        self.wait(deadline.saturating_duration_since(Instant::now()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn wait_times_out_when_not_triggered() {
        let stop = StopSignal::new();
        let start = Instant::now();
        assert!(!stop.wait(Duration::from_millis(20)));
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn trigger_wakes_waiter_early() {
        let stop = StopSignal::new();
        let remote = stop.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(10));
            remote.trigger();
        });

        let start = Instant::now();
        assert!(stop.wait(Duration::from_secs(30)));
        assert!(start.elapsed() < Duration::from_secs(10));
        handle.join().unwrap();
    }

    #[test]
    fn wait_after_trigger_returns_immediately() {
        let stop = StopSignal::new();
        stop.trigger();
        assert!(stop.is_stopped());
        assert!(stop.wait(Duration::from_secs(30)));
    }

    #[test]
    fn parent_trigger_reaches_child() {
        let parent = StopSignal::new();
        let child = parent.child();
        assert!(!child.is_stopped());
        parent.trigger();
        assert!(child.is_stopped());
    }

    #[test]
    fn child_trigger_leaves_parent_running() {
        let parent = StopSignal::new();
        let child = parent.child();
        child.trigger();
        assert!(child.is_stopped());
        assert!(!parent.is_stopped());
    }

    #[test]
    fn child_of_stopped_parent_starts_stopped() {
        let parent = StopSignal::new();
        parent.trigger();
        assert!(parent.child().is_stopped());
    }
}
