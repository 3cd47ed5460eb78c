//! Deterministic backend for unit tests.
//!
//! `BurstBackend` delivers a fixed number of updates synchronously from
//! inside `monitor()`, then stays silent. Every monitor and context it hands
//! out is counted in a shared [`BackendLog`].

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::event::Payload;
use crate::subscription::envelope::Structure;
use crate::subscription::traits::{
    BackendContext, BackendError, ContextBackend, EnvelopeCallback, FlatBackend, FlatCallback,
    Monitor,
};

#[derive(Debug, Default)]
pub(crate) struct BackendLog {
    monitors_opened: AtomicUsize,
    monitors_cancelled: AtomicUsize,
    contexts_opened: AtomicUsize,
    contexts_closed: AtomicUsize,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) struct LogSnapshot {
    pub monitors_opened: usize,
    pub monitors_cancelled: usize,
    pub contexts_opened: usize,
    pub contexts_closed: usize,
}

impl BackendLog {
    pub(crate) fn snapshot(&self) -> LogSnapshot {
        LogSnapshot {
            monitors_opened: self.monitors_opened.load(Ordering::SeqCst),
            monitors_cancelled: self.monitors_cancelled.load(Ordering::SeqCst),
            contexts_opened: self.contexts_opened.load(Ordering::SeqCst),
            contexts_closed: self.contexts_closed.load(Ordering::SeqCst),
        }
    }
}

#[derive(Debug, Clone)]
struct Behavior {
    events_per_pv: usize,
    payload: Payload,
    fail_on: Option<String>,
    fail_context_at: Option<usize>,
    fail_teardown: bool,
}

pub(crate) struct BurstBackend {
    behavior: Behavior,
    log: Arc<BackendLog>,
}

impl BurstBackend {
    pub(crate) fn new(events_per_pv: usize, payload: Payload) -> Self {
        Self {
            behavior: Behavior {
                events_per_pv,
                payload,
                fail_on: None,
                fail_context_at: None,
                fail_teardown: false,
            },
            log: Arc::new(BackendLog::default()),
        }
    }

    /// Refuses to monitor `pv`.
    pub(crate) fn failing_on(mut self, pv: &str) -> Self {
        self.behavior.fail_on = Some(pv.to_string());
        self
    }

    /// Refuses the `n`-th context creation (0-based).
    pub(crate) fn failing_context_at(mut self, n: usize) -> Self {
        self.behavior.fail_context_at = Some(n);
        self
    }

    /// Every cancel/close reports an error (after being counted).
    pub(crate) fn failing_teardown(mut self) -> Self {
        self.behavior.fail_teardown = true;
        self
    }

    pub(crate) fn log(&self) -> &BackendLog {
        &self.log
    }
}

impl Behavior {
    fn check_pv(&self, pv: &str) -> Result<(), BackendError> {
        match &self.fail_on {
            Some(bad) if bad == pv => Err(BackendError::new(format!("no such channel: {}", pv))),
            _ => Ok(()),
        }
    }

    fn teardown_result(&self) -> Result<(), BackendError> {
        if self.fail_teardown {
            Err(BackendError::new("teardown refused"))
        } else {
            Ok(())
        }
    }
}

struct CountingMonitor {
    log: Arc<BackendLog>,
    behavior: Behavior,
}

impl Monitor for CountingMonitor {
    fn cancel(&mut self) -> Result<(), BackendError> {
        self.log.monitors_cancelled.fetch_add(1, Ordering::SeqCst);
        self.behavior.teardown_result()
    }
}

impl FlatBackend for BurstBackend {
    fn monitor(&self, pv: &str, callback: FlatCallback) -> Result<Box<dyn Monitor>, BackendError> {
        self.behavior.check_pv(pv)?;
        for i in 0..self.behavior.events_per_pv {
            callback(self.behavior.payload.clone(), Some(i as f64));
        }
        self.log.monitors_opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(CountingMonitor {
            log: Arc::clone(&self.log),
            behavior: self.behavior.clone(),
        }))
    }
}

impl ContextBackend for BurstBackend {
    fn create_context(&self) -> Result<Box<dyn BackendContext>, BackendError> {
        let n = self.log.contexts_opened.fetch_add(1, Ordering::SeqCst);
        if self.behavior.fail_context_at == Some(n) {
            return Err(BackendError::new("context creation refused"));
        }
        Ok(Box::new(BurstContext {
            log: Arc::clone(&self.log),
            behavior: self.behavior.clone(),
        }))
    }
}

struct BurstContext {
    log: Arc<BackendLog>,
    behavior: Behavior,
}

impl BackendContext for BurstContext {
    fn monitor(
        &mut self,
        pv: &str,
        callback: EnvelopeCallback,
    ) -> Result<Box<dyn Monitor>, BackendError> {
        self.behavior.check_pv(pv)?;
        for _ in 0..self.behavior.events_per_pv {
            callback(Structure::normative(
                self.behavior.payload.clone(),
                100,
                500_000_000,
            ));
        }
        self.log.monitors_opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(CountingMonitor {
            log: Arc::clone(&self.log),
            behavior: self.behavior.clone(),
        }))
    }

    fn close(&mut self) -> Result<(), BackendError> {
        self.log.contexts_closed.fetch_add(1, Ordering::SeqCst);
        self.behavior.teardown_result()
    }
}
