//! Simulated periodic source implementing both backend kinds.
//!
//! Each monitor runs its own thread producing camera-like `i16` frames at a
//! fixed rate, optionally skipping every n-th frame to mimic loss.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, trace};

use crate::event::Payload;
use crate::subscription::envelope::Structure;
use crate::subscription::traits::{
    BackendContext, BackendError, ContextBackend, EnvelopeCallback, FlatBackend, FlatCallback,
    Monitor,
};
use crate::util::{StopSignal, now_epoch};

/// Frame generation parameters.
#[derive(Debug, Clone)]
pub struct SimConfig {
    /// Frames per second per PV.
    pub rate_hz: f64,
    /// Elements per frame (`i16` each).
    pub elements: usize,
    /// Skip every n-th frame (`None` = deliver all).
    pub drop_every: Option<u64>,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            rate_hz: 20.0,
            elements: 64 * 64,
            drop_every: None,
        }
    }
}

impl SimConfig {
    fn period(&self) -> Duration {
        if self.rate_hz > 0.0 && self.rate_hz.is_finite() {
            Duration::from_secs_f64(1.0 / self.rate_hz)
        } else {
            Duration::from_secs(1)
        }
    }

    fn frame(&self, seq: u64) -> Payload {
        Payload::I16Array(vec![(seq % 4096) as i16; self.elements])
    }

    fn skips(&self, seq: u64) -> bool {
        self.drop_every.is_some_and(|n| n > 0 && seq % n == 0)
    }
}

/// In-process backend usable as both `ca` and `pva`.
#[derive(Debug, Clone, Default)]
pub struct SimulatedBackend {
    config: Arc<SimConfig>,
}

impl SimulatedBackend {
    pub fn new(config: SimConfig) -> Self {
        Self {
            config: Arc::new(config),
        }
    }
}

impl FlatBackend for SimulatedBackend {
    fn monitor(&self, pv: &str, callback: FlatCallback) -> Result<Box<dyn Monitor>, BackendError> {
        let monitor = SimMonitor::start(pv, Arc::clone(&self.config), move |frame: Payload, ts: f64| {
            callback(frame, Some(ts));
        })?;
        Ok(Box::new(monitor))
    }
}

impl ContextBackend for SimulatedBackend {
    fn create_context(&self) -> Result<Box<dyn BackendContext>, BackendError> {
        Ok(Box::new(SimContext {
            config: Arc::clone(&self.config),
            closed: false,
        }))
    }
}

struct SimContext {
    config: Arc<SimConfig>,
    closed: bool,
}

impl BackendContext for SimContext {
    fn monitor(
        &mut self,
        pv: &str,
        callback: EnvelopeCallback,
    ) -> Result<Box<dyn Monitor>, BackendError> {
        if self.closed {
            return Err(BackendError::new("context is closed"));
        }
        let monitor = SimMonitor::start(pv, Arc::clone(&self.config), move |frame: Payload, ts: f64| {
            let seconds = ts.floor();
            let nanos = ((ts - seconds) * 1_000_000_000.0) as i64;
            callback(Structure::normative(frame, seconds as i64, nanos));
        })?;
        Ok(Box::new(monitor))
    }

    fn close(&mut self) -> Result<(), BackendError> {
        self.closed = true;
        Ok(())
    }
}

struct SimMonitor {
    stop: StopSignal,
    thread: Option<JoinHandle<u64>>,
}

impl SimMonitor {
    fn start<D>(pv: &str, config: Arc<SimConfig>, deliver: D) -> Result<Self, BackendError>
    where
        D: Fn(Payload, f64) + Send + 'static,
    {
        let stop = StopSignal::new();
        let thread_stop = stop.clone();
        let period = config.period();
        let thread = thread::Builder::new()
            .name(format!("sim-{}", pv))
            .spawn(move || {
                let mut seq = 0u64;
                let mut next = Instant::now();
                loop {
                    seq += 1;
                    if !config.skips(seq) {
                        deliver(config.frame(seq), now_epoch());
                    } else {
                        trace!(seq, "simulated frame skipped");
                    }
                    next += period;
                    if thread_stop.wait_until(next) {
                        break;
                    }
                }
                seq
            })
            .map_err(|e| BackendError::new(format!("failed to spawn source thread: {}", e)))?;
        debug!(pv, period_ms = period.as_millis() as u64, "simulated monitor started");
        Ok(Self {
            stop,
            thread: Some(thread),
        })
    }
}

impl Monitor for SimMonitor {
    fn cancel(&mut self) -> Result<(), BackendError> {
        self.stop.trigger();
        match self.thread.take() {
            Some(handle) => handle
                .join()
                .map(|frames| debug!(frames, "simulated monitor stopped"))
                .map_err(|_| BackendError::new("source thread panicked")),
            None => Ok(()),
        }
    }
}

impl Drop for SimMonitor {
    fn drop(&mut self) {
        self.stop.trigger();
    }
}
