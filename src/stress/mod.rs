//! Bounded-duration stress run.
//!
//! One subscription over every PV feeds a [`StressMonitor`] that counts
//! updates and bytes, records the interval between consecutive updates
//! (across all PVs) and burns a little CPU per payload. A
//! [`ResourceSampler`] runs next to it on its own thread and reads the
//! monitor's totals. When the run ends the subscription is closed, the
//! sampler is stopped and joined, and [`AggregateStats`] are computed.

use std::hint::black_box;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::Duration;

use tracing::{error, info, warn};

use crate::event::{Event, PvName};
use crate::metrics::{AggregateStats, EventObserver, fan_out};
use crate::sampler::{
    DEFAULT_SAMPLE_INTERVAL, HostProbe, ResourceSample, ResourceSampler, Totals, TotalsSource,
};
use crate::subscription::{self, BackendKind, BackendRegistry, SubscribeError};
use crate::util::{StopSignal, bytes_to_mb, now_epoch};

#[derive(Debug, Clone, PartialEq)]
pub struct StressConfig {
    pub duration: Duration,
    pub sample_interval: Duration,
    pub kind: BackendKind,
}

impl Default for StressConfig {
    fn default() -> Self {
        Self {
            duration: Duration::from_secs(60),
            sample_interval: DEFAULT_SAMPLE_INTERVAL,
            kind: BackendKind::Ca,
        }
    }
}

#[derive(Debug)]
struct StressState {
    updates: u64,
    bytes: u64,
    last_update: f64,
    intervals: Vec<f64>,
}

/// Run-wide counters shared by the delivery path and the sampler.
#[derive(Debug)]
pub struct StressMonitor {
    started_at: f64,
    state: Mutex<StressState>,
}

impl StressMonitor {
    pub fn new(started_at: f64) -> Self {
        Self {
            started_at,
            state: Mutex::new(StressState {
                updates: 0,
                bytes: 0,
                last_update: started_at,
                intervals: Vec::new(),
            }),
        }
    }

    /// Counts one update of `size_bytes` received at `now`.
    pub fn record(&self, now: f64, size_bytes: usize) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let interval = now - state.last_update;
        state.intervals.push(interval);
        state.last_update = now;
        state.updates += 1;
        state.bytes += size_bytes as u64;
    }

    /// Aggregates for a run ending at `now`.
    pub fn statistics(&self, now: f64) -> AggregateStats {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        AggregateStats::new(
            state.updates,
            bytes_to_mb(state.bytes),
            now - self.started_at,
            &state.intervals,
        )
    }
}

impl EventObserver for StressMonitor {
    fn observe(&self, event: &Event) {
        self.record(event.received_at, event.size_bytes);
        if event.size_bytes > 0 {
            black_box(event.payload.synthetic_load());
        }
    }
}

impl TotalsSource for StressMonitor {
    fn totals(&self) -> Totals {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        Totals {
            updates: state.updates,
            bytes: state.bytes,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct StressReport {
    pub stats: AggregateStats,
    pub samples: Vec<ResourceSample>,
    /// The stop signal ended the run before its duration.
    pub interrupted: bool,
}

pub struct StressController {
    registry: BackendRegistry,
    config: StressConfig,
}

impl StressController {
    pub fn new(registry: BackendRegistry, config: StressConfig) -> Self {
        Self { registry, config }
    }

    /// Runs for the configured duration or until `stop` fires.
    ///
    /// Configuration and backend errors are returned before the sampler starts.
    pub fn run<P: HostProbe>(
        &self,
        pvs: &[PvName],
        probe: P,
        stop: &StopSignal,
    ) -> Result<StressReport, SubscribeError> {
        let monitor = Arc::new(StressMonitor::new(now_epoch()));
        let observer: Arc<dyn EventObserver> = monitor.clone();
        let mut subscription =
            subscription::open(&self.registry, pvs, self.config.kind, fan_out(vec![observer]))?;

        info!(
            backend = %self.config.kind,
            pvs = pvs.len(),
            duration_secs = self.config.duration.as_secs_f64(),
            started = %chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
            "stress run started"
        );

        let sampler_stop = stop.child();
        let mut sampler = ResourceSampler::new(probe, self.config.sample_interval);
        let duration = self.config.duration;
        let totals: &StressMonitor = &monitor;

        let (interrupted, samples) = thread::scope(|scope| {
            let sampler_thread = thread::Builder::new()
                .name("resource-sampler".to_string())
                .spawn_scoped(scope, || sampler.run(totals, duration, &sampler_stop));

            let interrupted = stop.wait(duration);
            subscription.close();
            sampler_stop.trigger();

            let samples = match sampler_thread {
                Ok(handle) => handle.join().unwrap_or_else(|_| {
                    error!("resource sampler panicked");
                    Vec::new()
                }),
                Err(e) => {
                    warn!(error = %e, "failed to spawn resource sampler");
                    Vec::new()
                }
            };
            (interrupted, samples)
        });

        let stats = monitor.statistics(now_epoch());
        info!(
            updates = stats.total_updates,
            elapsed_secs = stats.elapsed_time,
            rate_hz = stats.avg_update_rate,
            throughput_mbps = stats.avg_throughput_mbps,
            samples = samples.len(),
            interrupted,
            "stress run finished"
        );
        Ok(StressReport {
            stats,
            samples,
            interrupted,
        })
    }
}
