//! Single-metric monitoring runs.
//!
//! Each runner opens one subscription feeding one metric, then wakes on a
//! fixed cadence to hand rows to a [`RowSink`] until the optional duration
//! elapses or the stop signal fires. The sink is created by a factory that
//! only runs once the subscription is open, so a run that cannot start
//! leaves earlier results alone.
//!
//!
//! - latency: new interval rows every tick, remaining rows at the end
//! - throughput: one row per PV per tumbling window; a partial last window
//!   is not reported
//! - loss: a cumulative snapshot every tick and once more at the end

use std::fmt;
use std::io;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, info};

use crate::event::PvName;
use crate::metrics::{
    EventObserver, LatencyRow, LatencyTracker, LossEstimator, LossRow, ThroughputMeter,
    ThroughputRow, fan_out,
};
use crate::rows::RowSink;
use crate::subscription::{self, BackendKind, BackendRegistry, SubscribeError};
use crate::util::{StopSignal, now_epoch};

#[derive(Debug)]
pub enum ScenarioError {
    Subscribe(SubscribeError),
    Sink(io::Error),
}

impl fmt::Display for ScenarioError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScenarioError::Subscribe(e) => write!(f, "{}", e),
            ScenarioError::Sink(e) => write!(f, "failed to write results: {}", e),
        }
    }
}

impl std::error::Error for ScenarioError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ScenarioError::Subscribe(e) => Some(e),
            ScenarioError::Sink(e) => Some(e),
        }
    }
}

impl From<SubscribeError> for ScenarioError {
    fn from(e: SubscribeError) -> Self {
        ScenarioError::Subscribe(e)
    }
}

impl From<io::Error> for ScenarioError {
    fn from(e: io::Error) -> Self {
        ScenarioError::Sink(e)
    }
}

/// How long and how often a scenario reports.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RunOptions {
    pub kind: BackendKind,
    /// Reporting cadence; must be non-zero.
    pub cadence: Duration,
    /// `None` runs until the stop signal fires.
    pub duration: Option<Duration>,
}

/// What a finished scenario produced.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ScenarioOutcome {
    pub ticks: usize,
    pub rows: usize,
    pub interrupted: bool,
}

/// Inter-arrival intervals per PV.
pub fn run_latency<S: RowSink<LatencyRow>>(
    registry: &BackendRegistry,
    pvs: &[PvName],
    options: RunOptions,
    stop: &StopSignal,
    make_sink: impl FnOnce() -> io::Result<S>,
) -> Result<(ScenarioOutcome, S), ScenarioError> {
    validate(&options)?;
    let tracker = Arc::new(LatencyTracker::new(pvs));
    let observer: Arc<dyn EventObserver> = tracker.clone();
    let mut sub = subscription::open(registry, pvs, options.kind, fan_out(vec![observer]))?;
    let mut sink = make_sink()?;
    info!(backend = %options.kind, pvs = pvs.len(), "latency monitor started");

    let mut outcome = drive(&options, stop, || {
        let rows = tracker.drain();
        sink.emit_all(&rows)?;
        sink.flush()?;
        Ok(rows.len())
    })?;
    sub.close();

    let rest = tracker.drain();
    sink.emit_all(&rest)?;
    sink.flush()?;
    outcome.rows += rest.len();
    for (pv, stats) in tracker.summary() {
        info!(
            pv = %pv,
            intervals = stats.count,
            mean_sec = stats.mean,
            max_sec = stats.max,
            "latency summary"
        );
    }
    info!(rows = outcome.rows, "latency monitor stopped");
    Ok((outcome, sink))
}

/// Byte rate per PV over tumbling windows of `options.cadence`.
pub fn run_throughput<S: RowSink<ThroughputRow>>(
    registry: &BackendRegistry,
    pvs: &[PvName],
    options: RunOptions,
    stop: &StopSignal,
    make_sink: impl FnOnce() -> io::Result<S>,
) -> Result<(ScenarioOutcome, S), ScenarioError> {
    validate(&options)?;
    let meter = Arc::new(ThroughputMeter::new(pvs, now_epoch()));
    let observer: Arc<dyn EventObserver> = meter.clone();
    let mut sub = subscription::open(registry, pvs, options.kind, fan_out(vec![observer]))?;
    let mut sink = make_sink()?;
    info!(
        backend = %options.kind,
        pvs = pvs.len(),
        window_secs = options.cadence.as_secs_f64(),
        "throughput monitor started"
    );

    let outcome = drive(&options, stop, || {
        let rows = meter.roll(now_epoch());
        sink.emit_all(&rows)?;
        sink.flush()?;
        Ok(rows.len())
    })?;
    sub.close();
    info!(rows = outcome.rows, "throughput monitor stopped");
    Ok((outcome, sink))
}

/// Gap-based loss estimate, reported as cumulative snapshots.
pub fn run_loss<S: RowSink<LossRow>>(
    registry: &BackendRegistry,
    pvs: &[PvName],
    assumed_interval: Duration,
    options: RunOptions,
    stop: &StopSignal,
    make_sink: impl FnOnce() -> io::Result<S>,
) -> Result<(ScenarioOutcome, S), ScenarioError> {
    validate(&options)?;
    let estimator = Arc::new(LossEstimator::new(pvs, assumed_interval));
    let observer: Arc<dyn EventObserver> = estimator.clone();
    let mut sub = subscription::open(registry, pvs, options.kind, fan_out(vec![observer]))?;
    let mut sink = make_sink()?;
    info!(
        backend = %options.kind,
        pvs = pvs.len(),
        assumed_interval_secs = estimator.assumed_interval(),
        "packet loss monitor started"
    );

    let mut outcome = drive(&options, stop, || {
        let rows = estimator.report();
        sink.emit_all(&rows)?;
        sink.flush()?;
        Ok(rows.len())
    })?;
    sub.close();

    let last = estimator.report();
    sink.emit_all(&last)?;
    sink.flush()?;
    outcome.rows += last.len();
    info!(rows = outcome.rows, "packet loss monitor stopped");
    Ok((outcome, sink))
}

fn validate(options: &RunOptions) -> Result<(), ScenarioError> {
    if options.cadence.is_zero() {
        return Err(SubscribeError::Configuration(
            "reporting interval must be positive".to_string(),
        )
        .into());
    }
    Ok(())
}

/// Calls `on_tick` every `options.cadence` until the deadline or `stop`.
fn drive(
    options: &RunOptions,
    stop: &StopSignal,
    mut on_tick: impl FnMut() -> io::Result<usize>,
) -> Result<ScenarioOutcome, ScenarioError> {
    let start = Instant::now();
    let deadline = options.duration.map(|d| start + d);
    let mut next_tick = start + options.cadence;
    let mut outcome = ScenarioOutcome::default();

    loop {
        let wake = deadline.map_or(next_tick, |d| next_tick.min(d));
        if stop.wait_until(wake) {
            outcome.interrupted = true;
            break;
        }
        let now = Instant::now();
        if now >= next_tick {
            outcome.rows += on_tick()?;
            outcome.ticks += 1;
            next_tick += options.cadence;
            debug!(tick = outcome.ticks, rows = outcome.rows, "report written");
        }
        if deadline.is_some_and(|d| now >= d) {
            break;
        }
    }
    Ok(outcome)
}
