//! Periodic host-load sampling correlated with event totals.
//!
//! [`ResourceSampler`] asks a [`HostProbe`] for CPU and memory load on a
//! fixed cadence and pairs each reading with the cumulative update count and
//! data volume read from a [`TotalsSource`]. A probe failure ends sampling
//! early; the samples collected so far are still returned.

pub mod mock;
pub mod parser;
pub mod probe;
pub mod traits;

use std::fmt;
use std::io;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, warn};

use crate::rows::Row;
use crate::util::{StopSignal, bytes_to_mb, now_epoch};

pub use parser::ParseError;
pub use probe::ProcProbe;
pub use traits::{FileSystem, RealFs};

/// Default sampling cadence.
pub const DEFAULT_SAMPLE_INTERVAL: Duration = Duration::from_millis(500);

/// Instantaneous host utilization.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct HostLoad {
    pub cpu_percent: f64,
    pub memory_percent: f64,
    pub memory_used_mb: f64,
}

/// Errors raised by a host probe.
#[derive(Debug)]
pub enum SampleError {
    Io(io::Error),
    Parse(ParseError),
}

impl fmt::Display for SampleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SampleError::Io(e) => write!(f, "I/O error: {}", e),
            SampleError::Parse(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for SampleError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SampleError::Io(e) => Some(e),
            SampleError::Parse(e) => Some(e),
        }
    }
}

impl From<io::Error> for SampleError {
    fn from(e: io::Error) -> Self {
        SampleError::Io(e)
    }
}

impl From<ParseError> for SampleError {
    fn from(e: ParseError) -> Self {
        SampleError::Parse(e)
    }
}

/// Source of instantaneous CPU/memory readings.
pub trait HostProbe: Send {
    fn sample(&mut self) -> Result<HostLoad, SampleError>;
}

/// Cumulative event totals of a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Totals {
    pub updates: u64,
    pub bytes: u64,
}

/// Shared counters read by the sampler.
///
/// Implementations return both values from one consistent snapshot.
pub trait TotalsSource: Sync {
    fn totals(&self) -> Totals;
}

/// One sampler reading.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResourceSample {
    pub timestamp: f64,
    pub cpu_percent: f64,
    pub memory_percent: f64,
    pub memory_used_mb: f64,
    pub update_count: u64,
    pub total_data_mb: f64,
}

impl Row for ResourceSample {
    const HEADER: &'static [&'static str] = &[
        "timestamp",
        "cpu_percent",
        "memory_percent",
        "memory_used_mb",
        "update_count",
        "total_data_mb",
    ];

    fn fields(&self) -> Vec<String> {
        vec![
            self.timestamp.to_string(),
            self.cpu_percent.to_string(),
            self.memory_percent.to_string(),
            self.memory_used_mb.to_string(),
            self.update_count.to_string(),
            self.total_data_mb.to_string(),
        ]
    }
}

pub struct ResourceSampler<P: HostProbe> {
    probe: P,
    interval: Duration,
}

impl<P: HostProbe> ResourceSampler<P> {
    pub fn new(probe: P, interval: Duration) -> Self {
        Self { probe, interval }
    }

    /// Samples every `interval` until `duration` has elapsed or `stop` fires.
    pub fn run(
        &mut self,
        totals: &dyn TotalsSource,
        duration: Duration,
        stop: &StopSignal,
    ) -> Vec<ResourceSample> {
        let deadline = Instant::now() + duration;
        let mut samples = Vec::new();

        while !stop.is_stopped() && Instant::now() < deadline {
            let load = match self.probe.sample() {
                Ok(load) => load,
                Err(e) => {
                    warn!(
                        error = %e,
                        samples = samples.len(),
                        "host sampling failed, stopping sampler"
                    );
                    break;
                }
            };
            let snapshot = totals.totals();
            samples.push(ResourceSample {
                timestamp: now_epoch(),
                cpu_percent: load.cpu_percent,
                memory_percent: load.memory_percent,
                memory_used_mb: load.memory_used_mb,
                update_count: snapshot.updates,
                total_data_mb: bytes_to_mb(snapshot.bytes),
            });

            let next = (Instant::now() + self.interval).min(deadline);
            if stop.wait_until(next) {
                break;
            }
        }

        debug!(samples = samples.len(), "sampler finished");
        samples
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sampler::mock::MockFs;
    use std::sync::atomic::{AtomicU64, Ordering};

    struct ScriptedProbe {
        remaining: usize,
    }

    impl HostProbe for ScriptedProbe {
        fn sample(&mut self) -> Result<HostLoad, SampleError> {
            if self.remaining == 0 {
                return Err(SampleError::Parse(ParseError::new("scripted failure")));
            }
            self.remaining -= 1;
            Ok(HostLoad {
                cpu_percent: 10.0,
                memory_percent: 20.0,
                memory_used_mb: 30.0,
            })
        }
    }

    struct Counter(AtomicU64);

    impl TotalsSource for Counter {
        fn totals(&self) -> Totals {
            let n = self.0.fetch_add(1, Ordering::SeqCst) + 1;
            Totals {
                updates: n,
                bytes: n * 1024 * 1024,
            }
        }
    }

    #[test]
    fn failure_ends_sampling_with_partial_output() {
        let probe = ScriptedProbe { remaining: 2 };
        let mut sampler = ResourceSampler::new(probe, Duration::from_millis(1));
        let totals = Counter(AtomicU64::new(0));
        let samples = sampler.run(&totals, Duration::from_secs(5), &StopSignal::new());
        assert_eq!(samples.len(), 2);
        assert_eq!(samples[1].update_count, 2);
        assert_eq!(samples[1].total_data_mb, 2.0);
    }

    #[test]
    fn stops_at_duration() {
        let mut sampler = ResourceSampler::new(
            ProcProbe::new(MockFs::typical_host()),
            Duration::from_millis(10),
        );
        let totals = Counter(AtomicU64::new(0));
        let start = Instant::now();
        let samples = sampler.run(&totals, Duration::from_millis(55), &StopSignal::new());
        assert!(start.elapsed() < Duration::from_secs(2));
        assert!(!samples.is_empty());
        assert!(samples.len() <= 7);
        assert!(samples.iter().all(|s| s.memory_percent == 50.0));
    }

    #[test]
    fn stop_signal_ends_sampling() {
        let stop = StopSignal::new();
        stop.trigger();
        let probe = ScriptedProbe { remaining: 100 };
        let mut sampler = ResourceSampler::new(probe, Duration::from_millis(1));
        let samples = sampler.run(&Counter(AtomicU64::new(0)), Duration::from_secs(5), &stop);
        assert!(samples.is_empty());
    }

    #[test]
    fn sample_row_header_matches_fields() {
        let sample = ResourceSample {
            timestamp: 1.0,
            cpu_percent: 2.0,
            memory_percent: 3.0,
            memory_used_mb: 4.0,
            update_count: 5,
            total_data_mb: 6.0,
        };
        assert_eq!(sample.fields().len(), ResourceSample::HEADER.len());
        assert_eq!(sample.fields()[4], "5");
    }
}
