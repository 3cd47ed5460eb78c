//! Byte rate per PV over non-overlapping windows.

use std::time::Duration;

use serde::Serialize;
use tracing::trace;

use super::{EventObserver, PerPv};
use crate::event::{Event, PvName};
use crate::rows::Row;
use crate::util::BYTES_PER_MB;

/// Default tumbling window length.
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ThroughputRow {
    pub pv: PvName,
    pub bytes_per_sec: f64,
    pub mb_per_sec: f64,
}

impl Row for ThroughputRow {
    const HEADER: &'static [&'static str] = &["pv", "bytes_per_sec", "mb_per_sec"];

    fn fields(&self) -> Vec<String> {
        vec![
            self.pv.to_string(),
            self.bytes_per_sec.to_string(),
            self.mb_per_sec.to_string(),
        ]
    }
}

#[derive(Debug)]
struct ThroughputWindow {
    bytes: u64,
    events: u64,
    window_start: f64,
}

impl ThroughputWindow {
    fn new(window_start: f64) -> Self {
        Self {
            bytes: 0,
            events: 0,
            window_start,
        }
    }

    fn reset(&mut self, now: f64) {
        self.bytes = 0;
        self.events = 0;
        self.window_start = now;
    }
}

pub struct ThroughputMeter {
    windows: PerPv<ThroughputWindow>,
}

impl ThroughputMeter {
    /// All windows start at `started_at` (epoch seconds).
    pub fn new(pvs: &[PvName], started_at: f64) -> Self {
        Self {
            windows: PerPv::new(pvs, || ThroughputWindow::new(started_at)),
        }
    }

    /// Accounts `bytes` for `pv` in the current window.
    pub fn add(&self, pv: &str, bytes: u64) {
        self.windows.with(pv, |w| {
            w.bytes += bytes;
            w.events += 1;
        });
    }

    /// Closes the current window of every PV at `now`.
    ///
    /// Emits one row per PV, including PVs without traffic. A PV whose window
    /// has not advanced (`now <= window_start`) is skipped and keeps its bytes.
    pub fn roll(&self, now: f64) -> Vec<ThroughputRow> {
        let mut rows = Vec::new();
        self.windows.for_each(|pv, w| {
            let elapsed = now - w.window_start;
            if elapsed <= 0.0 {
                return;
            }
            let bytes_per_sec = w.bytes as f64 / elapsed;
            trace!(pv = %pv, events = w.events, bytes = w.bytes, elapsed, "window closed");
            rows.push(ThroughputRow {
                pv: pv.clone(),
                bytes_per_sec,
                mb_per_sec: bytes_per_sec / BYTES_PER_MB,
            });
            w.reset(now);
        });
        rows
    }
}

impl EventObserver for ThroughputMeter {
    /// Payloads without a byte length count as zero bytes.
    fn observe(&self, event: &Event) {
        let bytes = event.payload.nbytes().unwrap_or(0) as u64;
        self.add(&event.pv, bytes);
    }
}
