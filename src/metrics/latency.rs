//! Inter-arrival interval per PV, measured by local receipt time.

use serde::Serialize;

use super::stats::{IntervalStats, RunningStats};
use super::{EventObserver, PerPv};
use crate::event::{Event, PvName};
use crate::rows::Row;

/// One inter-arrival sample.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LatencyRow {
    pub pv: PvName,
    pub interval_sec: f64,
}

impl Row for LatencyRow {
    const HEADER: &'static [&'static str] = &["pv", "frame_interval_sec"];

    fn fields(&self) -> Vec<String> {
        vec![self.pv.to_string(), self.interval_sec.to_string()]
    }
}

#[derive(Debug, Default)]
struct LatencyWindow {
    last_seen: Option<f64>,
    /// Intervals not yet handed out by `drain`.
    pending: Vec<f64>,
    totals: RunningStats,
}

impl LatencyWindow {
    fn record(&mut self, now: f64) -> Option<f64> {
        let interval = self.last_seen.map(|last| now - last);
        if let Some(interval) = interval {
            self.pending.push(interval);
            self.totals.push(interval);
        }
        self.last_seen = Some(now);
        interval
    }
}

pub struct LatencyTracker {
    windows: PerPv<LatencyWindow>,
}

impl LatencyTracker {
    pub fn new(pvs: &[PvName]) -> Self {
        Self {
            windows: PerPv::new(pvs, LatencyWindow::default),
        }
    }

    /// Records a delivery of `pv` at `now` and returns the interval since the
    /// previous one. The first delivery of a PV yields nothing.
    pub fn record(&self, pv: &str, now: f64) -> Option<f64> {
        self.windows.with(pv, |w| w.record(now)).flatten()
    }

    /// Takes the rows recorded since the previous drain, grouped by PV in
    /// configuration order.
    pub fn drain(&self) -> Vec<LatencyRow> {
        let mut rows = Vec::new();
        self.windows.for_each(|pv, w| {
            rows.extend(std::mem::take(&mut w.pending).into_iter().map(|interval_sec| {
                LatencyRow {
                    pv: pv.clone(),
                    interval_sec,
                }
            }));
        });
        rows
    }

    #[cfg(test)]
    fn pending(&self, pv: &str) -> usize {
        self.windows.with(pv, |w| w.pending.len()).unwrap_or(0)
    }

    /// Interval statistics per PV over the whole run, drained rows included.
    pub fn summary(&self) -> Vec<(PvName, IntervalStats)> {
        let mut out = Vec::new();
        self.windows.for_each(|pv, w| out.push((pv.clone(), w.totals.stats())));
        out
    }
}

impl EventObserver for LatencyTracker {
    fn observe(&self, event: &Event) {
        self.record(&event.pv, event.received_at);
    }
}
