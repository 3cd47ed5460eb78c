//! Missing-frame estimate from inter-arrival gaps.
//!
//! This is a heuristic: a gap longer than twice the assumed cadence is read as
//! `floor(gap / cadence) - 1` lost frames. The cadence is configured, not
//! measured, so a source that pauses or reconnects is indistinguishable from
//! one that drops frames.

use std::time::Duration;

use serde::Serialize;

use super::{EventObserver, PerPv};
use crate::event::{Event, PvName};
use crate::rows::Row;

/// Default assumed cadence (20 updates per second).
pub const DEFAULT_ASSUMED_INTERVAL: Duration = Duration::from_millis(50);
/// Default reporting cadence.
pub const DEFAULT_REPORT_INTERVAL: Duration = Duration::from_secs(10);

/// Cumulative loss snapshot for one PV.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LossRow {
    pub pv: PvName,
    pub total_frames: u64,
    pub lost_frames: u64,
    pub loss_rate_percent: f64,
}

impl Row for LossRow {
    const HEADER: &'static [&'static str] =
        &["pv", "total_frames", "lost_frames", "loss_rate_percent"];

    fn fields(&self) -> Vec<String> {
        vec![
            self.pv.to_string(),
            self.total_frames.to_string(),
            self.lost_frames.to_string(),
            self.loss_rate_percent.to_string(),
        ]
    }
}

/// Frames inferred missing in a gap of `dt` seconds at cadence `avg`.
pub fn inferred_gap_loss(dt: f64, avg: f64) -> u64 {
    if avg <= 0.0 || dt <= 2.0 * avg {
        return 0;
    }
    ((dt / avg).floor() - 1.0).max(0.0) as u64
}

#[derive(Debug, Default)]
struct LossWindow {
    frames: u64,
    lost: u64,
    last_seen: Option<f64>,
}

pub struct LossEstimator {
    assumed_interval: f64,
    windows: PerPv<LossWindow>,
}

impl LossEstimator {
    pub fn new(pvs: &[PvName], assumed_interval: Duration) -> Self {
        Self {
            assumed_interval: assumed_interval.as_secs_f64(),
            windows: PerPv::new(pvs, LossWindow::default),
        }
    }

    pub fn assumed_interval(&self) -> f64 {
        self.assumed_interval
    }

    /// Counts a frame of `pv` received at `now`.
    pub fn record(&self, pv: &str, now: f64) {
        let avg = self.assumed_interval;
        self.windows.with(pv, |w| {
            w.frames += 1;
            if let Some(last) = w.last_seen {
                w.lost += inferred_gap_loss(now - last, avg);
            }
            w.last_seen = Some(now);
        });
    }

    /// Cumulative totals for every PV in configuration order.
    pub fn report(&self) -> Vec<LossRow> {
        let mut rows = Vec::new();
        self.windows.for_each(|pv, w| {
            let loss_rate_percent = if w.frames > 0 {
                w.lost as f64 / w.frames as f64 * 100.0
            } else {
                0.0
            };
            rows.push(LossRow {
                pv: pv.clone(),
                total_frames: w.frames,
                lost_frames: w.lost,
                loss_rate_percent,
            });
        });
        rows
    }
}

impl EventObserver for LossEstimator {
    fn observe(&self, event: &Event) {
        self.record(&event.pv, event.received_at);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::pv_names;

    #[test]
    fn gap_threshold() {
        assert_eq!(inferred_gap_loss(0.1, 0.05), 0);
        assert_eq!(inferred_gap_loss(2.5, 0.5), 4);
        assert_eq!(inferred_gap_loss(3.0, 0.5), 5);
        assert_eq!(inferred_gap_loss(1.0, 0.0), 0);
    }

    #[test]
    fn regular_cadence_reports_no_loss() {
        let est = LossEstimator::new(&pv_names(&["A"]), Duration::from_millis(500));
        for i in 0..10 {
            est.record("A", f64::from(i));
        }
        let rows = est.report();
        assert_eq!(rows[0].total_frames, 10);
        assert_eq!(rows[0].lost_frames, 0);
        assert_eq!(rows[0].loss_rate_percent, 0.0);
    }

    #[test]
    fn five_interval_gap_adds_four() {
        let est = LossEstimator::new(&pv_names(&["A"]), Duration::from_millis(500));
        est.record("A", 10.0);
        est.record("A", 12.5);
        let row = &est.report()[0];
        assert_eq!(row.total_frames, 2);
        assert_eq!(row.lost_frames, 4);
        assert_eq!(row.loss_rate_percent, 200.0);
    }

    #[test]
    fn report_is_cumulative_and_covers_silent_pvs() {
        let est = LossEstimator::new(&pv_names(&["A", "B"]), DEFAULT_ASSUMED_INTERVAL);
        est.record("A", 0.0);
        assert_eq!(est.report()[0].total_frames, 1);
        est.record("A", 0.05);
        let rows = est.report();
        assert_eq!(rows[0].total_frames, 2);
        assert_eq!(rows[1].total_frames, 0);
        assert_eq!(rows[1].loss_rate_percent, 0.0);
    }
}
