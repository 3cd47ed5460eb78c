//! Interval statistics and end-of-run aggregates.

use serde::Serialize;

use crate::rows::Row;

/// Mean, extremes and population standard deviation of an interval set.
///
/// Every field is 0 for an empty set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct IntervalStats {
    pub count: usize,
    pub mean: f64,
    pub min: f64,
    pub max: f64,
    pub stddev: f64,
}

impl IntervalStats {
    pub fn from_samples(samples: &[f64]) -> Self {
        if samples.is_empty() {
            return Self::default();
        }
        let min = samples.iter().copied().fold(f64::INFINITY, f64::min);
        let max = samples.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        Self {
            count: samples.len(),
            mean: mean(samples),
            min,
            max,
            stddev: population_stddev(samples),
        }
    }
}

fn mean(samples: &[f64]) -> f64 {
    if samples.is_empty() {
        0.0
    } else {
        samples.iter().sum::<f64>() / samples.len() as f64
    }
}

/// `sqrt(mean((x - mean)^2))`; 0 for fewer than two samples.
pub fn population_stddev(samples: &[f64]) -> f64 {
    if samples.len() < 2 {
        return 0.0;
    }
    let m = mean(samples);
    let variance = samples.iter().map(|x| (x - m).powi(2)).sum::<f64>() / samples.len() as f64;
    variance.sqrt()
}

/// Interval statistics accumulated without keeping the samples.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RunningStats {
    count: usize,
    sum: f64,
    sum_sq: f64,
    min: f64,
    max: f64,
}

impl RunningStats {
    pub fn push(&mut self, x: f64) {
        if self.count == 0 {
            self.min = x;
            self.max = x;
        } else {
            self.min = self.min.min(x);
            self.max = self.max.max(x);
        }
        self.count += 1;
        self.sum += x;
        self.sum_sq += x * x;
    }

    pub fn stats(&self) -> IntervalStats {
        if self.count == 0 {
            return IntervalStats::default();
        }
        let n = self.count as f64;
        let mean = self.sum / n;
        let stddev = if self.count < 2 {
            0.0
        } else {
            (self.sum_sq / n - mean * mean).max(0.0).sqrt()
        };
        IntervalStats {
            count: self.count,
            mean,
            min: self.min,
            max: self.max,
            stddev,
        }
    }
}

/// Final statistics of a stress run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct AggregateStats {
    pub total_updates: u64,
    pub elapsed_time: f64,
    pub avg_update_rate: f64,
    pub total_data_mb: f64,
    pub avg_throughput_mbps: f64,
    pub intervals: IntervalStats,
}

impl AggregateStats {
    /// Derives rates from raw totals; rates are 0 when `elapsed_time <= 0`.
    pub fn new(
        total_updates: u64,
        total_data_mb: f64,
        elapsed_time: f64,
        intervals: &[f64],
    ) -> Self {
        let (avg_update_rate, avg_throughput_mbps) = if elapsed_time > 0.0 {
            (
                total_updates as f64 / elapsed_time,
                total_data_mb / elapsed_time,
            )
        } else {
            (0.0, 0.0)
        };
        Self {
            total_updates,
            elapsed_time,
            avg_update_rate,
            total_data_mb,
            avg_throughput_mbps,
            intervals: IntervalStats::from_samples(intervals),
        }
    }

    /// `(metric, value)` rows in their fixed reporting order.
    pub fn rows(&self) -> Vec<SummaryRow> {
        vec![
            SummaryRow::new("total_updates", self.total_updates as f64),
            SummaryRow::new("elapsed_time", self.elapsed_time),
            SummaryRow::new("avg_update_rate", self.avg_update_rate),
            SummaryRow::new("total_data_mb", self.total_data_mb),
            SummaryRow::new("avg_throughput_mbps", self.avg_throughput_mbps),
            SummaryRow::new("avg_interval", self.intervals.mean),
            SummaryRow::new("max_interval", self.intervals.max),
            SummaryRow::new("min_interval", self.intervals.min),
            SummaryRow::new("interval_stddev", self.intervals.stddev),
        ]
    }
}

/// One `(metric, value)` row of a stress summary.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SummaryRow {
    pub metric: &'static str,
    pub value: f64,
}

impl SummaryRow {
    pub fn new(metric: &'static str, value: f64) -> Self {
        Self { metric, value }
    }
}

impl Row for SummaryRow {
    const HEADER: &'static [&'static str] = &["metric", "value"];

    fn fields(&self) -> Vec<String> {
        vec![self.metric.to_string(), self.value.to_string()]
    }
}
