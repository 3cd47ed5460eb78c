//! Per-PV metric windows fed by normalized events.
//!
//! Each metric keeps one window per PV behind its own mutex ([`PerPv`]), so
//! deliveries for different PVs never contend while deliveries for the same
//! PV are serialized even when a backend calls back from several threads.
//!
//! - [`LatencyTracker`] - inter-arrival intervals by local receipt time
//! - [`ThroughputMeter`] - byte rate over tumbling windows
//! - [`LossEstimator`] - gap-based missing-frame heuristic
//! - [`stats`] - interval statistics and run aggregates

pub mod latency;
pub mod loss;
pub mod stats;
pub mod throughput;

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use crate::event::{Event, PvName};
use crate::subscription::EventHandler;

pub use latency::{LatencyRow, LatencyTracker};
pub use loss::{LossEstimator, LossRow};
pub use stats::{AggregateStats, IntervalStats, RunningStats, SummaryRow};
pub use throughput::{ThroughputMeter, ThroughputRow};

/// Anything that consumes the uniform event stream.
pub trait EventObserver: Send + Sync {
    fn observe(&self, event: &Event);
}

/// Builds one subscription callback that hands every event to all observers.
pub fn fan_out(observers: Vec<Arc<dyn EventObserver>>) -> EventHandler {
    Arc::new(move |event: Event| {
        for observer in &observers {
            observer.observe(&event);
        }
    })
}

/// One mutex-guarded window per PV, iterated in configuration order.
///
/// The PV set is fixed at construction; lookups for unknown PVs return `None`.
#[derive(Debug)]
pub struct PerPv<W> {
    order: Vec<PvName>,
    windows: HashMap<PvName, Mutex<W>>,
}

impl<W> PerPv<W> {
    /// Creates a window per distinct PV in `pvs`.
    pub fn new(pvs: &[PvName], mut init: impl FnMut() -> W) -> Self {
        let mut order = Vec::with_capacity(pvs.len());
        let mut windows = HashMap::with_capacity(pvs.len());
        for pv in pvs {
            if !windows.contains_key(pv) {
                windows.insert(pv.clone(), Mutex::new(init()));
                order.push(pv.clone());
            }
        }
        Self { order, windows }
    }

    /// Runs `f` with the window of `pv` locked.
    pub fn with<R>(&self, pv: &str, f: impl FnOnce(&mut W) -> R) -> Option<R> {
        let window = self.windows.get(pv)?;
        let mut guard = window.lock().unwrap_or_else(PoisonError::into_inner);
        Some(f(&mut guard))
    }

    /// Visits every window in configuration order, locking one at a time.
    pub fn for_each(&self, mut f: impl FnMut(&PvName, &mut W)) {
        for pv in &self.order {
            if let Some(window) = self.windows.get(pv) {
                let mut guard = window.lock().unwrap_or_else(PoisonError::into_inner);
                f(pv, &mut guard);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{Payload, pv_names};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    struct Counter(AtomicUsize);

    impl EventObserver for Counter {
        fn observe(&self, _event: &Event) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn per_pv_deduplicates_and_keeps_order() {
        let map = PerPv::new(&pv_names(&["b", "a", "b"]), || 0u32);
        let mut names = Vec::new();
        map.for_each(|pv, _| names.push(pv.to_string()));
        assert_eq!(names, vec!["b", "a"]);
    }

    #[test]
    fn per_pv_ignores_unknown_pv() {
        let map = PerPv::new(&pv_names(&["a"]), || 0u32);
        assert_eq!(map.with("zzz", |w| *w += 1), None);
        assert_eq!(map.with("a", |w| *w), Some(0));
    }

    #[test]
    fn same_pv_updates_are_serialized() {
        let map = Arc::new(PerPv::new(&pv_names(&["a", "b"]), || 0u64));
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let map = Arc::clone(&map);
                thread::spawn(move || {
                    let pv = if i % 2 == 0 { "a" } else { "b" };
                    for _ in 0..1000 {
                        map.with(pv, |w| *w += 1);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(map.with("a", |w| *w), Some(4000));
        assert_eq!(map.with("b", |w| *w), Some(4000));
    }

    #[test]
    fn fan_out_reaches_every_observer() {
        let first = Arc::new(Counter(AtomicUsize::new(0)));
        let second = Arc::new(Counter(AtomicUsize::new(0)));
        let handler = fan_out(vec![
            first.clone() as Arc<dyn EventObserver>,
            second.clone() as Arc<dyn EventObserver>,
        ]);

        handler(Event::new(PvName::from("a"), Payload::Empty, None, 1.0));
        handler(Event::new(PvName::from("a"), Payload::Empty, None, 2.0));

        assert_eq!(first.0.load(Ordering::SeqCst), 2);
        assert_eq!(second.0.load(Ordering::SeqCst), 2);
    }
}
