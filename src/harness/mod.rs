//! Concurrent client harness.
//!
//! Runs N independent [`ClientSession`]s in parallel, one named worker
//! thread each. Every session owns its own subscription and counters; every
//! delivered update is also tagged with the client id and pushed onto one
//! shared queue, drained once all workers have finished.
//!
//! A client that fails to start (backend missing, context refused, worker
//! panic) is logged and reported separately; it never aborts the others.

use std::sync::mpsc::{self, Sender};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::event::{Event, PvName};
use crate::rows::Row;
use crate::subscription::{
    self, BackendKind, BackendRegistry, EventHandler, SubscribeError, Subscription,
};
use crate::util::{StopSignal, now_epoch};

/// Harness parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct HarnessConfig {
    pub client_count: usize,
    /// PVs per client; 0 assigns the full PV list to every client.
    pub pvs_per_client: usize,
    pub duration: Duration,
    pub kind: BackendKind,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            client_count: 5,
            pvs_per_client: 0,
            duration: Duration::from_secs(60),
            kind: BackendKind::Ca,
        }
    }
}

/// PVs assigned to client `client_index`.
///
/// With `pvs_per_client == 0` every client gets the whole list. Otherwise
/// `n = min(pvs_per_client, len)` consecutive PVs starting at
/// `(client_index * n) % len`, wrapping around the end of the list.
pub fn assign_pvs(pvs: &[PvName], client_index: usize, pvs_per_client: usize) -> Vec<PvName> {
    if pvs.is_empty() || pvs_per_client == 0 {
        return pvs.to_vec();
    }
    let n = pvs_per_client.min(pvs.len());
    let start = (client_index * n) % pvs.len();
    pvs.iter().cycle().skip(start).take(n).cloned().collect()
}

/// Per-client totals.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClientStats {
    pub client_id: usize,
    pub data_count: u64,
    pub elapsed_time: f64,
    pub avg_rate_hz: f64,
}

impl Row for ClientStats {
    const HEADER: &'static [&'static str] =
        &["client_id", "data_count", "elapsed_time", "avg_rate_hz"];

    fn fields(&self) -> Vec<String> {
        vec![
            self.client_id.to_string(),
            self.data_count.to_string(),
            self.elapsed_time.to_string(),
            self.avg_rate_hz.to_string(),
        ]
    }
}

/// One delivered update, tagged with the receiving client.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DetailRow {
    pub client_id: usize,
    pub pv: PvName,
    /// Local receipt time, epoch seconds.
    pub timestamp: f64,
    pub data_size: usize,
    /// The client's update count including this one.
    pub data_count: u64,
}

impl Row for DetailRow {
    const HEADER: &'static [&'static str] =
        &["client_id", "pvname", "timestamp", "data_size", "data_count"];

    fn fields(&self) -> Vec<String> {
        vec![
            self.client_id.to_string(),
            self.pv.to_string(),
            self.timestamp.to_string(),
            self.data_size.to_string(),
            self.data_count.to_string(),
        ]
    }
}

#[derive(Debug)]
struct ClientCounters {
    count: u64,
    start: f64,
    last_update: Option<f64>,
}

/// One simulated consumer: a subscription plus its own counters.
pub struct ClientSession {
    client_id: usize,
    counters: Arc<Mutex<ClientCounters>>,
    subscription: Subscription,
}

impl ClientSession {
    /// Subscribes `pvs` and starts counting. Each update is also sent to
    /// `details`; a closed receiver only drops detail rows.
    pub fn start(
        client_id: usize,
        registry: &BackendRegistry,
        pvs: &[PvName],
        kind: BackendKind,
        details: Sender<DetailRow>,
    ) -> Result<Self, SubscribeError> {
        let counters = Arc::new(Mutex::new(ClientCounters {
            count: 0,
            start: now_epoch(),
            last_update: None,
        }));

        let shared = Arc::clone(&counters);
        let handler: EventHandler = Arc::new(move |event: Event| {
            let mut c = shared.lock().unwrap_or_else(PoisonError::into_inner);
            c.count += 1;
            c.last_update = Some(event.received_at);
            // Sent under the lock so queue order matches data_count order.
            let _ = details.send(DetailRow {
                client_id,
                pv: event.pv,
                timestamp: event.received_at,
                data_size: event.size_bytes,
                data_count: c.count,
            });
        });

        let subscription = subscription::open(registry, pvs, kind, handler)?;
        debug!(client_id, pvs = pvs.len(), "client session started");
        Ok(Self {
            client_id,
            counters,
            subscription,
        })
    }

    /// Tears down the subscription; idempotent.
    pub fn stop(&mut self) {
        self.subscription.close();
    }

    pub fn stats(&self) -> ClientStats {
        let c = self.counters.lock().unwrap_or_else(PoisonError::into_inner);
        let elapsed_time = c.last_update.map_or(0.0, |last| (last - c.start).max(0.0));
        let avg_rate_hz = if elapsed_time > 0.0 {
            c.count as f64 / elapsed_time
        } else {
            0.0
        };
        ClientStats {
            client_id: self.client_id,
            data_count: c.count,
            elapsed_time,
            avg_rate_hz,
        }
    }
}

/// A client that produced no statistics.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientFailure {
    pub client_id: usize,
    pub error: String,
}

/// Totals across the clients that completed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct HarnessSummary {
    pub clients_completed: usize,
    pub clients_failed: usize,
    pub total_updates: u64,
    pub mean_rate_hz: f64,
}

#[derive(Debug, Clone, Default)]
pub struct HarnessReport {
    /// Sorted by client id.
    pub clients: Vec<ClientStats>,
    pub failures: Vec<ClientFailure>,
    /// Queue order.
    pub details: Vec<DetailRow>,
    /// The run ended early on the stop signal.
    pub cancelled: bool,
}

impl HarnessReport {
    pub fn summary(&self) -> HarnessSummary {
        let total_updates = self.clients.iter().map(|c| c.data_count).sum();
        let mean_rate_hz = if self.clients.is_empty() {
            0.0
        } else {
            self.clients.iter().map(|c| c.avg_rate_hz).sum::<f64>() / self.clients.len() as f64
        };
        HarnessSummary {
            clients_completed: self.clients.len(),
            clients_failed: self.failures.len(),
            total_updates,
            mean_rate_hz,
        }
    }
}

pub struct ConcurrentHarness {
    registry: BackendRegistry,
    config: HarnessConfig,
}

impl ConcurrentHarness {
    pub fn new(registry: BackendRegistry, config: HarnessConfig) -> Self {
        Self { registry, config }
    }

    /// Runs every client for the configured duration and merges the results.
    ///
    /// Only configuration problems are fatal; per-client failures end up in
    /// [`HarnessReport::failures`]. Triggering `stop` wakes every worker,
    /// which then tears down its session.
    pub fn run(&self, pvs: &[PvName], stop: &StopSignal) -> Result<HarnessReport, SubscribeError> {
        if pvs.is_empty() {
            return Err(SubscribeError::Configuration(
                "at least one PV is required".to_string(),
            ));
        }
        if self.config.client_count == 0 {
            return Err(SubscribeError::Configuration(
                "client count must be positive".to_string(),
            ));
        }

        info!(
            clients = self.config.client_count,
            pvs = pvs.len(),
            backend = %self.config.kind,
            duration_secs = self.config.duration.as_secs_f64(),
            "starting concurrent run"
        );

        let (tx, rx) = mpsc::channel::<DetailRow>();
        let mut report = HarnessReport::default();

        thread::scope(|scope| {
            let mut workers = Vec::with_capacity(self.config.client_count);
            for client_id in 0..self.config.client_count {
                let client_pvs = assign_pvs(pvs, client_id, self.config.pvs_per_client);
                let details = tx.clone();
                let spawned = thread::Builder::new()
                    .name(format!("client-{}", client_id))
                    .spawn_scoped(scope, move || {
                        self.run_client(client_id, &client_pvs, details, stop)
                    });
                match spawned {
                    Ok(handle) => workers.push((client_id, handle)),
                    Err(e) => {
                        error!(client_id, error = %e, "failed to spawn client worker");
                        report.failures.push(ClientFailure {
                            client_id,
                            error: e.to_string(),
                        });
                    }
                }
            }

            for (client_id, handle) in workers {
                match handle.join() {
                    Ok(Ok(stats)) => report.clients.push(stats),
                    Ok(Err(e)) => report.failures.push(ClientFailure {
                        client_id,
                        error: e.to_string(),
                    }),
                    Err(_) => {
                        error!(client_id, "client worker panicked");
                        report.failures.push(ClientFailure {
                            client_id,
                            error: "worker panicked".to_string(),
                        });
                    }
                }
            }
        });
        drop(tx);

        report.details = rx.try_iter().collect();
        report.clients.sort_by_key(|c| c.client_id);
        report.failures.sort_by_key(|f| f.client_id);
        report.cancelled = stop.is_stopped();

        let summary = report.summary();
        info!(
            completed = summary.clients_completed,
            failed = summary.clients_failed,
            total_updates = summary.total_updates,
            mean_rate_hz = summary.mean_rate_hz,
            cancelled = report.cancelled,
            "concurrent run finished"
        );
        Ok(report)
    }

    fn run_client(
        &self,
        client_id: usize,
        pvs: &[PvName],
        details: Sender<DetailRow>,
        stop: &StopSignal,
    ) -> Result<ClientStats, SubscribeError> {
        let started =
            ClientSession::start(client_id, &self.registry, pvs, self.config.kind, details);
        let mut session = match started {
            Ok(session) => session,
            Err(e) => {
                warn!(client_id, error = %e, "client failed to start");
                return Err(e);
            }
        };

        if stop.wait(self.config.duration) {
            debug!(client_id, "client interrupted");
        }
        session.stop();

        let stats = session.stats();
        info!(
            client_id,
            updates = stats.data_count,
            avg_rate_hz = stats.avg_rate_hz,
            "client completed"
        );
        Ok(stats)
    }
}
