//! pvbench - runtime behavior measurements for control-system process variables.
//!
//! This library provides the measurement core used by the `pvbench` binary:
//! - `subscription` - one callback contract over the two delivery backends
//! - `metrics` - per-PV latency, throughput and loss-estimate windows
//! - `sampler` - host CPU/memory sampling correlated with event totals
//! - `harness` - concurrent client sessions sharing one result queue
//! - `stress` - bounded stress run producing aggregate statistics
//! - `scenario` - single-metric monitoring loops feeding a row sink
//!
//! Wire protocols are not implemented here; they plug in through the backend
//! traits in `subscription::traits`. `backend::sim` provides an in-process
//! source for both backend kinds.

pub mod backend;
pub mod config;
pub mod event;
pub mod harness;
pub mod metrics;
pub mod rows;
pub mod sampler;
pub mod scenario;
pub mod stress;
pub mod subscription;
pub mod util;
