//! Contract between pvbench and the protocol libraries that deliver updates.
//!
//! The two backend shapes mirror how the underlying protocols hand out data:
//!
//! - [`FlatBackend`] (Channel Access style): one monitor per PV, no shared
//!   state, the callback receives a flat value and timestamp but not the PV
//!   name.
//! - [`ContextBackend`] (PV Access style): monitors are created through a
//!   shared [`BackendContext`] that must be closed on shutdown, and the
//!   callback receives a structured [`Structure`] envelope.
//!
//! Implementations call their callbacks from their own threads.

use crate::event::Payload;
use crate::subscription::envelope::Structure;

/// Callback invoked by a [`FlatBackend`] for every delivery.
pub type FlatCallback = Box<dyn Fn(Payload, Option<f64>) + Send + Sync>;

/// Callback invoked by a [`BackendContext`] monitor for every delivery.
pub type EnvelopeCallback = Box<dyn Fn(Structure) + Send + Sync>;

/// Error reported by a backend implementation.
#[derive(Debug, Clone, PartialEq)]
pub struct BackendError {
    pub message: String,
}

impl BackendError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self {
            message: msg.into(),
        }
    }
}

impl std::fmt::Display for BackendError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "backend error: {}", self.message)
    }
}

impl std::error::Error for BackendError {}

/// A live registration for one PV.
pub trait Monitor: Send {
    /// Stops deliveries. Called at most once per monitor.
    fn cancel(&mut self) -> Result<(), BackendError>;
}

/// Backend without shared state, delivering flat values.
pub trait FlatBackend: Send + Sync {
    /// Starts monitoring `pv`; `callback` runs on every update.
    fn monitor(&self, pv: &str, callback: FlatCallback) -> Result<Box<dyn Monitor>, BackendError>;
}

/// Backend that needs a shared context for all its monitors.
pub trait ContextBackend: Send + Sync {
    fn create_context(&self) -> Result<Box<dyn BackendContext>, BackendError>;
}

/// Shared context of a [`ContextBackend`].
pub trait BackendContext: Send {
    /// Starts monitoring `pv`; `callback` runs on every update.
    fn monitor(
        &mut self,
        pv: &str,
        callback: EnvelopeCallback,
    ) -> Result<Box<dyn Monitor>, BackendError>;

    /// Releases the context. Called at most once.
    fn close(&mut self) -> Result<(), BackendError>;
}
