//! Protocol-agnostic PV subscriptions.
//!
//! [`open`] subscribes to a set of PVs on one of the two backend kinds and
//! turns every delivery into exactly one call of a uniform [`EventHandler`].
//! The per-backend differences are resolved once, when the monitors are
//! created:
//!
//! ```text
//!  FlatBackend (ca)                      ContextBackend (pva)
//!  callback(value, ts)                   context.monitor(pv, callback(envelope))
//!        │ pv name bound by closure             │ pv name bound by closure
//!        │                                      │ envelope::normalize()
//!        └──────────────┬───────────────────────┘
//!                       ▼
//!              on_event(Event { pv, payload, timestamp, .. })
//! ```

pub mod envelope;
pub mod traits;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::event::{Event, Payload, PvName};
use crate::util::now_epoch;

pub use envelope::{ExtractError, Field, Structure};
pub use traits::{
    BackendContext, BackendError, ContextBackend, EnvelopeCallback, FlatBackend, FlatCallback,
    Monitor,
};

/// Uniform callback receiving every normalized update.
pub type EventHandler = Arc<dyn Fn(Event) + Send + Sync>;

/// The two supported delivery mechanisms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendKind {
    /// Channel Access style: flat values, no shared context.
    Ca,
    /// PV Access style: structured envelopes through a shared context.
    Pva,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Ca => "ca",
            BackendKind::Pva => "pva",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendKind {
    type Err = SubscribeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ca" => Ok(BackendKind::Ca),
            "pva" => Ok(BackendKind::Pva),
            other => Err(SubscribeError::Configuration(format!(
                "protocol must be 'ca' or 'pva', got '{}'",
                other
            ))),
        }
    }
}

/// Errors raised while opening a subscription.
#[derive(Debug, Clone, PartialEq)]
pub enum SubscribeError {
    /// Invalid protocol selection or empty PV list.
    Configuration(String),
    /// No implementation registered for the requested backend kind.
    BackendUnavailable(BackendKind),
    /// The backend refused to create a context or a monitor.
    Backend {
        pv: Option<PvName>,
        source: BackendError,
    },
}

impl fmt::Display for SubscribeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubscribeError::Configuration(msg) => write!(f, "configuration error: {}", msg),
            SubscribeError::BackendUnavailable(kind) => {
                write!(f, "backend '{}' is not available in this build", kind)
            }
            SubscribeError::Backend { pv: Some(pv), source } => {
                write!(f, "failed to monitor {}: {}", pv, source)
            }
            SubscribeError::Backend { pv: None, source } => {
                write!(f, "failed to create backend context: {}", source)
            }
        }
    }
}

impl std::error::Error for SubscribeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SubscribeError::Backend { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// Backend implementations available to this process.
///
/// A kind without an implementation behaves like a protocol library that is
/// not installed: opening it fails with [`SubscribeError::BackendUnavailable`]
/// before anything is subscribed.
#[derive(Clone, Default)]
pub struct BackendRegistry {
    ca: Option<Arc<dyn FlatBackend>>,
    pva: Option<Arc<dyn ContextBackend>>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ca(mut self, backend: Arc<dyn FlatBackend>) -> Self {
        self.ca = Some(backend);
        self
    }

    pub fn with_pva(mut self, backend: Arc<dyn ContextBackend>) -> Self {
        self.pva = Some(backend);
        self
    }

    pub fn is_available(&self, kind: BackendKind) -> bool {
        match kind {
            BackendKind::Ca => self.ca.is_some(),
            BackendKind::Pva => self.pva.is_some(),
        }
    }

    /// Picks the implementation for `kind`.
    pub fn resolve(&self, kind: BackendKind) -> Result<SubscriptionBackend, SubscribeError> {
        match kind {
            BackendKind::Ca => self
                .ca
                .clone()
                .map(SubscriptionBackend::ChannelAccess)
                .ok_or(SubscribeError::BackendUnavailable(kind)),
            BackendKind::Pva => self
                .pva
                .clone()
                .map(SubscriptionBackend::PvAccess)
                .ok_or(SubscribeError::BackendUnavailable(kind)),
        }
    }
}

/// A resolved backend, ready to subscribe.
pub enum SubscriptionBackend {
    ChannelAccess(Arc<dyn FlatBackend>),
    PvAccess(Arc<dyn ContextBackend>),
}

impl SubscriptionBackend {
    pub fn kind(&self) -> BackendKind {
        match self {
            SubscriptionBackend::ChannelAccess(_) => BackendKind::Ca,
            SubscriptionBackend::PvAccess(_) => BackendKind::Pva,
        }
    }

    /// Creates one monitor per PV, all feeding `on_event`.
    ///
    /// On failure every monitor created so far (and the context, if any) is
    /// torn down before the error is returned.
    pub fn subscribe(
        &self,
        pv_names: &[PvName],
        on_event: EventHandler,
    ) -> Result<Subscription, SubscribeError> {
        let mut subscription = Subscription::new(self.kind());

        match self {
            SubscriptionBackend::ChannelAccess(backend) => {
                for pv in pv_names {
                    let bound = pv.clone();
                    let handler = Arc::clone(&on_event);
                    let callback: FlatCallback = Box::new(move |value: Payload, timestamp: Option<f64>| {
                        handler(Event::new(bound.clone(), value, timestamp, now_epoch()));
                    });
                    let monitor = backend.monitor(pv, callback).map_err(|source| {
                        SubscribeError::Backend {
                            pv: Some(pv.clone()),
                            source,
                        }
                    })?;
                    subscription.monitors.push((pv.clone(), monitor));
                }
            }
            SubscriptionBackend::PvAccess(backend) => {
                let context = backend
                    .create_context()
                    .map_err(|source| SubscribeError::Backend { pv: None, source })?;
                let context = subscription.context.insert(context);
                for pv in pv_names {
                    let bound = pv.clone();
                    let handler = Arc::clone(&on_event);
                    let callback: EnvelopeCallback = Box::new(move |envelope: Structure| {
                        handler(envelope::normalize(bound.clone(), envelope, now_epoch()));
                    });
                    let monitor = context.monitor(pv, callback).map_err(|source| {
                        SubscribeError::Backend {
                            pv: Some(pv.clone()),
                            source,
                        }
                    })?;
                    subscription.monitors.push((pv.clone(), monitor));
                }
            }
        }

        Ok(subscription)
    }
}

/// Live monitors for a set of PVs plus the backend context, if any.
///
/// Closing is idempotent and best-effort; dropping closes as well.
pub struct Subscription {
    kind: BackendKind,
    monitors: Vec<(PvName, Box<dyn Monitor>)>,
    context: Option<Box<dyn BackendContext>>,
    closed: bool,
}

impl Subscription {
    fn new(kind: BackendKind) -> Self {
        Self {
            kind,
            monitors: Vec::new(),
            context: None,
            closed: false,
        }
    }

    pub fn kind(&self) -> BackendKind {
        self.kind
    }

    /// Whether a backend context is held (always false for `ca`).
    pub fn has_context(&self) -> bool {
        self.context.is_some()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Cancels every monitor, then releases the context.
    ///
    /// Teardown errors are logged and swallowed. Calling this again is a no-op.
    pub fn close(&mut self) {
        for (pv, mut monitor) in self.monitors.drain(..) {
            if let Err(e) = monitor.cancel() {
                debug!(pv = %pv, error = %e, "monitor teardown failed");
            }
        }
        if let Some(mut context) = self.context.take()
            && let Err(e) = context.close()
        {
            warn!(backend = %self.kind, error = %e, "context teardown failed");
        }
        self.closed = true;
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.close();
    }
}

/// Subscribes to `pv_names` on `kind` and routes every update to `on_event`.
///
/// Fails with [`SubscribeError::Configuration`] for an empty PV list and with
/// [`SubscribeError::BackendUnavailable`] when `kind` has no implementation;
/// in both cases nothing is subscribed.
pub fn open(
    registry: &BackendRegistry,
    pv_names: &[PvName],
    kind: BackendKind,
    on_event: EventHandler,
) -> Result<Subscription, SubscribeError> {
    if pv_names.is_empty() {
        return Err(SubscribeError::Configuration(
            "at least one PV is required".to_string(),
        ));
    }
    let backend = registry.resolve(kind)?;
    let subscription = backend.subscribe(pv_names, on_event)?;
    info!(
        backend = %kind,
        pvs = pv_names.len(),
        context = subscription.has_context(),
        "subscription opened"
    );
    Ok(subscription)
}

/// Like [`open`], parsing the protocol name first.
pub fn open_protocol(
    registry: &BackendRegistry,
    pv_names: &[PvName],
    protocol: &str,
    on_event: EventHandler,
) -> Result<Subscription, SubscribeError> {
    let kind = protocol.parse::<BackendKind>()?;
    open(registry, pv_names, kind, on_event)
}
