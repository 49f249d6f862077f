//! Named events emitted by the engine for external observers.

use std::sync::Arc;

use tokio::sync::broadcast;

use crate::cache::worker::WorkError;

/// Why a preload trigger resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FireReason {
    /// The file stayed open past the hold-open timeout.
    Time,
    /// Enough of the file was read to cross the read-volume threshold.
    Read,
}

impl std::fmt::Display for FireReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Time => f.write_str("time"),
            Self::Read => f.write_str("read"),
        }
    }
}

/// One observable occurrence inside the engine.
#[derive(Debug, Clone)]
pub enum Event {
    /// A cacheable file was opened and served from the cache.
    Hit(String),
    /// A cacheable file was opened and served from the source.
    Miss(String),
    /// A non-cacheable file was opened.
    Read(String),
    /// A preload trigger fired and its request reached the worker.
    Request {
        /// What resolved the trigger.
        reason: FireReason,
        /// The file whose open armed the trigger.
        path: String,
    },
    /// A file was newly copied into the cache.
    Cache(String),
    /// A file was evicted from the cache.
    Uncache(String),
    /// A background work item failed and was abandoned.
    Error(Arc<WorkError>),
}

impl Event {
    /// The event's name as observers know it.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Hit(_) => "hit",
            Self::Miss(_) => "miss",
            Self::Read(_) => "read",
            Self::Request { .. } => "request",
            Self::Cache(_) => "cache",
            Self::Uncache(_) => "uncache",
            Self::Error(_) => "error",
        }
    }

    /// The path argument, for every event that carries one.
    #[must_use]
    pub fn path(&self) -> Option<&str> {
        match self {
            Self::Hit(p)
            | Self::Miss(p)
            | Self::Read(p)
            | Self::Cache(p)
            | Self::Uncache(p)
            | Self::Request { path: p, .. } => Some(p),
            Self::Error(_) => None,
        }
    }
}

/// How many events a slow observer may fall behind before it starts
/// losing the oldest ones.
const EVENT_BACKLOG: usize = 256;

/// Multi-observer event channel.
///
/// Emission never blocks: an emitter with no observers drops the event,
/// and a lagging observer sees `Lagged` rather than stalling the engine.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<Event>,
}

impl EventBus {
    /// Create a bus with no observers yet.
    #[must_use]
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_BACKLOG);
        Self { tx }
    }

    /// Emit an event to every current observer.
    pub fn emit(&self, event: Event) {
        let _ = self.tx.send(event);
    }

    /// Attach a new observer. It sees events emitted from now on.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
