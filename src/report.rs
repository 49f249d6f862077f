//! The human-readable report: one log line per engine event.

use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

use aheadfs::{Engine, Event};

fn report(event: &Event) {
    match event {
        Event::Request { reason, path } => {
            info!(target: "aheadfs::report", %reason, path, "request");
        }
        Event::Error(e) => {
            warn!(target: "aheadfs::report", error = %e, "error");
        }
        _ => {
            // name() carries the event kind; every remaining variant
            // has exactly a path payload.
            if let Some(path) = event.path() {
                info!(target: "aheadfs::report", path, "{}", event.name());
            }
        }
    }
}

/// Subscribe to the engine's event bus and narrate it into the log.
///
/// A lagging report loses the oldest events rather than slowing the
/// engine down; the gap is logged.
pub fn spawn(engine: &Engine) -> tokio::task::JoinHandle<()> {
    let mut events = engine.subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => report(&event),
                Err(RecvError::Lagged(missed)) => {
                    warn!(target: "aheadfs::report", missed, "event report fell behind");
                }
                Err(RecvError::Closed) => break,
            }
        }
    })
}
