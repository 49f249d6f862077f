//! Per-descriptor accounting of open cacheable files.

use std::sync::Arc;
use std::sync::OnceLock;
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::debug;

use crate::cache::locator::{LocateError, Locator};
use crate::cache::trigger::{PreloadTrigger, TriggerState};
use crate::cache::worker::CacheWorker;
use crate::config::Settings;
use crate::events::{Event, EventBus, FireReason};
use crate::io;

/// State carried for one open descriptor on a cacheable file.
struct OpenFileRecord {
    path: String,
    bytes_read: AtomicU64,
    size: OnceLock<u64>,
    trigger: Arc<PreloadTrigger>,
}

/// Tracks open descriptors and arms one preload trigger per open.
///
/// Non-cacheable opens are not tracked at all; they announce themselves
/// with a `read` event and that is the end of it.
pub struct OpenFileTracker {
    table: scc::HashMap<u64, Arc<OpenFileRecord>>,
    settings: Arc<Settings>,
    locator: Arc<Locator>,
    worker: CacheWorker,
    events: EventBus,
}

impl OpenFileTracker {
    /// Build a tracker wired to the locator, worker and event bus.
    #[must_use]
    pub fn new(
        settings: Arc<Settings>,
        locator: Arc<Locator>,
        worker: CacheWorker,
        events: EventBus,
    ) -> Self {
        Self {
            table: scc::HashMap::new(),
            settings,
            locator,
            worker,
            events,
        }
    }

    /// Note a successful open of `path` under descriptor `fd`.
    ///
    /// Cacheable files get a record and an armed trigger; when the
    /// trigger resolves to fired, a preload request for `path` lands on
    /// the worker queue.
    pub async fn on_open(&self, fd: u64, path: &str) -> Result<(), LocateError> {
        if !self.settings.preload_filter.is_match(io::basename(path)) {
            self.events.emit(Event::Read(path.to_owned()));
            return Ok(());
        }

        let info = self.locator.locate(path).await?;
        self.events.emit(if info.cached {
            Event::Hit(path.to_owned())
        } else {
            Event::Miss(path.to_owned())
        });

        let trigger = PreloadTrigger::arm(self.settings.preload_open, FireReason::Time);
        let record = Arc::new(OpenFileRecord {
            path: path.to_owned(),
            bytes_read: AtomicU64::new(0),
            size: OnceLock::new(),
            trigger: Arc::clone(&trigger),
        });
        let _ = record.size.set(info.stats.size);

        if let Some(stale) = self.table.upsert_async(fd, record).await {
            // The adapter reused a descriptor without closing it first.
            debug!(fd, path = %stale.path, "replacing an unclosed descriptor record");
            stale.trigger.cancel();
        }

        let worker = self.worker.clone();
        let path = path.to_owned();
        tokio::spawn(async move {
            if let TriggerState::Fired(reason) = trigger.resolved().await {
                worker.request_preload(reason, path);
            }
        });
        Ok(())
    }

    /// Note a successful read of `bytes` bytes on descriptor `fd`.
    ///
    /// Fires the read-volume trigger once the cumulative total crosses
    /// the configured share of the file's size. Unknown descriptors
    /// (non-cacheable, or already closed) are ignored.
    pub fn on_read(&self, fd: u64, bytes: u64) {
        let percent = u128::from(self.settings.preload_read_percent);
        let _ = self.table.read(&fd, |_, record| {
            let total = record.bytes_read.fetch_add(bytes, Ordering::Relaxed) + bytes;
            if let Some(size) = record.size.get()
                && u128::from(total) * 100 > u128::from(*size) * percent
            {
                record.trigger.fire(FireReason::Read);
            }
        });
    }

    /// Note the release of descriptor `fd`, cancelling its trigger.
    ///
    /// A trigger that already fired is unaffected: the queued preload is
    /// independent of the descriptor.
    pub fn on_close(&self, fd: u64) {
        if let Some((_, record)) = self.table.remove(&fd) {
            record.trigger.cancel();
        }
    }

    /// Number of descriptors currently tracked.
    #[must_use]
    pub fn open_count(&self) -> usize {
        self.table.len()
    }
}
