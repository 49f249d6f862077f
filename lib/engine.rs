//! The engine facade: one object owning the whole policy core.

use std::sync::Arc;

use tokio::sync::broadcast;

use crate::cache::locator::{LocateError, Locator, PathInfo};
use crate::cache::tracker::OpenFileTracker;
use crate::cache::worker::CacheWorker;
use crate::config::Settings;
use crate::events::{Event, EventBus, FireReason};
use crate::io;

/// The caching policy engine.
///
/// Constructed once per mount, on a tokio runtime (construction spawns
/// the background worker task). The mount adapter drives it through
/// [`locate`](Self::locate), [`on_open`](Self::on_open),
/// [`on_read`](Self::on_read), [`on_close`](Self::on_close) and
/// [`readdir`](Self::readdir); everything else happens behind the
/// scenes and is observable on the event bus.
pub struct Engine {
    settings: Arc<Settings>,
    locator: Arc<Locator>,
    tracker: OpenFileTracker,
    worker: CacheWorker,
    events: EventBus,
}

impl Engine {
    /// Build the engine and spawn its background worker.
    #[must_use]
    pub fn new(settings: Settings) -> Self {
        let settings = Arc::new(settings);
        let events = EventBus::new();
        let locator = Arc::new(Locator::new(&settings));
        let worker = CacheWorker::spawn(
            Arc::clone(&settings),
            Arc::clone(&locator),
            events.clone(),
        );
        let tracker = OpenFileTracker::new(
            Arc::clone(&settings),
            Arc::clone(&locator),
            worker.clone(),
            events.clone(),
        );
        Self {
            settings,
            locator,
            tracker,
            worker,
            events,
        }
    }

    /// The settings this engine was built with.
    #[must_use]
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Resolve a virtual path, preferring the cache copy.
    pub async fn locate(&self, path: &str) -> Result<PathInfo, LocateError> {
        self.locator.locate(path).await
    }

    /// Report a successful open of `path` under descriptor `fd`.
    pub async fn on_open(&self, fd: u64, path: &str) -> Result<(), LocateError> {
        self.tracker.on_open(fd, path).await
    }

    /// Report a successful read of `bytes` bytes on descriptor `fd`.
    pub fn on_read(&self, fd: u64, bytes: u64) {
        self.tracker.on_read(fd, bytes);
    }

    /// Report the release of descriptor `fd`.
    pub fn on_close(&self, fd: u64) {
        self.tracker.on_close(fd);
    }

    /// List a directory. Listings are source-authoritative: the union
    /// view never shows cache-only artifacts.
    pub async fn readdir(&self, path: &str) -> std::io::Result<Vec<String>> {
        let dir = io::physical(&self.settings.source_root, path);
        let mut names = Vec::new();
        let mut entries = tokio::fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            if let Ok(name) = entry.file_name().into_string() {
                names.push(name);
            }
        }
        names.sort_unstable();
        Ok(names)
    }

    /// Enqueue a preload of `path` and its siblings, bypassing the
    /// trigger machinery.
    pub fn request_preload(&self, reason: FireReason, path: &str) {
        self.worker.request_preload(reason, path.to_owned());
    }

    /// Enqueue a cache sweep using the configured staleness policy.
    pub fn request_clean(&self) {
        self.worker.request_clean(
            self.settings.clean_ignore.clone(),
            self.settings.clean_after,
        );
    }

    /// Attach an observer to the event bus.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.events.subscribe()
    }

    /// Number of cacheable descriptors currently open.
    #[must_use]
    pub fn open_files(&self) -> usize {
        self.tracker.open_count()
    }
}
