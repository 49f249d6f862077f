//! The serialized cache mutation worker.
//!
//! Every mutation of the cache tree — preload copies and cleaner
//! evictions alike — runs on one background task consuming a FIFO
//! queue. Serialization is the concurrency story: a preload and a clean
//! can never interleave, and work on disjoint paths is never reordered.

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use regex::Regex;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, error, info};

use crate::cache::cleaner;
use crate::cache::locator::{LocateError, Locator};
use crate::cache::siblings;
use crate::config::Settings;
use crate::events::{Event, EventBus, FireReason};
use crate::io;

/// One unit of background work.
#[derive(Debug)]
enum Work {
    /// Cache `path` and its next few siblings.
    Preload {
        /// What fired the trigger.
        reason: FireReason,
        /// The file whose trigger fired.
        path: String,
    },
    /// Sweep the cache tree and evict stale entries.
    Clean {
        /// Basename exemption filter.
        ignore: Option<Regex>,
        /// Entries idle longer than this are evicted.
        after: Duration,
    },
}

/// A failed work item. Caught at the worker loop, emitted as an `error`
/// event, never propagated to the enqueuer.
#[derive(Debug, Error)]
pub enum WorkError {
    /// Locating a file ahead of a copy failed.
    #[error("preload lookup failed: {0}")]
    Locate(#[from] LocateError),

    /// The sibling scan of a source directory failed.
    #[error("failed to list siblings of {path}: {source}")]
    Siblings {
        /// The file whose directory could not be listed.
        path: String,
        /// The underlying readdir error.
        #[source]
        source: std::io::Error,
    },

    /// Creating the destination directory chain failed.
    #[error("failed to create cache directories for {path}: {source}")]
    Mkdir {
        /// The file being cached.
        path: String,
        /// The underlying mkdir error.
        #[source]
        source: std::io::Error,
    },

    /// Copying the file into the cache failed.
    #[error("failed to copy {path} into the cache: {source}")]
    Copy {
        /// The file being cached.
        path: String,
        /// The underlying copy or rename error.
        #[source]
        source: std::io::Error,
    },

    /// Restoring source timestamps on the copy failed.
    #[error("failed to restore timestamps on {path}: {source}")]
    Utimes {
        /// The file being cached.
        path: String,
        /// The underlying utimes error.
        #[source]
        source: std::io::Error,
    },

    /// Unlinking a cached file failed.
    #[error("failed to evict {path}: {source}")]
    Unlink {
        /// The file being evicted.
        path: String,
        /// The underlying unlink error.
        #[source]
        source: std::io::Error,
    },

    /// Pruning empty parent directories failed.
    #[error("failed to prune cache directories above {path}: {source}")]
    Rmdir {
        /// The file whose parents were being pruned.
        path: String,
        /// The underlying rmdir error.
        #[source]
        source: std::io::Error,
    },

    /// The cleaner's cache-tree walk failed.
    #[error("cache scan failed: {0}")]
    Scan(#[source] std::io::Error),
}

enum CacheOutcome {
    AlreadyCached,
    NewlyCached,
}

/// Handle for enqueueing background work.
///
/// Cloneable and cheap; all clones feed the same single-concurrency
/// FIFO worker. Enqueueing is fire-and-forget: failures surface as
/// `error` events, never as results.
#[derive(Clone)]
pub struct CacheWorker {
    queue: mpsc::UnboundedSender<Work>,
}

impl CacheWorker {
    /// Spawn the worker task and return the enqueue handle.
    #[must_use]
    pub fn spawn(settings: Arc<Settings>, locator: Arc<Locator>, events: EventBus) -> Self {
        let (queue, rx) = mpsc::unbounded_channel();
        let mutator = CacheMutator {
            settings,
            locator,
            events,
        };
        tokio::spawn(mutator.run(rx));
        Self { queue }
    }

    /// Enqueue a preload of `path` and its siblings.
    pub fn request_preload(&self, reason: FireReason, path: String) {
        let _ = self.queue.send(Work::Preload { reason, path });
    }

    /// Enqueue a cache sweep.
    pub fn request_clean(&self, ignore: Option<Regex>, after: Duration) {
        let _ = self.queue.send(Work::Clean { ignore, after });
    }
}

struct CacheMutator {
    settings: Arc<Settings>,
    locator: Arc<Locator>,
    events: EventBus,
}

impl CacheMutator {
    async fn run(self, mut rx: mpsc::UnboundedReceiver<Work>) {
        while let Some(work) = rx.recv().await {
            if let Err(e) = self.execute(work).await {
                // The item is abandoned; the queue keeps draining.
                let e = Arc::new(e);
                error!(error = %e, "background cache work failed");
                self.events.emit(Event::Error(e));
            }
        }
        debug!("cache worker queue closed, stopping");
    }

    async fn execute(&self, work: Work) -> Result<(), WorkError> {
        match work {
            Work::Preload { reason, path } => self.preload(reason, &path).await,
            Work::Clean { ignore, after } => self.clean(ignore.as_ref(), after).await,
        }
    }

    /// Cache `path` plus its next few siblings, announcing each file
    /// that actually lands.
    async fn preload(&self, reason: FireReason, path: &str) -> Result<(), WorkError> {
        self.events.emit(Event::Request {
            reason,
            path: path.to_owned(),
        });

        let group = siblings::select(
            &self.settings.source_root,
            path,
            &self.settings.preload_filter,
            self.settings.preload_siblings,
        )
        .await
        .map_err(|source| WorkError::Siblings {
            path: path.to_owned(),
            source,
        })?;

        for sibling in group {
            if matches!(
                self.cache_one(&sibling).await?,
                CacheOutcome::NewlyCached
            ) {
                info!(path = %sibling, "cached");
                self.events.emit(Event::Cache(sibling));
            }
        }
        Ok(())
    }

    /// Copy one file into the cache if it is not there already.
    ///
    /// The copy goes to a staging name in the destination directory and
    /// is renamed into place, so a partial copy is never visible at the
    /// cache path. Timestamps are restored from the source so cleaner
    /// age calculations see source semantics.
    async fn cache_one(&self, path: &str) -> Result<CacheOutcome, WorkError> {
        let info = self.locator.locate(path).await?;
        if info.cached {
            return Ok(CacheOutcome::AlreadyCached);
        }

        let src = io::physical(&self.settings.source_root, path);
        let dst = io::physical(&self.settings.cache_root, path);
        if let Some(parent) = dst.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| WorkError::Mkdir {
                    path: path.to_owned(),
                    source,
                })?;
        }

        let staged = io::staging_name(&dst);
        let copied: Result<(), WorkError> = async {
            tokio::fs::copy(&src, &staged)
                .await
                .map_err(|source| WorkError::Copy {
                    path: path.to_owned(),
                    source,
                })?;
            io::set_file_times(&staged, info.stats.atime, info.stats.mtime).map_err(|source| {
                WorkError::Utimes {
                    path: path.to_owned(),
                    source,
                }
            })?;
            tokio::fs::rename(&staged, &dst)
                .await
                .map_err(|source| WorkError::Copy {
                    path: path.to_owned(),
                    source,
                })?;
            Ok(())
        }
        .await;
        if copied.is_err() {
            let _ = tokio::fs::remove_file(&staged).await;
        }
        copied?;

        self.locator.invalidate(path);
        Ok(CacheOutcome::NewlyCached)
    }

    /// Remove one file from the cache and prune emptied directories.
    async fn uncache(&self, path: &str) -> Result<(), WorkError> {
        // Re-point the locator first: a locate racing this eviction must
        // not hand out a cache path that is about to disappear. Readers
        // already holding a descriptor keep it, by unlink semantics.
        self.locator.mark_uncached(path);

        let dst = io::physical(&self.settings.cache_root, path);
        tokio::fs::remove_file(&dst)
            .await
            .map_err(|source| WorkError::Unlink {
                path: path.to_owned(),
                source,
            })?;
        io::remove_empty_parents(&dst, &self.settings.cache_root)
            .await
            .map_err(|source| WorkError::Rmdir {
                path: path.to_owned(),
                source,
            })?;

        info!(path, "evicted");
        self.events.emit(Event::Uncache(path.to_owned()));
        Ok(())
    }

    /// One sweep: evict everything stale, then flush the locator's MRU.
    async fn clean(&self, ignore: Option<&Regex>, after: Duration) -> Result<(), WorkError> {
        let cutoff = SystemTime::now()
            .checked_sub(after)
            .unwrap_or(SystemTime::UNIX_EPOCH);
        let stale = cleaner::stale_files(&self.settings.cache_root, ignore, cutoff)
            .await
            .map_err(WorkError::Scan)?;

        debug!(count = stale.len(), "cleaner selected stale entries");
        for path in stale {
            self.uncache(&path).await?;
        }
        self.locator.clear();
        Ok(())
    }
}
