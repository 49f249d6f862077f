//! Virtual-path resolution against the cache-over-source union.

use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::{Mutex, PoisonError};
use std::time::SystemTime;

use regex::Regex;
use thiserror::Error;
use tracing::trace;

use crate::cache::mru::MruCache;
use crate::config::Settings;
use crate::io;

/// Size and timestamps of the physical file backing a virtual path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PathStats {
    /// File size in bytes.
    pub size: u64,
    /// Whether the entry is a directory.
    pub is_dir: bool,
    /// Last access time.
    pub atime: SystemTime,
    /// Last modification time.
    pub mtime: SystemTime,
}

impl PathStats {
    fn from_metadata(md: &std::fs::Metadata) -> std::io::Result<Self> {
        Ok(Self {
            size: md.len(),
            is_dir: md.is_dir(),
            atime: md.accessed()?,
            mtime: md.modified()?,
        })
    }
}

/// Where a virtual path currently resolves to.
#[derive(Debug, Clone)]
pub struct PathInfo {
    /// The virtual path, relative to the mount.
    pub path: String,
    /// The physical path, under either the cache root or the source root.
    pub fullpath: PathBuf,
    /// True iff a physical file exists at the cache location.
    pub cached: bool,
    /// True iff the basename passes the preload filter.
    pub cacheable: bool,
    /// Metadata of the physical file at `fullpath`.
    pub stats: PathStats,
}

/// A virtual path could not be resolved: the source stat failed, or the
/// cache stat failed with something other than not-found.
#[derive(Debug, Error)]
#[error("failed to locate {path}: {source}")]
pub struct LocateError {
    /// The virtual path that failed to resolve.
    pub path: String,
    /// The underlying stat error.
    #[source]
    pub source: std::io::Error,
}

/// Resolves virtual paths to physical ones, preferring the cache, with a
/// small MRU amortizing repeated stats.
///
/// The MRU is also the coherence point for the cache worker: a completed
/// copy invalidates the entry, and an eviction re-points it at the
/// source before the cache file disappears.
pub struct Locator {
    source_root: PathBuf,
    cache_root: PathBuf,
    filter: Regex,
    mru: Mutex<MruCache>,
}

impl Locator {
    /// Build a locator over the configured roots.
    #[must_use]
    pub fn new(settings: &Settings) -> Self {
        Self {
            source_root: settings.source_root.clone(),
            cache_root: settings.cache_root.clone(),
            filter: settings.preload_filter.clone(),
            mru: Mutex::new(MruCache::new(settings.mru_size)),
        }
    }

    fn mru(&self) -> std::sync::MutexGuard<'_, MruCache> {
        self.mru.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Resolve `path` to its physical location.
    ///
    /// The cache location wins when a file exists there; otherwise the
    /// source is stat'ed and must exist. Only successful resolutions are
    /// remembered in the MRU.
    pub async fn locate(&self, path: &str) -> Result<PathInfo, LocateError> {
        if let Some(info) = self.mru().touch(path) {
            trace!(path, cached = info.cached, "locate served from mru");
            return Ok(info);
        }

        let cacheable = self.filter.is_match(io::basename(path));
        let cache_path = io::physical(&self.cache_root, path);
        let located = match tokio::fs::symlink_metadata(&cache_path).await {
            Ok(md) => (cache_path, true, md),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                let source_path = io::physical(&self.source_root, path);
                let md = tokio::fs::symlink_metadata(&source_path)
                    .await
                    .map_err(|source| LocateError {
                        path: path.to_owned(),
                        source,
                    })?;
                (source_path, false, md)
            }
            Err(source) => {
                return Err(LocateError {
                    path: path.to_owned(),
                    source,
                });
            }
        };

        let (fullpath, cached, md) = located;
        let stats = PathStats::from_metadata(&md).map_err(|source| LocateError {
            path: path.to_owned(),
            source,
        })?;
        let info = PathInfo {
            path: path.to_owned(),
            fullpath,
            cached,
            cacheable,
            stats,
        };
        self.mru().insert(info.clone());
        Ok(info)
    }

    /// Forget any remembered resolution for `path`. Called after a copy
    /// lands so the next locate observes the cache file.
    pub fn invalidate(&self, path: &str) {
        self.mru().remove(path);
    }

    /// Re-point a remembered resolution at the source ahead of an
    /// eviction, so a locate racing the unlink never returns a cached
    /// path that is about to disappear.
    pub fn mark_uncached(&self, path: &str) {
        let mut mru = self.mru();
        if let Some(info) = mru.peek_mut(path) {
            info.cached = false;
            info.fullpath = io::physical(&self.source_root, path);
        }
    }

    /// Forget every remembered resolution. Called after a cleaner sweep.
    pub fn clear(&self) {
        self.mru().clear();
    }

    /// Number of remembered resolutions.
    #[doc(hidden)]
    #[must_use]
    pub fn remembered(&self) -> usize {
        self.mru().len()
    }
}
