//! Construction-time settings for the caching engine.

use std::path::PathBuf;
use std::time::Duration;

use regex::Regex;

/// Default cacheability filter: lossless audio tracks.
fn default_preload_filter() -> Regex {
    Regex::new(r"^.*\.flac$")
        .unwrap_or_else(|e| unreachable!("default preload filter is a valid regex: {e}"))
}

/// Everything the engine needs to know, fixed at construction.
///
/// The mount adapter and CLI live above this layer; the engine itself is
/// configured once and holds no mutable global state.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Slow upstream directory, authoritative for contents.
    pub source_root: PathBuf,

    /// Fast local directory mirroring a subset of the source tree.
    pub cache_root: PathBuf,

    /// How many lexical successors to cache alongside a triggered file.
    pub preload_siblings: usize,

    /// Basename filter deciding which files participate in preloading.
    pub preload_filter: Regex,

    /// Percentage of a file's size that must be read before the
    /// read-volume trigger fires. `0` fires on the first byte.
    pub preload_read_percent: u8,

    /// How long a file must be held open before the hold-open trigger
    /// fires. `Duration::ZERO` fires immediately on open.
    pub preload_open: Duration,

    /// Cache entries whose access time is older than this are evicted by
    /// the cleaner.
    pub clean_after: Duration,

    /// Basename filter for files the cleaner must never evict.
    pub clean_ignore: Option<Regex>,

    /// Capacity of the locate-result MRU.
    pub mru_size: usize,
}

impl Settings {
    /// Settings with the stock policy: preload `*.flac` plus the next 3
    /// siblings after 2 s held open or 50 % read, evict after 6 h idle.
    #[must_use]
    pub fn new(source_root: PathBuf, cache_root: PathBuf) -> Self {
        Self {
            source_root,
            cache_root,
            preload_siblings: 3,
            preload_filter: default_preload_filter(),
            preload_read_percent: 50,
            preload_open: Duration::from_millis(2000),
            clean_after: Duration::from_secs(6 * 3600),
            clean_ignore: None,
            mru_size: 10,
        }
    }
}
