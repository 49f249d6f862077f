//! Bounded most-recently-used map of locate results.

use hashlink::LinkedHashMap;

use crate::cache::locator::PathInfo;

/// Insertion-ordered path → [`PathInfo`] map, bounded by capacity.
///
/// A hit moves the entry to the most-recently-used end; inserting past
/// capacity evicts from the least-recently-used end. Only successful
/// locate results are stored, so this amortizes repeated `stat` calls
/// without ever caching a negative answer.
pub struct MruCache {
    entries: LinkedHashMap<String, PathInfo>,
    capacity: usize,
}

impl MruCache {
    /// An empty cache holding at most `capacity` entries.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: LinkedHashMap::new(),
            capacity,
        }
    }

    /// Look up `path`, refreshing its recency on a hit.
    pub fn touch(&mut self, path: &str) -> Option<PathInfo> {
        let info = self.entries.remove(path)?;
        self.entries.insert(info.path.clone(), info.clone());
        Some(info)
    }

    /// Insert a locate result at the MRU end, evicting the oldest
    /// entries if the cache is over capacity.
    pub fn insert(&mut self, info: PathInfo) {
        self.entries.remove(&info.path);
        self.entries.insert(info.path.clone(), info);
        while self.entries.len() > self.capacity {
            self.entries.pop_front();
        }
    }

    /// Mutable access to an entry without touching its recency. Policy
    /// writes (eviction re-pointing) are not accesses.
    pub fn peek_mut(&mut self, path: &str) -> Option<&mut PathInfo> {
        self.entries.get_mut(path)
    }

    /// Drop the entry for `path`, if any.
    pub fn remove(&mut self, path: &str) {
        self.entries.remove(path);
    }

    /// Drop every entry.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Number of live entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when no entries are cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::time::SystemTime;

    use super::*;
    use crate::cache::locator::PathStats;

    fn info(path: &str) -> PathInfo {
        PathInfo {
            path: path.to_owned(),
            fullpath: PathBuf::from(path),
            cached: false,
            cacheable: true,
            stats: PathStats {
                size: 1,
                is_dir: false,
                atime: SystemTime::UNIX_EPOCH,
                mtime: SystemTime::UNIX_EPOCH,
            },
        }
    }

    #[test]
    fn insert_past_capacity_evicts_the_oldest() {
        let mut mru = MruCache::new(2);
        mru.insert(info("/a"));
        mru.insert(info("/b"));
        mru.insert(info("/c"));

        assert_eq!(mru.len(), 2, "capacity must bound the entry count");
        assert!(mru.touch("/a").is_none(), "/a was the oldest entry");
        assert!(mru.touch("/b").is_some());
        assert!(mru.touch("/c").is_some());
    }

    #[test]
    fn touch_refreshes_recency() {
        let mut mru = MruCache::new(2);
        mru.insert(info("/a"));
        mru.insert(info("/b"));
        assert!(mru.touch("/a").is_some());
        mru.insert(info("/c"));

        assert!(mru.touch("/a").is_some(), "/a was touched and must survive");
        assert!(mru.touch("/b").is_none(), "/b became the oldest entry");
    }

    #[test]
    fn reinserting_a_path_does_not_duplicate_it() {
        let mut mru = MruCache::new(4);
        mru.insert(info("/a"));
        mru.insert(info("/a"));

        assert_eq!(mru.len(), 1, "same path must occupy one slot");
    }

    #[test]
    fn peek_mut_does_not_refresh_recency() {
        let mut mru = MruCache::new(2);
        mru.insert(info("/a"));
        mru.insert(info("/b"));
        assert!(mru.peek_mut("/a").is_some());
        mru.insert(info("/c"));

        assert!(mru.touch("/a").is_none(), "peek must not save /a from eviction");
    }

    #[test]
    fn zero_capacity_disables_caching() {
        let mut mru = MruCache::new(0);
        mru.insert(info("/a"));

        assert!(mru.is_empty(), "a zero-capacity cache holds nothing");
    }
}
