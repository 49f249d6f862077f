//! Inode and file-handle bookkeeping for the FUSE adapter.

use std::sync::atomic::{AtomicU64, Ordering};

/// Maps FUSE inode numbers to virtual paths and back.
///
/// Inodes are allocated on first sight of a path and never recycled;
/// the table is bounded by the number of distinct paths the kernel has
/// asked about, which for a media library is small and stable.
pub struct InodeTable {
    by_ino: scc::HashMap<u64, String>,
    by_path: scc::HashMap<String, u64>,
    next: AtomicU64,
}

impl InodeTable {
    /// The root directory's inode, fixed by the FUSE protocol.
    pub const ROOT: u64 = 1;

    /// A table containing only the root mapping.
    pub fn new() -> Self {
        let by_ino = scc::HashMap::new();
        let by_path = scc::HashMap::new();
        let _ = by_ino.insert(Self::ROOT, "/".to_owned());
        let _ = by_path.insert("/".to_owned(), Self::ROOT);
        Self {
            by_ino,
            by_path,
            next: AtomicU64::new(Self::ROOT + 1),
        }
    }

    /// The inode for `vpath`, allocating one on first sight.
    pub fn ino_for(&self, vpath: &str) -> u64 {
        use scc::hash_map::Entry;

        match self.by_path.entry(vpath.to_owned()) {
            Entry::Occupied(occ) => *occ.get(),
            Entry::Vacant(vac) => {
                let ino = self.next.fetch_add(1, Ordering::Relaxed);
                vac.insert_entry(ino);
                let _ = self.by_ino.insert(ino, vpath.to_owned());
                ino
            }
        }
    }

    /// The virtual path behind `ino`, if the kernel ever learned it.
    pub fn path_of(&self, ino: u64) -> Option<String> {
        self.by_ino.read(&ino, |_, v| v.clone())
    }
}

impl Default for InodeTable {
    fn default() -> Self {
        Self::new()
    }
}

/// Monotonically increasing file handle allocator.
pub struct HandleTable {
    next_fh: AtomicU64,
}

impl HandleTable {
    /// An allocator starting at handle 1.
    pub fn new() -> Self {
        Self {
            next_fh: AtomicU64::new(1),
        }
    }

    /// Hand out the next handle.
    pub fn allocate(&self) -> u64 {
        self.next_fh.fetch_add(1, Ordering::Relaxed)
    }
}

impl Default for HandleTable {
    fn default() -> Self {
        Self::new()
    }
}
