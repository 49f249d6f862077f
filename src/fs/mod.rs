//! The FUSE face of the union mount.

/// `fuser::Filesystem` adapter over the engine.
pub mod fuser;
/// Inode and file-handle bookkeeping.
pub mod inode_table;
