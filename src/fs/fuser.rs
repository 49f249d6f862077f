//! FUSE adapter: maps [`fuser::Filesystem`] callbacks onto the engine.
//!
//! The adapter is a read-only passthrough. Attribute and lookup traffic
//! routes through [`Engine::locate`] so reads land on the cache copy
//! whenever one exists; open/read/release are reported to the engine so
//! the preload policy can observe them. Write-class operations answer
//! `EROFS`.

use std::ffi::OsStr;
use std::future::Future;
use std::io::ErrorKind;
use std::os::unix::fs::FileExt as _;
use std::sync::Arc;

use tracing::Instrument as _;
use tracing::{debug, error};

use aheadfs::{Engine, LocateError, PathInfo, io as vio};

use crate::fs::inode_table::{HandleTable, InodeTable};

/// Convert an I/O error to the corresponding errno value for FUSE replies.
/// `ErrorKind` is non_exhaustive; `EIO` is the safe default.
fn io_to_errno(e: &std::io::Error) -> i32 {
    e.raw_os_error().unwrap_or_else(|| match e.kind() {
        ErrorKind::NotFound => libc::ENOENT,
        ErrorKind::PermissionDenied => libc::EACCES,
        ErrorKind::AlreadyExists => libc::EEXIST,
        _ => libc::EIO,
    })
}

fn locate_errno(e: &LocateError) -> i32 {
    io_to_errno(&e.source)
}

/// How long the kernel may cache attrs and entries. Kept short because
/// a preload can move a path from source to cache at any moment.
const ATTR_TTL: std::time::Duration = std::time::Duration::from_secs(1);

const BLOCK_SIZE: u32 = 4096;

/// Convert a located path to the fuser attribute record.
fn info_to_attr(ino: u64, info: &PathInfo, owner: (u32, u32)) -> fuser::FileAttr {
    let (kind, perm) = if info.stats.is_dir {
        (fuser::FileType::Directory, 0o555)
    } else {
        (fuser::FileType::RegularFile, 0o444)
    };
    fuser::FileAttr {
        ino,
        size: info.stats.size,
        blocks: info.stats.size.div_ceil(512),
        atime: info.stats.atime,
        mtime: info.stats.mtime,
        ctime: info.stats.mtime,
        crtime: info.stats.mtime,
        kind,
        perm,
        nlink: 1,
        uid: owner.0,
        gid: owner.1,
        rdev: 0,
        blksize: BLOCK_SIZE,
        flags: 0,
    }
}

/// Fill `buf` from `file` at `offset`, tolerating short reads. Returns
/// the number of bytes actually read (less than `buf.len()` only at
/// end of file).
fn read_fully(file: &std::fs::File, mut offset: u64, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match file.read_at(&mut buf[filled..], offset) {
            Ok(0) => break,
            Ok(n) => {
                filled += n;
                offset += n as u64;
            }
            Err(e) if e.kind() == ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

struct AdapterState {
    engine: Arc<Engine>,
    inodes: InodeTable,
    handles: HandleTable,
    open_files: scc::HashMap<u64, Arc<std::fs::File>>,
    owner: (u32, u32),
}

/// The union mount's `fuser::Filesystem` implementation.
///
/// Every callback spawns a task on the daemon runtime and moves the
/// reply into it, so the FUSE dispatch thread never blocks on source
/// IO.
pub struct AheadFuse {
    state: Arc<AdapterState>,
    runtime: tokio::runtime::Handle,
}

impl AheadFuse {
    /// Wrap the engine for mounting.
    pub fn new(engine: Arc<Engine>, runtime: tokio::runtime::Handle) -> Self {
        Self {
            state: Arc::new(AdapterState {
                engine,
                inodes: InodeTable::new(),
                handles: HandleTable::new(),
                open_files: scc::HashMap::new(),
                owner: (
                    nix::unistd::Uid::current().as_raw(),
                    nix::unistd::Gid::current().as_raw(),
                ),
            }),
            runtime,
        }
    }

    fn spawn<Fut>(
        &self,
        span: tracing::Span,
        f: impl FnOnce(Arc<AdapterState>) -> Fut + Send + 'static,
    ) where
        Fut: Future<Output = ()> + Send + 'static,
    {
        let state = Arc::clone(&self.state);
        self.runtime.spawn(f(state).instrument(span));
    }
}

impl fuser::Filesystem for AheadFuse {
    fn lookup(
        &mut self,
        _req: &fuser::Request<'_>,
        parent: u64,
        name: &OsStr,
        reply: fuser::ReplyEntry,
    ) {
        let name = name.to_owned();
        let span = tracing::debug_span!("AheadFuse::lookup", parent, ?name);
        self.spawn(span, move |state| async move {
            let Some(parent_path) = state.inodes.path_of(parent) else {
                reply.error(libc::ENOENT);
                return;
            };
            let Some(name) = name.to_str() else {
                reply.error(libc::ENOENT);
                return;
            };
            let vpath = vio::join(&parent_path, name);
            match state.engine.locate(&vpath).await {
                Ok(info) => {
                    let ino = state.inodes.ino_for(&vpath);
                    let attr = info_to_attr(ino, &info, state.owner);
                    debug!(?attr, "replying...");
                    reply.entry(&ATTR_TTL, &attr, 0);
                }
                Err(e) => {
                    debug!(error = %e, "replying error");
                    reply.error(locate_errno(&e));
                }
            }
        });
    }

    fn getattr(
        &mut self,
        _req: &fuser::Request<'_>,
        ino: u64,
        _fh: Option<u64>,
        reply: fuser::ReplyAttr,
    ) {
        let span = tracing::debug_span!("AheadFuse::getattr", ino);
        self.spawn(span, move |state| async move {
            let Some(vpath) = state.inodes.path_of(ino) else {
                reply.error(libc::ENOENT);
                return;
            };
            match state.engine.locate(&vpath).await {
                Ok(info) => reply.attr(&ATTR_TTL, &info_to_attr(ino, &info, state.owner)),
                Err(e) => {
                    debug!(error = %e, "replying error");
                    reply.error(locate_errno(&e));
                }
            }
        });
    }

    fn open(&mut self, _req: &fuser::Request<'_>, ino: u64, flags: i32, reply: fuser::ReplyOpen) {
        let span = tracing::debug_span!("AheadFuse::open", ino);
        self.spawn(span, move |state| async move {
            if flags & libc::O_ACCMODE != libc::O_RDONLY {
                reply.error(libc::EROFS);
                return;
            }
            let Some(vpath) = state.inodes.path_of(ino) else {
                reply.error(libc::ENOENT);
                return;
            };

            let info = match state.engine.locate(&vpath).await {
                Ok(info) => info,
                Err(e) => {
                    debug!(error = %e, "replying error");
                    reply.error(locate_errno(&e));
                    return;
                }
            };
            let fullpath = info.fullpath.clone();
            let opened =
                tokio::task::spawn_blocking(move || std::fs::File::open(&fullpath)).await;
            let file = match opened {
                Ok(Ok(file)) => file,
                Ok(Err(e)) => {
                    debug!(error = %e, "replying error");
                    reply.error(io_to_errno(&e));
                    return;
                }
                Err(e) => {
                    error!(error = %e, "open task failed");
                    reply.error(libc::EIO);
                    return;
                }
            };

            let fh = state.handles.allocate();
            if let Err(e) = state.engine.on_open(fh, &vpath).await {
                debug!(error = %e, "replying error");
                reply.error(locate_errno(&e));
                return;
            }
            let _ = state.open_files.insert_async(fh, Arc::new(file)).await;
            debug!(handle = fh, "replying...");
            reply.opened(fh, 0);
        });
    }

    fn read(
        &mut self,
        _req: &fuser::Request<'_>,
        _ino: u64,
        fh: u64,
        offset: i64,
        size: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: fuser::ReplyData,
    ) {
        let span = tracing::debug_span!("AheadFuse::read", fh, offset, size);
        self.spawn(span, move |state| async move {
            let Some(file) = state
                .open_files
                .read_async(&fh, |_, file| Arc::clone(file))
                .await
            else {
                reply.error(libc::EBADF);
                return;
            };

            let offset = offset.cast_unsigned();
            let read = tokio::task::spawn_blocking(move || {
                let mut buf = vec![0u8; size as usize];
                read_fully(&file, offset, &mut buf).map(|n| {
                    buf.truncate(n);
                    buf
                })
            })
            .await;
            match read {
                Ok(Ok(data)) => {
                    state.engine.on_read(fh, data.len() as u64);
                    debug!(read_bytes = data.len(), "replying...");
                    reply.data(&data);
                }
                Ok(Err(e)) => {
                    debug!(error = %e, "replying error");
                    reply.error(io_to_errno(&e));
                }
                Err(e) => {
                    error!(error = %e, "read task failed");
                    reply.error(libc::EIO);
                }
            }
        });
    }

    fn release(
        &mut self,
        _req: &fuser::Request<'_>,
        _ino: u64,
        fh: u64,
        _flags: i32,
        _lock_owner: Option<u64>,
        _flush: bool,
        reply: fuser::ReplyEmpty,
    ) {
        let span = tracing::debug_span!("AheadFuse::release", fh);
        self.spawn(span, move |state| async move {
            state.engine.on_close(fh);
            if state.open_files.remove_async(&fh).await.is_some() {
                debug!("replying ok");
                reply.ok();
            } else {
                debug!("file handle not open, replying error");
                reply.error(libc::EBADF);
            }
        });
    }

    fn readdir(
        &mut self,
        _req: &fuser::Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        mut reply: fuser::ReplyDirectory,
    ) {
        let span = tracing::debug_span!("AheadFuse::readdir", ino, offset);
        self.spawn(span, move |state| async move {
            let Some(vpath) = state.inodes.path_of(ino) else {
                reply.error(libc::ENOENT);
                return;
            };
            let names = match state.engine.readdir(&vpath).await {
                Ok(names) => names,
                Err(e) => {
                    debug!(error = %e, "replying error");
                    reply.error(io_to_errno(&e));
                    return;
                }
            };

            #[expect(
                clippy::cast_possible_truncation,
                reason = "fuser offset is i64 but always non-negative"
            )]
            let skip = offset.cast_unsigned() as usize;
            for (i, name) in names.iter().enumerate().skip(skip) {
                let child = vio::join(&vpath, name);
                // Directory listings only need the entry type; a locate
                // failure here just means the kernel will find out via
                // lookup instead.
                let kind = match state.engine.locate(&child).await {
                    Ok(info) if info.stats.is_dir => fuser::FileType::Directory,
                    Ok(_) | Err(_) => fuser::FileType::RegularFile,
                };
                let child_ino = state.inodes.ino_for(&child);
                let Ok(idx): Result<i64, _> = (i + 1).try_into() else {
                    error!("Directory entry index {} too large for fuser", i + 1);
                    reply.error(libc::EIO);
                    return;
                };
                if reply.add(child_ino, idx, kind, name) {
                    debug!("buffer full for now, stopping readdir");
                    break;
                }
            }
            reply.ok();
        });
    }

    fn statfs(&mut self, _req: &fuser::Request<'_>, _ino: u64, reply: fuser::ReplyStatfs) {
        // Synthetic: the union has no meaningful capacity of its own.
        reply.statfs(0, 0, 0, 0, 0, BLOCK_SIZE, 255, 0);
    }

    fn setattr(
        &mut self,
        _req: &fuser::Request<'_>,
        _ino: u64,
        _mode: Option<u32>,
        _uid: Option<u32>,
        _gid: Option<u32>,
        _size: Option<u64>,
        _atime: Option<fuser::TimeOrNow>,
        _mtime: Option<fuser::TimeOrNow>,
        _ctime: Option<std::time::SystemTime>,
        _fh: Option<u64>,
        _crtime: Option<std::time::SystemTime>,
        _chgtime: Option<std::time::SystemTime>,
        _bkuptime: Option<std::time::SystemTime>,
        _flags: Option<u32>,
        reply: fuser::ReplyAttr,
    ) {
        reply.error(libc::EROFS);
    }

    fn mkdir(
        &mut self,
        _req: &fuser::Request<'_>,
        _parent: u64,
        _name: &OsStr,
        _mode: u32,
        _umask: u32,
        reply: fuser::ReplyEntry,
    ) {
        reply.error(libc::EROFS);
    }

    fn unlink(
        &mut self,
        _req: &fuser::Request<'_>,
        _parent: u64,
        _name: &OsStr,
        reply: fuser::ReplyEmpty,
    ) {
        reply.error(libc::EROFS);
    }

    fn rmdir(
        &mut self,
        _req: &fuser::Request<'_>,
        _parent: u64,
        _name: &OsStr,
        reply: fuser::ReplyEmpty,
    ) {
        reply.error(libc::EROFS);
    }

    fn rename(
        &mut self,
        _req: &fuser::Request<'_>,
        _parent: u64,
        _name: &OsStr,
        _newparent: u64,
        _newname: &OsStr,
        _flags: u32,
        reply: fuser::ReplyEmpty,
    ) {
        reply.error(libc::EROFS);
    }

    fn write(
        &mut self,
        _req: &fuser::Request<'_>,
        _ino: u64,
        _fh: u64,
        _offset: i64,
        _data: &[u8],
        _write_flags: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: fuser::ReplyWrite,
    ) {
        reply.error(libc::EROFS);
    }

    fn create(
        &mut self,
        _req: &fuser::Request<'_>,
        _parent: u64,
        _name: &OsStr,
        _mode: u32,
        _umask: u32,
        _flags: i32,
        reply: fuser::ReplyCreate,
    ) {
        reply.error(libc::EROFS);
    }
}
