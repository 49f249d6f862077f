//! Filesystem helpers shared by the locator, worker and cleaner.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use nix::sys::time::TimeVal;

/// Resolve a virtual path (mount-relative, `/`-separated, leading slash)
/// against a physical root directory.
#[must_use]
pub fn physical(root: &Path, vpath: &str) -> PathBuf {
    root.join(vpath.trim_start_matches('/'))
}

/// Final component of a virtual path.
#[must_use]
pub fn basename(vpath: &str) -> &str {
    vpath.rsplit('/').next().unwrap_or(vpath)
}

/// Parent of a virtual path. The parent of a top-level entry is `/`.
#[must_use]
pub fn parent(vpath: &str) -> &str {
    match vpath.trim_end_matches('/').rsplit_once('/') {
        Some(("", _)) | None => "/",
        Some((dir, _)) => dir,
    }
}

/// Join a virtual directory and a child name.
#[must_use]
pub fn join(vdir: &str, name: &str) -> String {
    if vdir == "/" {
        format!("/{name}")
    } else {
        format!("{vdir}/{name}")
    }
}

/// Name of the staging file a copy is written to before it is renamed
/// into place. Lives in the destination directory so the rename cannot
/// cross filesystems.
#[must_use]
pub fn staging_name(dst: &Path) -> PathBuf {
    let name = dst.file_name().map_or_else(
        || String::from(".aheadfs.partial"),
        |n| format!(".{}.partial", n.to_string_lossy()),
    );
    dst.with_file_name(name)
}

// Unix timestamps fit in time_t/suseconds_t on supported platforms.
#[allow(clippy::cast_possible_wrap, clippy::cast_possible_truncation)]
fn to_timeval(t: SystemTime) -> TimeVal {
    let since_epoch = t
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or(Duration::ZERO);
    TimeVal::new(
        since_epoch.as_secs() as libc::time_t,
        i64::from(since_epoch.subsec_micros()) as libc::suseconds_t,
    )
}

/// Set a file's access and modification times.
///
/// Used after a copy so that cleaner age calculations reflect the source
/// file's timestamps rather than the moment it was cached.
pub fn set_file_times(path: &Path, atime: SystemTime, mtime: SystemTime) -> std::io::Result<()> {
    nix::sys::stat::utimes(path, &to_timeval(atime), &to_timeval(mtime))
        .map_err(std::io::Error::from)
}

/// Remove empty directories above `path`, walking upward until `stop`
/// (exclusive) or the first non-empty directory.
///
/// `NotFound` on a parent means a concurrent eviction already pruned it;
/// the walk continues upward.
pub async fn remove_empty_parents(path: &Path, stop: &Path) -> std::io::Result<()> {
    let mut dir = path.parent();
    while let Some(d) = dir {
        if d == stop || !d.starts_with(stop) {
            break;
        }
        match tokio::fs::remove_dir(d).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::DirectoryNotEmpty => break,
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }
        dir = d.parent();
    }
    Ok(())
}
