//! FUSE availability checks for macOS.

#[cfg(target_os = "macos")]
use std::path::Path;

#[cfg(target_os = "macos")]
mod paths {
    pub const MACFUSE_FS_BUNDLE: &str = "/Library/Filesystems/macfuse.fs";
    pub const MACFUSE_MOUNT_HELPER: &str =
        "/Library/Filesystems/macfuse.fs/Contents/Resources/mount_macfuse";
    pub const LIBFUSE_DYLIB: &str = "/usr/local/lib/libfuse.2.dylib";
}

/// Errors that can occur when verifying FUSE availability.
#[derive(Debug, thiserror::Error)]
pub enum FuseCheckError {
    /// macFUSE is not installed at all.
    #[error(
        "macFUSE is not installed. aheadfs requires macFUSE to mount filesystems.\n\
         Install it from: https://macfuse.github.io/"
    )]
    NotInstalled,

    /// The mount helper binary is missing.
    #[error(
        "macFUSE mount helper not found at {path}. Installation may be corrupt.\n\
         Reinstall from: https://macfuse.github.io/"
    )]
    MountHelperMissing {
        /// Path where the mount helper was expected.
        path: &'static str,
    },

    /// The libfuse shared library is missing.
    #[error(
        "macFUSE library missing at /usr/local/lib/libfuse.2.dylib. \
         macFUSE may have been partially uninstalled.\n\
         Reinstall from: https://macfuse.github.io/"
    )]
    LibfuseMissing,
}

/// Verify that FUSE is installed and usable on the current platform.
///
/// On macOS this checks for the macFUSE bundle, its mount helper and the
/// libfuse dylib. On other platforms this is a no-op.
#[cfg(target_os = "macos")]
pub fn ensure_fuse() -> Result<(), FuseCheckError> {
    if !Path::new(paths::MACFUSE_FS_BUNDLE).is_dir() {
        return Err(FuseCheckError::NotInstalled);
    }
    if !Path::new(paths::MACFUSE_MOUNT_HELPER).is_file() {
        return Err(FuseCheckError::MountHelperMissing {
            path: paths::MACFUSE_MOUNT_HELPER,
        });
    }
    if !Path::new(paths::LIBFUSE_DYLIB).exists() {
        return Err(FuseCheckError::LibfuseMissing);
    }
    Ok(())
}

/// Verify that FUSE is installed and usable on the current platform.
///
/// On non-macOS platforms this is a no-op.
#[cfg(not(target_os = "macos"))]
pub fn ensure_fuse() -> Result<(), FuseCheckError> {
    Ok(())
}
