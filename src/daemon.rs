//! Daemon lifecycle: runtime, mount, signals, periodic sweep.

use std::sync::Arc;
use std::time::Duration;

use tokio::select;
use tracing::{debug, info};

use aheadfs::Engine;

use crate::app_config;
use crate::report;

mod managed_fuse {
    //! Owns the FUSE session and forces an unmount on drop. fuser only
    //! performs a regular unmount when the `BackgroundSession` drops,
    //! which leaves a dead mount point behind if anything still holds
    //! the filesystem busy; we retry a forced unmount instead.

    use std::path::PathBuf;
    use std::sync::Arc;
    use std::time::Duration;

    use fuser::BackgroundSession;
    use nix::errno::Errno;
    use tracing::{debug, error};

    use aheadfs::Engine;

    use super::app_config;
    use crate::fs::fuser::AheadFuse;

    pub struct FuseScope {
        _session: BackgroundSession,
    }

    impl FuseScope {
        fn spawn(
            config: &app_config::Config,
            engine: Arc<Engine>,
            handle: tokio::runtime::Handle,
        ) -> Result<Self, std::io::Error> {
            let mount_point = config.mount_point.as_deref().ok_or_else(|| {
                std::io::Error::new(std::io::ErrorKind::InvalidInput, "no mount point configured")
            })?;

            let adapter = AheadFuse::new(engine, handle);
            let mount_opts = [
                fuser::MountOption::FSName("aheadfs".to_owned()),
                fuser::MountOption::RO,
                fuser::MountOption::NoDev,
                fuser::MountOption::NoSuid,
                fuser::MountOption::AutoUnmount,
                fuser::MountOption::DefaultPermissions,
            ];

            Ok(Self {
                _session: fuser::spawn_mount2(adapter, mount_point, &mount_opts)?,
            })
        }
    }

    pub struct ManagedFuse {
        mount_point: PathBuf,
    }

    impl ManagedFuse {
        pub fn new(mount_point: PathBuf) -> Self {
            Self { mount_point }
        }

        pub fn spawn(
            &self,
            config: &app_config::Config,
            engine: Arc<Engine>,
            handle: tokio::runtime::Handle,
        ) -> Result<FuseScope, std::io::Error> {
            _ = self; // self used for calling convention.
            FuseScope::spawn(config, engine, handle)
        }
    }

    impl Drop for ManagedFuse {
        fn drop(&mut self) {
            const UMOUNT_ATTEMPT_COUNT: usize = 10;
            const UMOUNT_ATTEMPT_DELAY: Duration = Duration::from_millis(10);

            debug!(mount_point = ?self.mount_point, "Confirming unmount of FUSE filesystem...");

            for i in 0..UMOUNT_ATTEMPT_COUNT {
                let result = {
                    #[cfg(target_os = "macos")]
                    {
                        nix::mount::unmount(&self.mount_point, nix::mount::MntFlags::MNT_FORCE)
                    }

                    #[cfg(target_os = "linux")]
                    {
                        nix::mount::umount2(&self.mount_point, nix::mount::MntFlags::MNT_DETACH)
                    }
                };

                match result {
                    Ok(()) => {
                        debug!("Successfully unmounted FUSE filesystem on attempt {}", i + 1);
                        break;
                    }
                    Err(Errno::EBUSY) => {
                        debug!("FUSE filesystem still busy on attempt {}. Retrying...", i + 1);
                        std::thread::sleep(UMOUNT_ATTEMPT_DELAY);
                    }
                    Err(Errno::EINVAL | Errno::ENOENT) => {
                        debug!("FUSE filesystem already unmounted (attempt {})", i + 1);
                        break;
                    }
                    Err(e) => {
                        error!("Failed to unmount FUSE filesystem on attempt {}: {}", i + 1, e);
                        break;
                    }
                }
            }
        }
    }
}

/// Prepares the mount point directory.
///
/// - If the directory exists and is non-empty, returns an error.
/// - If the directory does not exist, creates it (including parents).
/// - If the directory exists and is empty, does nothing.
async fn prepare_mount_point(mount_point: &std::path::Path) -> Result<(), std::io::Error> {
    match tokio::fs::read_dir(mount_point).await {
        Ok(mut entries) => {
            if entries.next_entry().await?.is_some() {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::AlreadyExists,
                    format!(
                        "Mount point '{}' already exists and is not empty.",
                        mount_point.display()
                    ),
                ));
            }
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tokio::fs::create_dir_all(mount_point).await?;
            info!(path = %mount_point.display(), "Created mount point directory.");
            Ok(())
        }
        Err(e) => Err(e),
    }
}

/// Periodically enqueue a cache sweep. The first sweep runs right away
/// so a restart immediately reconciles a cache left over from the
/// previous run.
fn spawn_cleaner(engine: Arc<Engine>, every: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(every);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tick.tick().await;
            debug!("cleaner tick");
            engine.request_clean();
        }
    })
}

/// Block until a stop signal arrives. Clean-request signals are served
/// in place without returning.
async fn wait_for_exit(engine: &Engine) -> Result<(), std::io::Error> {
    use tokio::signal;
    let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())?;
    let mut sighup = signal::unix::signal(signal::unix::SignalKind::hangup())?;
    let mut sigusr1 = signal::unix::signal(signal::unix::SignalKind::user_defined1())?;
    loop {
        select! {
            _ = signal::ctrl_c() => {
                debug!("Received Ctrl+C signal, shutting down...");
                return Ok(());
            },
            _ = sigterm.recv() => {
                debug!("Received termination signal, shutting down...");
                return Ok(());
            },
            _ = sighup.recv() => {
                info!("Received hangup signal, requesting a cache sweep.");
                engine.request_clean();
            },
            _ = sigusr1.recv() => {
                info!("Received SIGUSR1, requesting a cache sweep.");
                engine.request_clean();
            },
        }
    }
}

/// Main entry point for the daemon.
pub async fn run(
    config: app_config::Config,
    handle: tokio::runtime::Handle,
) -> Result<(), std::io::Error> {
    let settings = config.settings();
    let clean_interval = Duration::from_secs(config.clean.interval_secs);

    tokio::fs::create_dir_all(&settings.cache_root).await?;
    let mount_point = config.mount_point.as_deref().ok_or_else(|| {
        std::io::Error::new(std::io::ErrorKind::InvalidInput, "no mount point configured")
    })?;
    prepare_mount_point(mount_point).await?;

    info!(
        source = %settings.source_root.display(),
        cache = %settings.cache_root.display(),
        "Mounting union filesystem at {}.",
        mount_point.display()
    );

    let engine = Arc::new(Engine::new(settings));
    let reporter = report::spawn(&engine);
    let cleaner = spawn_cleaner(Arc::clone(&engine), clean_interval);

    let fuse = managed_fuse::ManagedFuse::new(mount_point.to_path_buf());
    {
        let _session = fuse.spawn(&config, Arc::clone(&engine), handle)?;
        info!("aheadfs is running. Press Ctrl+C to stop.");

        wait_for_exit(&engine).await?;
    }

    cleaner.abort();
    reporter.abort();
    Ok(())
}

/// Build the runtime and drive [`run`] to completion.
pub fn spawn(config: app_config::Config) -> Result<(), std::io::Error> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .unwrap_or_else(|e| panic!("Failed to create Tokio runtime: {e}"));
    runtime.block_on(run(config, runtime.handle().clone()))
}
