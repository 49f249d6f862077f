//! Mount a slow media share with a transparent read-ahead cache.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing::error;

mod app_config;
mod daemon;
mod fs;
mod fuse_check;
mod report;
mod trc;

use crate::app_config::{Config, ExpandedPathBuf};
use crate::trc::{Trc, TrcHandle};

#[derive(Parser)]
#[command(
    version,
    about = "Read-ahead caching union filesystem for slow media shares."
)]
struct Args {
    #[arg(short, long, value_parser, help = "Optional path to a config TOML.")]
    config_path: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Mount the filesystem and run until stopped.
    Run {
        /// Run the daemon in the background.
        #[arg(short, long, help = "Run the daemon in the background.")]
        daemonize: bool,

        /// The slow source directory. Overrides the config file.
        source: Option<PathBuf>,

        /// The mount point. Overrides the config file.
        mount_point: Option<PathBuf>,
    },

    /// Ask a running daemon to sweep its cache now.
    Clean,
}

/// Initialize tracing. Exits the process on failure.
#[expect(
    clippy::exit,
    reason = "top-level helper that intentionally terminates the process"
)]
fn init_tracing() -> TrcHandle {
    Trc::default().init().unwrap_or_else(|e| {
        eprintln!(
            "Failed to initialize logging. Without logging, we can't provide any useful error \
             messages, so we have to exit: {e}"
        );
        std::process::exit(1);
    })
}

/// Main entry point for the application.
#[expect(
    clippy::exit,
    reason = "main reports fatal startup errors and terminates"
)]
fn main() {
    let args = Args::parse();

    // Load config first — errors use eprintln since tracing isn't initialized yet.
    let mut config = Config::load_or_create(args.config_path.as_deref()).unwrap_or_else(|e| {
        eprintln!("Failed to load configuration: {e}");
        std::process::exit(1);
    });

    let command = args.command.unwrap_or(Command::Run {
        daemonize: false,
        source: None,
        mount_point: None,
    });

    match command {
        Command::Run {
            daemonize,
            source,
            mount_point,
        } => {
            if let Some(source) = source {
                config.source = Some(ExpandedPathBuf::new(source));
            }
            if let Some(mount_point) = mount_point {
                config.mount_point = Some(ExpandedPathBuf::new(mount_point));
            }
            if let Err(error_messages) = config.validate() {
                eprintln!("Configuration is invalid.");
                for msg in &error_messages {
                    eprintln!(" - {msg}");
                }
                std::process::exit(1);
            }
            if let Err(e) = fuse_check::ensure_fuse() {
                eprintln!("{e}");
                std::process::exit(1);
            }

            if daemonize {
                run_daemonized(config);
            } else {
                let _trc_handle = init_tracing();
                if let Err(e) = daemon::spawn(config) {
                    error!("Daemon failed: {e}");
                    std::process::exit(1);
                }
            }
        }
        Command::Clean => {
            if let Err(e) = request_clean(&config) {
                eprintln!("Failed to request a cache sweep: {e}");
                std::process::exit(1);
            }
            println!("Requested a cache sweep.");
        }
    }
}

/// Signal the running daemon (via its PID file) to sweep the cache.
fn request_clean(config: &Config) -> Result<(), std::io::Error> {
    let pid_file = &config.daemon.pid_file;
    let raw = std::fs::read_to_string(pid_file)?;
    let pid: i32 = raw.trim().parse().map_err(|_| {
        std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("PID file '{}' does not contain a PID.", pid_file.display()),
        )
    })?;
    nix::sys::signal::kill(
        nix::unistd::Pid::from_raw(pid),
        nix::sys::signal::Signal::SIGUSR1,
    )
    .map_err(std::io::Error::from)
}

/// Run the daemon in the background. Tracing is initialized *after* the
/// fork so its worker state belongs to the child process.
#[expect(
    clippy::exit,
    reason = "top-level helper that intentionally terminates the process"
)]
fn run_daemonized(config: Config) {
    // Pre-fork: no tracing yet. Use eprintln! for error reporting.
    let pid_file_parent = config
        .daemon
        .pid_file
        .parent()
        .unwrap_or_else(|| unreachable!("Config::validate() ensures pid_file has a parent"));
    if let Err(e) = std::fs::create_dir_all(pid_file_parent) {
        eprintln!("Failed to create PID file directory: {e}");
        std::process::exit(1);
    }

    let log_file = match config.daemon.log.target.open_log_file() {
        Ok(f) => f,
        Err(e) => {
            eprintln!("Failed to open log file: {e}");
            std::process::exit(1);
        }
    };

    let mut daemonize = daemonize::Daemonize::new().pid_file(&*config.daemon.pid_file);

    if let Some(file) = log_file {
        match file.try_clone() {
            Ok(clone) => {
                daemonize = daemonize.stdout(file).stderr(clone);
            }
            Err(e) => {
                eprintln!("Failed to clone log file handle: {e}");
                std::process::exit(1);
            }
        }
    }

    match daemonize.start() {
        Ok(()) => {
            let trc_handle = init_tracing();
            trc_handle.reconfigure_for_daemon(config.daemon.log.should_use_color());

            if let Err(e) = daemon::spawn(config) {
                error!("Daemon failed: {e}");
                std::process::exit(1);
            }
        }
        Err(e) => {
            eprintln!("Failed to spawn the daemon: {e}");
            std::process::exit(1);
        }
    }
}
