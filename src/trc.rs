//! Tracing configuration and initialization.
//!
//! The subscriber is built with a [`reload::Layer`] wrapping the fmt
//! layer so the output format can be switched at runtime (compact
//! terminal output until the process daemonizes, plain verbose logging
//! after).

use std::io::IsTerminal;

use tracing_subscriber::{
    EnvFilter, Registry,
    fmt::format::FmtSpan,
    layer::SubscriberExt as _,
    reload,
    util::{SubscriberInitExt as _, TryInitError},
};

fn force_color() -> bool {
    std::env::var_os("FORCE_COLOR").is_some_and(|v| !v.is_empty())
}

fn no_color() -> bool {
    std::env::var_os("NO_COLOR").is_some_and(|v| !v.is_empty())
}

/// Whether colored output is appropriate for `stream`.
pub fn should_use_color<T: IsTerminal>(stream: &T) -> bool {
    force_color() || (stream.is_terminal() && !no_color())
}

/// The type-erased fmt layer that lives inside the reload handle.
type BoxedFmtLayer = Box<dyn tracing_subscriber::Layer<Registry> + Send + Sync>;

/// The reload handle type used to swap the fmt layer at runtime.
type FmtReloadHandle = reload::Handle<BoxedFmtLayer, Registry>;

/// Controls the output format of the tracing subscriber.
enum TrcMode {
    /// Compact, colorful, timestamp-free output for interactive use.
    Pretty { use_ansi: bool },
    /// Plain, verbose, machine-readable logging.
    Plain { use_ansi: bool },
}

fn fmt_layer(mode: &TrcMode) -> BoxedFmtLayer {
    match mode {
        TrcMode::Pretty { use_ansi } => Box::new(
            tracing_subscriber::fmt::layer()
                .with_ansi(*use_ansi)
                .with_target(false)
                .without_time()
                .compact(),
        ),
        TrcMode::Plain { use_ansi } => Box::new(
            tracing_subscriber::fmt::layer()
                .with_ansi(*use_ansi)
                .with_span_events(FmtSpan::ENTER | FmtSpan::CLOSE),
        ),
    }
}

/// A handle that allows reconfiguring the tracing subscriber at runtime.
pub struct TrcHandle {
    fmt_handle: FmtReloadHandle,
}

impl TrcHandle {
    /// Switch to the plain format, e.g. after daemonizing away from a
    /// terminal.
    pub fn reconfigure_for_daemon(&self, use_ansi: bool) {
        if let Err(e) = self.fmt_handle.reload(fmt_layer(&TrcMode::Plain { use_ansi })) {
            eprintln!("Failed to reconfigure tracing: {e}");
        }
    }
}

/// Builder for the tracing subscriber.
pub struct Trc {
    mode: TrcMode,
    env_filter: EnvFilter,
}

impl Default for Trc {
    fn default() -> Self {
        let use_ansi = should_use_color(&std::io::stderr());
        let maybe_env_filter =
            EnvFilter::try_from_env("AHEADFS_LOG").or_else(|_| EnvFilter::try_from_default_env());

        match maybe_env_filter {
            // A user who set a filter wants the full, greppable output.
            Ok(env_filter) => Self {
                mode: TrcMode::Plain { use_ansi },
                env_filter,
            },
            Err(_) => Self {
                mode: TrcMode::Pretty { use_ansi },
                env_filter: EnvFilter::new("info"),
            },
        }
    }
}

impl Trc {
    /// Initialize the global tracing subscriber and return a handle for
    /// runtime reconfiguration.
    pub fn init(self) -> Result<TrcHandle, TryInitError> {
        let (reload_layer, fmt_handle) = reload::Layer::new(fmt_layer(&self.mode));

        tracing_subscriber::registry()
            .with(reload_layer)
            .with(self.env_filter)
            .try_init()?;

        Ok(TrcHandle { fmt_handle })
    }
}
