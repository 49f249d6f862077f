//! Application configuration.
//!
//! User configurations may be specified in a TOML configuration file;
//! the mount essentials can also be given on the command line.

use std::path::{Path, PathBuf};
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use aheadfs::Settings;

/// A `PathBuf` that automatically expands `~` to the user's home
/// directory during deserialization, so that any path loaded from
/// configuration is already resolved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ExpandedPathBuf(PathBuf);

impl<'de> Deserialize<'de> for ExpandedPathBuf {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        let expanded = shellexpand::tilde(&raw);
        Ok(Self(PathBuf::from(expanded.into_owned())))
    }
}

impl ExpandedPathBuf {
    /// Wraps an already-resolved path without expansion.
    pub fn new(path: PathBuf) -> Self {
        Self(path)
    }
}

impl std::ops::Deref for ExpandedPathBuf {
    type Target = Path;

    fn deref(&self) -> &Path {
        &self.0
    }
}

impl AsRef<Path> for ExpandedPathBuf {
    fn as_ref(&self) -> &Path {
        &self.0
    }
}

impl std::fmt::Display for ExpandedPathBuf {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.display().fmt(f)
    }
}

/// A compiled regular expression that deserializes from its pattern
/// string and serializes back to it.
#[derive(Debug, Clone)]
pub struct RegexPattern(Regex);

impl RegexPattern {
    /// The compiled expression.
    #[must_use]
    pub fn as_regex(&self) -> &Regex {
        &self.0
    }
}

impl<'de> Deserialize<'de> for RegexPattern {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        Regex::new(&raw).map(Self).map_err(serde::de::Error::custom)
    }
}

impl Serialize for RegexPattern {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(self.0.as_str())
    }
}

impl PartialEq for RegexPattern {
    fn eq(&self, other: &Self) -> bool {
        self.0.as_str() == other.0.as_str()
    }
}

impl Eq for RegexPattern {}

/// Comment block written ahead of a generated default config so a first
/// run leaves behind a file that explains itself.
const DEFAULT_CONFIG_HEADER: &str = "\
# aheadfs configuration.
#
# `source` and `mount-point` must be set before the filesystem can run;
# either add them here or pass them on the command line:
#
#     source = \"/mnt/nas/music\"
#     mount-point = \"/home/you/music\"
#
";

fn aheadfs_runtime_dir() -> Option<PathBuf> {
    if let Some(path) = dirs::runtime_dir() {
        return Some(path.join("aheadfs"));
    }
    dirs::home_dir().map(|path| path.join(".local").join("share").join("aheadfs"))
}

fn default_pid_file() -> ExpandedPathBuf {
    ExpandedPathBuf::new(aheadfs_runtime_dir().map_or_else(
        || PathBuf::from("/var/run/aheadfs.pid"),
        |rd| rd.join("aheadfs.pid"),
    ))
}

fn default_cache_dir() -> ExpandedPathBuf {
    ExpandedPathBuf::new(
        dirs::cache_dir().map_or_else(|| PathBuf::from("/tmp/aheadfs/cache"), |d| d.join("aheadfs")),
    )
}

fn default_preload_filter() -> RegexPattern {
    RegexPattern(
        Regex::new(r"^.*\.flac$")
            .unwrap_or_else(|e| unreachable!("default preload filter is a valid regex: {e}")),
    )
}

const fn default_preload_siblings() -> usize {
    3
}

const fn default_preload_read_percent() -> u8 {
    50
}

const fn default_preload_open_ms() -> u64 {
    2000
}

const fn default_clean_after_secs() -> u64 {
    6 * 3600
}

const fn default_clean_interval_secs() -> u64 {
    600
}

const fn default_mru_size() -> usize {
    10
}

/// What to preload and when.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct PreloadConfig {
    /// How many lexical successors to cache alongside a triggered file.
    pub siblings: usize,

    /// Basename filter deciding which files participate in preloading.
    pub filter: RegexPattern,

    /// Percentage of a file's size that must be read before the
    /// read-volume trigger fires.
    pub read_percent: u8,

    /// Milliseconds a file must stay open before the hold-open trigger
    /// fires.
    pub open_ms: u64,
}

impl Default for PreloadConfig {
    fn default() -> Self {
        Self {
            siblings: default_preload_siblings(),
            filter: default_preload_filter(),
            read_percent: default_preload_read_percent(),
            open_ms: default_preload_open_ms(),
        }
    }
}

/// When to evict cache entries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct CleanConfig {
    /// Entries idle longer than this many seconds are evicted.
    pub after_secs: u64,

    /// Basename filter for files that are never evicted (e.g. keep
    /// first tracks: `^.*01\.flac$`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ignore: Option<RegexPattern>,

    /// How often the sweeper runs, in seconds.
    pub interval_secs: u64,
}

impl Default for CleanConfig {
    fn default() -> Self {
        Self {
            after_secs: default_clean_after_secs(),
            ignore: None,
            interval_secs: default_clean_interval_secs(),
        }
    }
}

/// Where daemon logs should be written.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LogTarget {
    /// Write logs to stdout (default for foreground mode).
    #[default]
    Stdout,
    /// Write logs to stderr.
    Stderr,
    /// Write logs to a file at the given path.
    File(PathBuf),
}

impl LogTarget {
    /// Opens the log file for the daemon, if this target is [`LogTarget::File`].
    ///
    /// Returns `None` for stdout/stderr targets (the daemonize crate's
    /// default sends these to `/dev/null`; the tracing subscriber
    /// handles them instead).
    pub fn open_log_file(&self) -> Result<Option<std::fs::File>, std::io::Error> {
        match self {
            Self::Stdout | Self::Stderr => Ok(None),
            Self::File(path) => {
                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                let file = std::fs::OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path)?;
                Ok(Some(file))
            }
        }
    }
}

/// Controls whether ANSI color codes are included in log output.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ColorMode {
    /// Auto-detect: enable color for terminals, disable for files and pipes.
    #[default]
    Auto,
    /// Always include ANSI color codes.
    Always,
    /// Never include ANSI color codes.
    Never,
}

/// Logging configuration for the daemon.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct LogConfig {
    /// Where to write log output. Defaults to stdout.
    pub target: LogTarget,

    /// Whether to include ANSI color in log output. "auto" detects
    /// based on whether the target is a terminal.
    pub color: ColorMode,
}

impl LogConfig {
    /// Whether ANSI color codes should be used for the configured target.
    pub fn should_use_color(&self) -> bool {
        match self.color {
            ColorMode::Always => true,
            ColorMode::Never => false,
            ColorMode::Auto => match self.target {
                LogTarget::Stdout => crate::trc::should_use_color(&std::io::stdout()),
                LogTarget::Stderr => crate::trc::should_use_color(&std::io::stderr()),
                LogTarget::File(_) => false,
            },
        }
    }
}

/// Daemon configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct DaemonConfig {
    /// The path to the PID file for the daemon.
    pub pid_file: ExpandedPathBuf,

    /// Logging configuration.
    pub log: LogConfig,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            pid_file: default_pid_file(),
            log: LogConfig::default(),
        }
    }
}

/// Application configuration structure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct Config {
    /// The slow upstream directory (typically a network share).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<ExpandedPathBuf>,

    /// The mount point for the union filesystem.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mount_point: Option<ExpandedPathBuf>,

    /// The local cache directory.
    #[serde(default = "default_cache_dir")]
    pub cache: ExpandedPathBuf,

    /// Capacity of the locate-result MRU.
    #[serde(default = "default_mru_size")]
    pub mru_size: usize,

    /// Preload policy.
    pub preload: PreloadConfig,

    /// Eviction policy.
    pub clean: CleanConfig,

    /// Daemon settings.
    pub daemon: DaemonConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            source: None,
            mount_point: None,
            cache: default_cache_dir(),
            mru_size: default_mru_size(),
            preload: PreloadConfig::default(),
            clean: CleanConfig::default(),
            daemon: DaemonConfig::default(),
        }
    }
}

/// Errors raised while loading or creating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The default configuration could not be serialized.
    #[error("serialization error: {0}")]
    SerializationError(#[from] toml::ser::Error),

    /// The configuration file was not valid TOML.
    #[error("deserialization error: {0}")]
    DeserializationError(#[from] toml::de::Error),

    /// Reading or writing the configuration file failed.
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// The configuration path has no parent directory to create.
    #[error("Config parent directory does not exist.")]
    NoParentDir,

    /// No writable location for a configuration file was found.
    #[error("No suitable configuration path found.")]
    NoSuitableConfigPath,
}

impl Config {
    /// Validate the correctness of the configuration.
    ///
    /// Returns a list of validation error messages when anything is off.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.source.is_none() {
            errors.push(
                "No source directory configured. Set `source` in the config file or pass it on \
                 the command line."
                    .to_owned(),
            );
        }
        if self.mount_point.is_none() {
            errors.push(
                "No mount point configured. Set `mount-point` in the config file or pass it on \
                 the command line."
                    .to_owned(),
            );
        }
        if self.preload.read_percent > 100 {
            errors.push(format!(
                "preload.read-percent must be within 0..=100, got {}.",
                self.preload.read_percent
            ));
        }
        if self.clean.interval_secs == 0 {
            errors.push("clean.interval-secs must be at least 1.".to_owned());
        }
        if self.daemon.pid_file.parent().is_none() {
            errors.push(format!(
                "PID file path '{}' has no parent directory.",
                self.daemon.pid_file.display()
            ));
        }
        if let LogTarget::File(ref path) = self.daemon.log.target {
            if path.as_os_str().is_empty() {
                errors.push("Log file path must not be empty.".to_owned());
            } else if path.parent().is_none() {
                errors.push(format!(
                    "Log file path '{}' has no parent directory.",
                    path.display()
                ));
            }
        }

        if errors.is_empty() { Ok(()) } else { Err(errors) }
    }

    /// Returns config file paths in descending priority order.
    /// On macOS, skips `dirs::config_dir()` (resolves to
    /// `~/Library/Application Support/`).
    fn config_search_paths() -> Vec<PathBuf> {
        let mut paths = Vec::new();

        #[cfg(not(target_os = "macos"))]
        if let Some(xdg) = dirs::config_dir() {
            paths.push(xdg.join("aheadfs").join("config.toml"));
        }

        if let Some(home) = dirs::home_dir() {
            paths.push(home.join(".config").join("aheadfs").join("config.toml"));
        }

        paths.push(PathBuf::from("/etc/aheadfs/config.toml"));

        paths
    }

    /// Loads config from a single TOML file.
    fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        debug!(path = ?path, "Loading configuration file.");
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Loads configuration from the first found config file, or the
    /// external path if given.
    pub fn load(
        external_config_path: Option<&Path>,
    ) -> Option<Result<(Self, PathBuf), ConfigError>> {
        if let Some(path) = external_config_path {
            return Some(Self::load_from_file(path).map(|cfg| (cfg, path.to_path_buf())));
        }

        let search_paths = Self::config_search_paths();
        if let Some(path) = search_paths.iter().find(|p| p.exists()) {
            Some(Self::load_from_file(path).map(|cfg| (cfg, path.clone())))
        } else {
            info!(tried = ?search_paths, "No configuration file found.");
            None
        }
    }

    /// Loads config, or writes a commented default to the
    /// highest-priority search path if none exists. The written file
    /// carries no `source`/`mount-point` yet; the command line may
    /// still fill those in. Errors if a config file exists but is
    /// malformed.
    pub fn load_or_create(external_config_path: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(res) = Self::load(external_config_path) {
            let (config, path) = res?;
            info!(path = %path.display(), "Loaded config file.");
            return Ok(config);
        }

        // No config exists — create a default at the highest-priority path.
        let creation_path = Self::config_search_paths()
            .into_iter()
            .next()
            .ok_or(ConfigError::NoSuitableConfigPath)?;

        let config = Self::default();
        config.dangerously_write_to_disk(&creation_path)?;
        info!(path = %creation_path.display(), "Created configuration file.");
        Ok(config)
    }

    fn dangerously_write_to_disk(&self, path: &Path) -> Result<(), ConfigError> {
        let toml_str = toml::to_string_pretty(self)?;
        std::fs::create_dir_all(path.parent().ok_or(ConfigError::NoParentDir)?)?;
        std::fs::write(path, format!("{DEFAULT_CONFIG_HEADER}{toml_str}"))?;
        Ok(())
    }

    /// The engine settings this configuration describes.
    ///
    /// Callers must have validated the config first; an unset source
    /// falls back to an empty path here rather than panicking.
    #[must_use]
    pub fn settings(&self) -> Settings {
        let source = self
            .source
            .as_deref()
            .map_or_else(PathBuf::new, Path::to_path_buf);
        let mut settings = Settings::new(source, self.cache.to_path_buf());
        settings.preload_siblings = self.preload.siblings;
        settings.preload_filter = self.preload.filter.as_regex().clone();
        settings.preload_read_percent = self.preload.read_percent;
        settings.preload_open = Duration::from_millis(self.preload.open_ms);
        settings.clean_after = Duration::from_secs(self.clean.after_secs);
        settings.clean_ignore = self.clean.ignore.as_ref().map(|re| re.as_regex().clone());
        settings.mru_size = self.mru_size;
        settings
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    #[test]
    fn minimal_config_parses_with_defaults() {
        let config: Config = toml::from_str(
            r#"
            source = "/mnt/nas/music"
            mount-point = "/home/u/music"
            "#,
        )
        .unwrap();

        assert_eq!(config.preload.siblings, 3);
        assert_eq!(config.preload.read_percent, 50);
        assert_eq!(config.clean.after_secs, 6 * 3600);
        assert_eq!(config.mru_size, 10);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn empty_config_fails_validation() {
        let config = Config::default();
        let errors = config.validate().unwrap_err();
        assert_eq!(errors.len(), 2, "source and mount point are both missing");
    }

    #[test]
    fn bad_filter_is_a_parse_error() {
        let parsed: Result<Config, _> = toml::from_str(
            r#"
            source = "/src"
            mount-point = "/mnt"
            [preload]
            filter = "["
            "#,
        );
        assert!(parsed.is_err(), "an invalid regex must not deserialize");
    }

    #[test]
    fn a_written_default_config_loads_back() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("nested").join("config.toml");

        let config = Config::default();
        config.dangerously_write_to_disk(&path).unwrap();

        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(
            raw.starts_with("# aheadfs configuration."),
            "the generated file must carry its comment header"
        );

        let loaded: Config = toml::from_str(&raw).unwrap();
        assert_eq!(loaded, config, "the written default must round-trip");
    }

    #[test]
    fn read_percent_over_100_fails_validation() {
        let config: Config = toml::from_str(
            r#"
            source = "/src"
            mount-point = "/mnt"
            [preload]
            read-percent = 150
            "#,
        )
        .unwrap();
        assert!(config.validate().is_err());
    }
}
