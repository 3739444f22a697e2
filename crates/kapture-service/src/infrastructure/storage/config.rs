//! TOML-based configuration persistence for the capture service.
//!
//! Reads and writes [`CaptureConfig`] to the platform-appropriate config file:
//! - Windows:  `%APPDATA%\Kapture\config.toml`
//! - Linux:    `~/.config/kapture/config.toml`
//! - macOS:    `~/Library/Application Support/Kapture/config.toml`
//!
//! # Example file (for beginners)
//!
//! ```toml
//! [capture]
//! want_mouse = false
//! message_timeout_ms = 3000
//!
//! [correlation]
//! timeout_ms = 150
//!
//! [logging]
//! level = "debug"
//! ```
//!
//! Every field has a `#[serde(default = "...")]` helper, so any section or
//! field may be left out; a missing file loads as [`CaptureConfig::default`].
//! A file that parses is still checked by [`CaptureConfig::validate`] before
//! it is returned.

use std::path::{Path, PathBuf};
use std::time::Duration;

use kapture_core::QueueSettings;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::application::controller::{CaptureOptions, ControllerSettings, MIN_MESSAGE_TIMEOUT};

/// Error type for configuration file operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The platform config directory could not be determined.
    #[error("could not determine platform config directory")]
    NoPlatformConfigDir,

    /// A file system I/O error occurred.
    #[error("I/O error accessing config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The TOML content could not be parsed.
    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// The config could not be serialized to TOML.
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// The TOML parsed but a value makes no sense.
    #[error("invalid config value {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

// ── Config schema types ───────────────────────────────────────────────────────

/// Top-level service configuration stored on disk.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CaptureConfig {
    #[serde(default)]
    pub capture: CaptureSection,
    #[serde(default)]
    pub correlation: CorrelationSection,
    #[serde(default)]
    pub pumps: PumpSection,
    #[serde(default)]
    pub logging: LoggingSection,
}

/// The `start_capture` arguments.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CaptureSection {
    #[serde(default = "default_true")]
    pub want_mouse: bool,
    #[serde(default = "default_true")]
    pub want_keyboard: bool,
    #[serde(default)]
    pub start_suspended: bool,
    /// Longest time the hook waits for a verdict before passing the event.
    #[serde(default = "default_message_timeout_ms")]
    pub message_timeout_ms: u64,
}

/// Hook/raw correlation tuning.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CorrelationSection {
    /// Queue wait per hook event; never more than half the message timeout.
    #[serde(default = "default_correlation_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// Parked raw events older than this are discarded.
    #[serde(default = "default_stale_after_ms")]
    pub stale_after_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PumpSection {
    #[serde(default = "default_startup_timeout_ms")]
    pub startup_timeout_ms: u64,
    #[serde(default = "default_join_timeout_ms")]
    pub join_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingSection {
    /// `tracing` level used when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub level: String,
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_true() -> bool {
    true
}
fn default_message_timeout_ms() -> u64 {
    5000
}
fn default_correlation_timeout_ms() -> u64 {
    250
}
fn default_queue_capacity() -> usize {
    256
}
fn default_stale_after_ms() -> u64 {
    1000
}
fn default_startup_timeout_ms() -> u64 {
    5000
}
fn default_join_timeout_ms() -> u64 {
    2000
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for CaptureSection {
    fn default() -> Self {
        Self {
            want_mouse: default_true(),
            want_keyboard: default_true(),
            start_suspended: false,
            message_timeout_ms: default_message_timeout_ms(),
        }
    }
}

impl Default for CorrelationSection {
    fn default() -> Self {
        Self {
            timeout_ms: default_correlation_timeout_ms(),
            queue_capacity: default_queue_capacity(),
            stale_after_ms: default_stale_after_ms(),
        }
    }
}

impl Default for PumpSection {
    fn default() -> Self {
        Self {
            startup_timeout_ms: default_startup_timeout_ms(),
            join_timeout_ms: default_join_timeout_ms(),
        }
    }
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl CaptureConfig {
    /// Rejects values that would break capture at run time.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Invalid`] naming the first offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |field, reason: String| Err(ConfigError::Invalid { field, reason });
        let min_ms = MIN_MESSAGE_TIMEOUT.as_millis() as u64;
        if self.capture.message_timeout_ms < min_ms {
            return invalid(
                "capture.message_timeout_ms",
                format!("must be at least {min_ms}"),
            );
        }
        if self.correlation.timeout_ms == 0 {
            return invalid("correlation.timeout_ms", "must be positive".to_string());
        }
        if self.correlation.queue_capacity == 0 {
            return invalid("correlation.queue_capacity", "must be positive".to_string());
        }
        if self.correlation.stale_after_ms < self.correlation.timeout_ms {
            return invalid(
                "correlation.stale_after_ms",
                "must not be shorter than correlation.timeout_ms".to_string(),
            );
        }
        if self.pumps.startup_timeout_ms == 0 {
            return invalid("pumps.startup_timeout_ms", "must be positive".to_string());
        }
        if self.pumps.join_timeout_ms == 0 {
            return invalid("pumps.join_timeout_ms", "must be positive".to_string());
        }
        Ok(())
    }

    /// The `[capture]` section as `start_capture` arguments.
    pub fn capture_options(&self) -> CaptureOptions {
        CaptureOptions {
            want_mouse: self.capture.want_mouse,
            want_keyboard: self.capture.want_keyboard,
            start_suspended: self.capture.start_suspended,
            message_timeout: Duration::from_millis(self.capture.message_timeout_ms),
        }
    }

    /// The `[correlation]` and `[pumps]` sections as controller settings.
    pub fn controller_settings(&self) -> ControllerSettings {
        ControllerSettings {
            correlation_timeout: Duration::from_millis(self.correlation.timeout_ms),
            queue: QueueSettings {
                capacity: self.correlation.queue_capacity,
                stale_after: Duration::from_millis(self.correlation.stale_after_ms),
            },
            startup_timeout: Duration::from_millis(self.pumps.startup_timeout_ms),
            join_timeout: Duration::from_millis(self.pumps.join_timeout_ms),
        }
    }
}

// ── Config repository ─────────────────────────────────────────────────────────

/// Determines the platform-appropriate directory for the config file.
///
/// # Errors
///
/// Returns [`ConfigError::NoPlatformConfigDir`] when the platform config base
/// directory cannot be determined from the environment.
pub fn config_dir() -> Result<PathBuf, ConfigError> {
    platform_config_dir().ok_or(ConfigError::NoPlatformConfigDir)
}

/// Resolves the full path to the config file.
pub fn config_file_path() -> Result<PathBuf, ConfigError> {
    Ok(config_dir()?.join("config.toml"))
}

/// Loads the config from the platform config file.
///
/// # Errors
///
/// See [`load_config_from`].
pub fn load_config() -> Result<CaptureConfig, ConfigError> {
    load_config_from(&config_file_path()?)
}

/// Loads the config from `path`, returning `CaptureConfig::default()` if the
/// file does not exist.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system errors other than "not found",
/// [`ConfigError::Parse`] if the TOML is malformed and
/// [`ConfigError::Invalid`] if a value fails [`CaptureConfig::validate`].
pub fn load_config_from(path: &Path) -> Result<CaptureConfig, ConfigError> {
    match std::fs::read_to_string(path) {
        Ok(content) => {
            let config: CaptureConfig = toml::from_str(&content)?;
            config.validate()?;
            Ok(config)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(CaptureConfig::default()),
        Err(e) => Err(ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        }),
    }
}

/// Persists `config` to the platform config file.
pub fn save_config(config: &CaptureConfig) -> Result<(), ConfigError> {
    save_config_to(config, &config_file_path()?)
}

/// Persists `config` to `path`, creating the parent directory if needed.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system failures or
/// [`ConfigError::Serialize`] if serialization fails.
pub fn save_config_to(config: &CaptureConfig, path: &Path) -> Result<(), ConfigError> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).map_err(|source| ConfigError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
    }

    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })
}

fn platform_config_dir() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA").map(|p| PathBuf::from(p).join("Kapture"))
    }

    #[cfg(target_os = "linux")]
    {
        let base = std::env::var_os("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".config")))?;
        Some(base.join("kapture"))
    }

    #[cfg(target_os = "macos")]
    {
        std::env::var_os("HOME").map(|h| {
            PathBuf::from(h)
                .join("Library")
                .join("Application Support")
                .join("Kapture")
        })
    }

    #[cfg(not(any(target_os = "windows", target_os = "linux", target_os = "macos")))]
    {
        None
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
