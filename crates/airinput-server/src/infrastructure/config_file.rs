//! TOML configuration file for the relay.
//!
//! Every key is optional.  A missing file, a missing section, or a missing
//! key all fall back to the built-in defaults, so an empty file is valid.
//!
//! ```toml
//! [server]
//! bind_address = "0.0.0.0"
//! port_start = 5000
//! port_attempts = 100
//! log_level = "info"
//!
//! [segmentation]
//! mode = "single"            # or "continuous"
//! segment_interval_ms = 2000
//! max_card_count = 50
//! max_card_length = 1000
//! tick_ms = 1000
//!
//! [streaming]
//! outbox_capacity = 256
//! hub_queue_capacity = 256
//! heartbeat_secs = 15
//!
//! [shutdown]
//! grace_ms = 50
//! timeout_ms = 200
//! ```
//!
//! # Serde default values
//!
//! Fields annotated with `#[serde(default = "some_fn")]` use the return value
//! of `some_fn()` when the key is absent.  Section structs carry
//! `#[serde(default)]` so a whole missing section uses its `Default` impl.

use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use airinput_core::SegmentationMode;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::ServerConfig;

/// Error type for configuration file operations.
#[derive(Debug, Error)]
pub enum ConfigError {
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

    /// A value parsed but is not usable.
    #[error("invalid value for `{key}`: {reason}")]
    InvalidValue { key: &'static str, reason: String },
}

// ── Config schema types ───────────────────────────────────────────────────────

/// Top-level layout of the config file.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct FileConfig {
    pub server: ServerSection,
    pub segmentation: SegmentationSection,
    pub streaming: StreamingSection,
    pub shutdown: ShutdownSection,
}

/// Listener settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerSection {
    /// IP address to bind to.  `"0.0.0.0"` accepts LAN devices.
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    /// First port tried.
    #[serde(default = "default_port_start")]
    pub port_start: u16,
    /// Consecutive ports tried before giving up.
    #[serde(default = "default_port_attempts")]
    pub port_attempts: u16,
    /// `tracing` level used when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// Card segmentation settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SegmentationSection {
    #[serde(default)]
    pub mode: SegmentationMode,
    #[serde(default = "default_segment_interval_ms")]
    pub segment_interval_ms: u64,
    #[serde(default = "default_max_card_count")]
    pub max_card_count: usize,
    #[serde(default = "default_max_card_length")]
    pub max_card_length: usize,
    #[serde(default = "default_tick_ms")]
    pub tick_ms: u64,
}

/// Stream and hub sizing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StreamingSection {
    #[serde(default = "default_queue_capacity")]
    pub outbox_capacity: usize,
    #[serde(default = "default_queue_capacity")]
    pub hub_queue_capacity: usize,
    #[serde(default = "default_heartbeat_secs")]
    pub heartbeat_secs: u64,
}

/// Shutdown timing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ShutdownSection {
    #[serde(default = "default_grace_ms")]
    pub grace_ms: u64,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}
fn default_port_start() -> u16 {
    5000
}
fn default_port_attempts() -> u16 {
    100
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_segment_interval_ms() -> u64 {
    2000
}
fn default_max_card_count() -> usize {
    50
}
fn default_max_card_length() -> usize {
    1000
}
fn default_tick_ms() -> u64 {
    1000
}
fn default_queue_capacity() -> usize {
    256
}
fn default_heartbeat_secs() -> u64 {
    15
}
fn default_grace_ms() -> u64 {
    50
}
fn default_timeout_ms() -> u64 {
    200
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port_start: default_port_start(),
            port_attempts: default_port_attempts(),
            log_level: default_log_level(),
        }
    }
}

impl Default for SegmentationSection {
    fn default() -> Self {
        Self {
            mode: SegmentationMode::default(),
            segment_interval_ms: default_segment_interval_ms(),
            max_card_count: default_max_card_count(),
            max_card_length: default_max_card_length(),
            tick_ms: default_tick_ms(),
        }
    }
}

impl Default for StreamingSection {
    fn default() -> Self {
        Self {
            outbox_capacity: default_queue_capacity(),
            hub_queue_capacity: default_queue_capacity(),
            heartbeat_secs: default_heartbeat_secs(),
        }
    }
}

impl Default for ShutdownSection {
    fn default() -> Self {
        Self {
            grace_ms: default_grace_ms(),
            timeout_ms: default_timeout_ms(),
        }
    }
}

impl FileConfig {
    /// Converts the file's values into a [`ServerConfig`].
    ///
    /// # Errors
    ///
    /// [`ConfigError::InvalidValue`] for an unparseable bind address or a
    /// zero capacity, length, or interval.
    pub fn into_server_config(self) -> Result<ServerConfig, ConfigError> {
        let bind_addr: IpAddr =
            self.server
                .bind_address
                .parse()
                .map_err(|e| ConfigError::InvalidValue {
                    key: "server.bind_address",
                    reason: format!("{e}"),
                })?;

        require_positive("segmentation.max_card_length", self.segmentation.max_card_length as u64)?;
        require_positive("segmentation.max_card_count", self.segmentation.max_card_count as u64)?;
        require_positive("segmentation.tick_ms", self.segmentation.tick_ms)?;
        require_positive("streaming.outbox_capacity", self.streaming.outbox_capacity as u64)?;
        require_positive("streaming.hub_queue_capacity", self.streaming.hub_queue_capacity as u64)?;
        require_positive("streaming.heartbeat_secs", self.streaming.heartbeat_secs)?;

        Ok(ServerConfig {
            bind_addr,
            port_start: self.server.port_start,
            port_attempts: self.server.port_attempts,
            segment_interval: Duration::from_millis(self.segmentation.segment_interval_ms),
            max_card_count: self.segmentation.max_card_count,
            max_card_length: self.segmentation.max_card_length,
            outbox_capacity: self.streaming.outbox_capacity,
            hub_queue_capacity: self.streaming.hub_queue_capacity,
            heartbeat_interval: Duration::from_secs(self.streaming.heartbeat_secs),
            segment_tick: Duration::from_millis(self.segmentation.tick_ms),
            shutdown_grace: Duration::from_millis(self.shutdown.grace_ms),
            shutdown_timeout: Duration::from_millis(self.shutdown.timeout_ms),
            initial_mode: self.segmentation.mode,
        })
    }
}

fn require_positive(key: &'static str, value: u64) -> Result<(), ConfigError> {
    if value == 0 {
        return Err(ConfigError::InvalidValue {
            key,
            reason: "must be greater than zero".to_string(),
        });
    }
    Ok(())
}

// ── Loading ───────────────────────────────────────────────────────────────────

/// Loads the config file at `path`, returning `FileConfig::default()` if the
/// file does not exist.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system errors other than "not found",
/// and [`ConfigError::Parse`] if the TOML is malformed.
pub fn load_config(path: &Path) -> Result<FileConfig, ConfigError> {
    match std::fs::read_to_string(path) {
        Ok(content) => Ok(toml::from_str(&content)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(FileConfig::default()),
        Err(e) => Err(ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        }),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        file.write_all(content.as_bytes()).expect("write");
        file
    }

    #[test]
    fn test_default_file_config_matches_server_defaults() {
        // Arrange / Act
        let cfg = FileConfig::default().into_server_config().unwrap();

        // Assert
        assert_eq!(cfg, ServerConfig::default());
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = load_config(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(cfg, FileConfig::default());
    }

    #[test]
    fn test_empty_file_yields_defaults() {
        let file = write_config("");
        assert_eq!(load_config(file.path()).unwrap(), FileConfig::default());
    }

    #[test]
    fn test_partial_file_overrides_only_named_keys() {
        // Arrange
        let file = write_config(
            r#"
            [server]
            port_start = 6000

            [segmentation]
            mode = "continuous"
            max_card_length = 20
            "#,
        );

        // Act
        let cfg = load_config(file.path()).unwrap().into_server_config().unwrap();

        // Assert
        assert_eq!(cfg.port_start, 6000);
        assert_eq!(cfg.port_attempts, 100);
        assert_eq!(cfg.initial_mode, SegmentationMode::Continuous);
        assert_eq!(cfg.max_card_length, 20);
        assert_eq!(cfg.max_card_count, 50);
        assert_eq!(cfg.heartbeat_interval, Duration::from_secs(15));
    }

    #[test]
    fn test_malformed_toml_is_parse_error() {
        let file = write_config("[server\nport_start = ");
        assert!(matches!(load_config(file.path()), Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_unknown_mode_is_parse_error() {
        let file = write_config("[segmentation]\nmode = \"sometimes\"\n");
        assert!(matches!(load_config(file.path()), Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_bad_bind_address_is_invalid_value() {
        let mut cfg = FileConfig::default();
        cfg.server.bind_address = "not.an.ip".to_string();

        let err = cfg.into_server_config().unwrap_err();

        assert!(matches!(
            err,
            ConfigError::InvalidValue { key: "server.bind_address", .. }
        ));
    }

    #[test]
    fn test_zero_card_length_is_invalid_value() {
        let mut cfg = FileConfig::default();
        cfg.segmentation.max_card_length = 0;
        assert!(matches!(
            cfg.into_server_config(),
            Err(ConfigError::InvalidValue { key: "segmentation.max_card_length", .. })
        ));
    }

    #[test]
    fn test_directory_path_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(load_config(dir.path()), Err(ConfigError::Io { .. })));
    }
}
