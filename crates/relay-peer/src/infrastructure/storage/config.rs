//! TOML-based configuration for the relay peer.
//!
//! ```toml
//! [peer]
//! server_address = "127.0.0.1:9000"
//! display_name = "Alice"
//! download_dir = "/home/alice/Downloads/relay"
//! log_level = "info"
//! ```
//!
//! Every key is optional.  `download_dir` defaults to the OS temporary
//! directory; `display_name` has no usable default and must come from the
//! file, the command line, or the environment.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error type for configuration file operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error accessing config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

// ── Config schema types ───────────────────────────────────────────────────────

/// Top-level peer configuration file.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PeerConfig {
    #[serde(default)]
    pub peer: PeerSettings,
}

/// Connection and download settings of one peer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PeerSettings {
    /// `host:port` of the relay server.
    #[serde(default = "default_server_address")]
    pub server_address: String,
    /// Name announced with `USER|`; empty means "not configured".
    #[serde(default)]
    pub display_name: String,
    /// Where received files are written; `None` means the OS temp directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub download_dir: Option<PathBuf>,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_server_address() -> String {
    "127.0.0.1:9000".to_string()
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for PeerSettings {
    fn default() -> Self {
        Self {
            server_address: default_server_address(),
            display_name: String::new(),
            download_dir: None,
            log_level: default_log_level(),
        }
    }
}

impl PeerSettings {
    /// Directory received files are written to.
    pub fn download_dir(&self) -> PathBuf {
        self.download_dir
            .clone()
            .unwrap_or_else(std::env::temp_dir)
    }
}

impl PeerConfig {
    /// Parses and validates TOML text.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] for malformed TOML and
    /// [`ConfigError::Invalid`] for unusable values.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let cfg: PeerConfig = toml::from_str(content)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Checks values that parse but cannot work.
    ///
    /// The display name is not checked here: it is usually supplied on the
    /// command line after the file has been loaded.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] describing the first bad value.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.peer.server_address.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "server_address must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// Loads the configuration from `path`, returning the defaults if the file
/// does not exist.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system errors other than "not found",
/// [`ConfigError::Parse`] if the TOML is malformed, and
/// [`ConfigError::Invalid`] for unusable values.
pub fn load_config(path: &Path) -> Result<PeerConfig, ConfigError> {
    match std::fs::read_to_string(path) {
        Ok(content) => PeerConfig::from_toml(&content),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(PeerConfig::default()),
        Err(e) => Err(ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        }),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
