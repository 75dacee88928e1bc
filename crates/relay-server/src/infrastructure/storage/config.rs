//! TOML-based configuration for the relay server.
//!
//! The server reads an optional `relay-server.toml`:
//!
//! ```toml
//! [server]
//! bind_address = "0.0.0.0"
//! port = 9000
//! max_clients = 5
//! log_level = "info"
//! ```
//!
//! Every field has a serde default, so a missing file, a missing `[server]`
//! table, or a table with only some keys all produce a working configuration.
//! Command-line flags are applied on top of the loaded values by the binary.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::application::registry::MAX_CLIENTS;

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
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

// ── Config schema types ───────────────────────────────────────────────────────

/// Top-level server configuration file.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ServerConfig {
    #[serde(default)]
    pub server: ServerSettings,
}

/// Listener and admission settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerSettings {
    /// IP address to bind to.  `"0.0.0.0"` binds all interfaces.
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    /// TCP port peers connect to.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Admission bound; further connections are closed on accept.
    #[serde(default = "default_max_clients")]
    pub max_clients: usize,
    /// `tracing` level used when `RUST_LOG` is not set.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    9000
}
fn default_max_clients() -> usize {
    MAX_CLIENTS
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: default_port(),
            max_clients: default_max_clients(),
            log_level: default_log_level(),
        }
    }
}

impl ServerConfig {
    /// Parses and validates TOML text.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] for malformed TOML and
    /// [`ConfigError::Invalid`] for unusable values.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let cfg: ServerConfig = toml::from_str(content)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Checks values that parse but cannot work.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] describing the first bad value.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.max_clients == 0 {
            return Err(ConfigError::Invalid(
                "max_clients must be at least 1".to_string(),
            ));
        }
        if self.server.bind_address.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "bind_address must not be empty".to_string(),
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
pub fn load_config(path: &Path) -> Result<ServerConfig, ConfigError> {
    match std::fs::read_to_string(path) {
        Ok(content) => ServerConfig::from_toml(&content),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ServerConfig::default()),
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

    #[test]
    fn test_server_config_default_listens_on_9000_all_interfaces() {
        // Arrange / Act
        let cfg = ServerConfig::default();

        // Assert
        assert_eq!(cfg.server.port, 9000);
        assert_eq!(cfg.server.bind_address, "0.0.0.0");
        assert_eq!(cfg.server.max_clients, 5);
        assert_eq!(cfg.server.log_level, "info");
    }

    #[test]
    fn test_empty_toml_uses_defaults() {
        let cfg = ServerConfig::from_toml("").expect("empty config is valid");
        assert_eq!(cfg, ServerConfig::default());
    }

    #[test]
    fn test_partial_server_table_overrides_only_given_keys() {
        // Arrange
        let toml_str = r#"
[server]
port = 9100
"#;

        // Act
        let cfg = ServerConfig::from_toml(toml_str).expect("deserialize partial");

        // Assert
        assert_eq!(cfg.server.port, 9100);
        assert_eq!(cfg.server.max_clients, 5);
    }

    #[test]
    fn test_zero_max_clients_is_invalid() {
        let result = ServerConfig::from_toml("[server]\nmax_clients = 0\n");
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_malformed_toml_returns_parse_error() {
        let result = ServerConfig::from_toml("[[[ not valid toml");
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_load_config_returns_default_when_file_absent() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = load_config(&dir.path().join("missing.toml")).unwrap();
        assert_eq!(cfg, ServerConfig::default());
    }

    #[test]
    fn test_load_config_reads_file_written_by_serializer() {
        // Arrange
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("relay-server.toml");
        let mut cfg = ServerConfig::default();
        cfg.server.port = 12345;
        cfg.server.log_level = "debug".to_string();
        std::fs::write(&path, toml::to_string_pretty(&cfg).unwrap()).unwrap();

        // Act
        let loaded = load_config(&path).unwrap();

        // Assert
        assert_eq!(loaded, cfg);
    }
}
