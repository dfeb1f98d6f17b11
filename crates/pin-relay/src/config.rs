//! Configuration management

use std::net::SocketAddr;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub listen_addr: SocketAddr,
    pub database_path: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8080".parse().unwrap(),
            database_path: PathBuf::from("pin-relay.db"),
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(addr) = std::env::var("PIN_RELAY_LISTEN_ADDR") {
            config.listen_addr = addr
                .parse()
                .map_err(|e| ConfigError::Invalid(format!("Invalid listen_addr: {}", e)))?;
        }

        if let Ok(path) = std::env::var("PIN_RELAY_DATABASE_PATH") {
            config.database_path = PathBuf::from(path);
        }

        config.validate()?;

        Ok(config)
    }

    /// Load configuration from a TOML file
    pub fn from_toml(path: impl AsRef<std::path::Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: ServerConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.database_path.as_os_str().is_empty() {
            return Err(ConfigError::Invalid(
                "database_path must not be empty".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.listen_addr.port(), 8080);
        assert_eq!(config.database_path, PathBuf::from("pin-relay.db"));
        assert!(config.validate().is_ok());
    }

    // Single test for the env path; parallel tests must not race on the
    // process environment.
    #[test]
    fn test_from_env() {
        std::env::set_var("PIN_RELAY_LISTEN_ADDR", "127.0.0.1:7070");
        std::env::set_var("PIN_RELAY_DATABASE_PATH", "/tmp/env-relay.db");

        let config = ServerConfig::from_env().unwrap();
        assert_eq!(config.listen_addr.port(), 7070);
        assert_eq!(config.database_path, PathBuf::from("/tmp/env-relay.db"));

        std::env::set_var("PIN_RELAY_LISTEN_ADDR", "not-an-addr");
        assert!(matches!(
            ServerConfig::from_env(),
            Err(ConfigError::Invalid(_))
        ));

        std::env::remove_var("PIN_RELAY_LISTEN_ADDR");
        std::env::remove_var("PIN_RELAY_DATABASE_PATH");
    }

    #[test]
    fn test_from_toml() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "listen_addr = \"127.0.0.1:9090\"").unwrap();
        writeln!(file, "database_path = \"/tmp/relay.db\"").unwrap();

        let config = ServerConfig::from_toml(file.path()).unwrap();
        assert_eq!(config.listen_addr.port(), 9090);
        assert_eq!(config.database_path, PathBuf::from("/tmp/relay.db"));
    }

    #[test]
    fn test_from_toml_partial_uses_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "listen_addr = \"127.0.0.1:9191\"").unwrap();

        let config = ServerConfig::from_toml(file.path()).unwrap();
        assert_eq!(config.listen_addr.port(), 9191);
        assert_eq!(config.database_path, PathBuf::from("pin-relay.db"));
    }

    #[test]
    fn test_validate_rejects_empty_database_path() {
        let config = ServerConfig {
            database_path: PathBuf::new(),
            ..ServerConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
