//! Tool configuration
//!
//! Configuration loaded from a TOML file or environment variables.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),

    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    ParseError(#[from] toml::de::Error),
}

/// Settings shared by the recovery and pg_hba drivers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolConfig {
    /// Greenplum installation root
    pub gphome: PathBuf,

    /// Program used to reach other hosts
    #[serde(default = "default_ssh_program")]
    pub ssh_program: String,

    /// Slot mirrors replicate through
    #[serde(default = "default_replication_slot")]
    pub replication_slot_name: String,

    /// How long pg_ctl waits for a started segment, in seconds
    #[serde(default = "default_start_timeout")]
    pub start_timeout_secs: u64,

    /// Maximum commands in flight
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

fn default_ssh_program() -> String {
    "ssh".to_string()
}

fn default_replication_slot() -> String {
    gpmgmt_core::INTERNAL_REPLICATION_SLOT.to_string()
}

fn default_start_timeout() -> u64 {
    600
}

fn default_batch_size() -> usize {
    16
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            gphome: PathBuf::from("/usr/local/greenplum-db"),
            ssh_program: default_ssh_program(),
            replication_slot_name: default_replication_slot(),
            start_timeout_secs: default_start_timeout(),
            batch_size: default_batch_size(),
        }
    }
}

impl ToolConfig {
    /// Create configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let gphome = std::env::var("GPHOME")
            .map(PathBuf::from)
            .map_err(|_| ConfigError::MissingEnvVar("GPHOME".to_string()))?;

        let ssh_program = std::env::var("GP_SSH_PROGRAM").unwrap_or_else(|_| default_ssh_program());

        let start_timeout_secs = std::env::var("GP_START_TIMEOUT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or_else(default_start_timeout);

        let batch_size = match std::env::var("GP_BATCH_SIZE") {
            Ok(v) => v
                .parse()
                .map_err(|_| ConfigError::InvalidValue("GP_BATCH_SIZE".to_string(), v))?,
            Err(_) => default_batch_size(),
        };

        let config = Self {
            gphome,
            ssh_program,
            replication_slot_name: default_replication_slot(),
            start_timeout_secs,
            batch_size,
        };
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: ToolConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.batch_size == 0 {
            return Err(ConfigError::InvalidValue(
                "batch_size".to_string(),
                "must be greater than zero".to_string(),
            ));
        }
        if self.replication_slot_name.is_empty() {
            return Err(ConfigError::InvalidValue(
                "replication_slot_name".to_string(),
                "must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Get segment start timeout as Duration
    pub fn start_timeout(&self) -> Duration {
        Duration::from_secs(self.start_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ToolConfig::default();
        assert_eq!(config.ssh_program, "ssh");
        assert_eq!(config.replication_slot_name, "internal_wal_replication_slot");
        assert_eq!(config.batch_size, 16);
        assert_eq!(config.start_timeout(), Duration::from_secs(600));
    }

    #[test]
    fn test_from_file_applies_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gpmgmt.toml");
        std::fs::write(&path, "gphome = \"/opt/gpdb\"\nbatch_size = 4\n").unwrap();

        let config = ToolConfig::from_file(&path).unwrap();
        assert_eq!(config.gphome, PathBuf::from("/opt/gpdb"));
        assert_eq!(config.batch_size, 4);
        assert_eq!(config.ssh_program, "ssh");
    }

    #[test]
    fn test_zero_batch_size_invalid() {
        let config = ToolConfig {
            batch_size: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::InvalidValue(_, _))));
    }

    #[test]
    fn test_unparseable_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gpmgmt.toml");
        std::fs::write(&path, "gphome = [").unwrap();
        assert!(matches!(ToolConfig::from_file(&path), Err(ConfigError::ParseError(_))));
    }
}
