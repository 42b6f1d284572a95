//! Configuration types for Tabula
//!
//! Every section and field has a default, so an empty file (or no file at
//! all) yields a working single-host setup.

use crate::error::{Error, Result};
use crate::types::Consistency;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Root configuration for Tabula
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Cluster connection configuration
    pub cluster: ClusterConfig,
    /// Retry policy for idempotent statements
    pub retry: RetryConfig,
    /// Embedded cluster backend configuration
    pub local: LocalConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
}

impl Config {
    /// Parse a TOML document
    pub fn from_toml_str(s: &str) -> Result<Self> {
        toml::from_str(s).map_err(|e| Error::Config(e.to_string()))
    }

    /// Load configuration from a TOML file; a missing file yields defaults
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }
}

/// Cluster connection configuration
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    /// Contact points of the storage cluster
    pub hosts: Vec<String>,
    /// Keyspace holding every table
    pub keyspace: String,
    /// Native protocol version negotiated with the cluster
    pub protocol_version: u8,
    /// Connection attempts before startup fails
    pub connect_attempts: u32,
    /// Fixed delay between connection attempts (milliseconds)
    pub connect_retry_delay_ms: u64,
    /// Default consistency level for every statement
    pub consistency: Consistency,
    /// Per-request timeout (milliseconds)
    pub request_timeout_ms: u64,
}

impl ClusterConfig {
    #[must_use]
    pub const fn connect_retry_delay(&self) -> Duration {
        Duration::from_millis(self.connect_retry_delay_ms)
    }

    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            hosts: vec!["127.0.0.1".to_string()],
            keyspace: "Keyspace1".to_string(),
            protocol_version: 3,
            connect_attempts: 20,
            connect_retry_delay_ms: 3000,
            consistency: Consistency::Quorum,
            request_timeout_ms: 12_000,
        }
    }
}

/// Retry configuration for idempotent statements
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Retries allowed after the first failed attempt
    pub max_attempts: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self { max_attempts: 5 }
    }
}

/// Embedded cluster backend configuration
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalConfig {
    /// Directory holding the cluster database
    pub data_dir: PathBuf,
}

impl Default for LocalConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("/var/lib/tabula"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}
