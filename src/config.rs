//! Node configuration
//!
//! Loaded from TOML. Every section and field is optional:
//!
//! ```toml
//! [clock]
//! initial_time = 1
//!
//! [replication]
//! role = "primary"   # primary | secondary | standalone
//! term = 1
//!
//! [catalog]
//! create_id_index = true
//!
//! [oplog]
//! enabled = true
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tidemark_repl::ReplicationRole;

/// Errors loading a [`NodeConfig`]
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file could not be read
    #[error("failed to read config {path}: {source}")]
    Io {
        /// File that was read
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// Config text is not valid TOML for this schema
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// Config parsed but a value is out of range
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Clock settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClockConfig {
    /// Cluster time at startup
    pub initial_time: u64,
}

impl Default for ClockConfig {
    fn default() -> Self {
        Self { initial_time: 1 }
    }
}

/// Replication settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplicationConfig {
    /// Role at startup
    pub role: ReplicationRole,
    /// Term at startup
    pub term: i64,
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self {
            role: ReplicationRole::Primary,
            term: 1,
        }
    }
}

/// Catalog settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogSection {
    /// Allocate the `_id_` index ident on create
    pub create_id_index: bool,
}

impl Default for CatalogSection {
    fn default() -> Self {
        Self {
            create_id_index: true,
        }
    }
}

/// Oplog settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OplogConfig {
    /// Record replicated writes in the in-memory oplog
    pub enabled: bool,
}

impl Default for OplogConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

/// Full node configuration
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// `[clock]`
    pub clock: ClockConfig,
    /// `[replication]`
    pub replication: ReplicationConfig,
    /// `[catalog]`
    pub catalog: CatalogSection,
    /// `[oplog]`
    pub oplog: OplogConfig,
}

impl NodeConfig {
    /// Parse and validate TOML text
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: NodeConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// Check value ranges
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.clock.initial_time == 0 {
            return Err(ConfigError::Invalid(
                "clock.initial_time must be non-zero".to_string(),
            ));
        }
        if self.replication.term < 0 {
            return Err(ConfigError::Invalid(format!(
                "replication.term must not be negative, got {}",
                self.replication.term
            )));
        }
        Ok(())
    }
}
