//! Configuration
//!
//! `ChronoConfig` is assembled by [`ConfigLoader`] from, lowest precedence
//! first: built-in defaults, the global file
//! `$XDG_CONFIG_HOME/chronofs/config.toml`, an explicit `--config` file, and
//! `CHRONOFS__*` environment variables (`__` separates nested keys, e.g.
//! `CHRONOFS__RETRY__MAX_ATTEMPTS=4`).

pub mod facade;
pub mod merge;
pub mod paths;
pub mod sources;

pub use facade::ConfigLoader;
pub use paths::xdg_root as xdg;

use crate::error::ApiError;
use crate::logging::LoggingConfig;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChronoConfig {
    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub sequence: SequenceConfig,

    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Where and how durably the store keeps its data
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Store directory; None means `$XDG_DATA_HOME/chronofs/store`
    #[serde(default)]
    pub data_dir: Option<PathBuf>,

    /// Flush to disk before a commit is acknowledged
    #[serde(default = "default_true")]
    pub sync_on_commit: bool,
}

impl StorageConfig {
    pub fn resolve_data_dir(&self) -> Result<PathBuf, ApiError> {
        match &self.data_dir {
            Some(dir) => Ok(dir.clone()),
            None => xdg::store_data_dir(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: None,
            sync_on_commit: default_true(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SequenceConfig {
    /// Values leased per sequence round trip
    #[serde(default = "default_bandwidth")]
    pub bandwidth: u64,
}

impl Default for SequenceConfig {
    fn default() -> Self {
        Self {
            bandwidth: default_bandwidth(),
        }
    }
}

/// Conflict retry budget for store operations
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_bandwidth() -> u64 {
    100
}

fn default_max_attempts() -> u32 {
    16
}

fn default_base_delay_ms() -> u64 {
    1
}

fn default_max_delay_ms() -> u64 {
    64
}
