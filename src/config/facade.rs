//! ConfigLoader facade delegating to merge service.

use super::merge::service::MergeService;
use super::ChronoConfig;
use config::ConfigError;
use std::path::Path;

/// Configuration loader facade.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration from the global file and environment.
    pub fn load() -> Result<ChronoConfig, ConfigError> {
        MergeService::load()
    }

    /// Load configuration with `path` layered over the global file.
    pub fn load_from_file(path: &Path) -> Result<ChronoConfig, ConfigError> {
        MergeService::load_from_file(path)
    }

    /// Load, using `path` when one was given.
    pub fn load_with(path: Option<&Path>) -> Result<ChronoConfig, ConfigError> {
        match path {
            Some(path) => Self::load_from_file(path),
            None => Self::load(),
        }
    }
}
