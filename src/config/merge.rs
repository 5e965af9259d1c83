//! Merge policy: defaults first, every later source overrides field by field.

pub mod service;

use super::ChronoConfig;
use config::builder::DefaultState;
use config::{Config, ConfigBuilder, ConfigError};

/// Builder seeded with every default, so partial sources only override what they set.
pub(crate) fn builder_with_defaults() -> Result<ConfigBuilder<DefaultState>, ConfigError> {
    Ok(Config::builder().add_source(Config::try_from(&ChronoConfig::default())?))
}
