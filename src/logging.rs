//! Logging System
//!
//! Structured logging through `tracing`. Level, format and destination come
//! from [`LoggingConfig`], each overridable from the environment
//! (`CHRONOFS_LOG`, `CHRONOFS_LOG_FORMAT`, `CHRONOFS_LOG_OUTPUT`,
//! `CHRONOFS_LOG_FILE`, `CHRONOFS_LOG_MODULES`).

use crate::error::ApiError;
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use tracing_subscriber::fmt::time::ChronoUtc;
use tracing_subscriber::fmt::writer::{BoxMakeWriter, MakeWriterExt};
use tracing_subscriber::{fmt as layer_fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

/// Rendering of each event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = ApiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            other => Err(ApiError::ConfigError(format!(
                "Invalid log format: {} (must be 'json' or 'text')",
                other
            ))),
        }
    }
}

/// Where events are written
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
pub enum LogOutput {
    #[serde(rename = "stdout")]
    #[value(name = "stdout")]
    Stdout,
    #[default]
    #[serde(rename = "stderr")]
    #[value(name = "stderr")]
    Stderr,
    #[serde(rename = "file")]
    #[value(name = "file")]
    File,
    #[serde(rename = "file+stderr")]
    #[value(name = "file+stderr")]
    FileAndStderr,
    /// stdout and stderr
    #[serde(rename = "both")]
    #[value(name = "both")]
    Both,
}

impl LogOutput {
    fn writes_file(self) -> bool {
        matches!(self, LogOutput::File | LogOutput::FileAndStderr)
    }
}

impl FromStr for LogOutput {
    type Err = ApiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "stdout" => Ok(LogOutput::Stdout),
            "stderr" => Ok(LogOutput::Stderr),
            "file" => Ok(LogOutput::File),
            "file+stderr" => Ok(LogOutput::FileAndStderr),
            "both" => Ok(LogOutput::Both),
            other => Err(ApiError::ConfigError(format!(
                "Invalid log output: {} (must be 'stdout', 'stderr', 'file', 'file+stderr', or 'both')",
                other
            ))),
        }
    }
}

impl fmt::Display for LogOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LogOutput::Stdout => "stdout",
            LogOutput::Stderr => "stderr",
            LogOutput::File => "file",
            LogOutput::FileAndStderr => "file+stderr",
            LogOutput::Both => "both",
        };
        f.write_str(name)
    }
}

/// `[logging]` section of the store configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub enabled: bool,
    /// Default filter level: trace, debug, info, warn, error, off
    pub level: String,
    pub format: LogFormat,
    pub output: LogOutput,
    /// Used when `output` includes a file; unset falls back to the platform state dir
    pub file: Option<PathBuf>,
    /// ANSI colors for text written to a terminal
    pub color: bool,
    /// Per-target levels, e.g. `chronofs::kv = "debug"`
    pub modules: HashMap<String, String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            level: "warn".to_string(),
            format: LogFormat::Text,
            output: LogOutput::Stderr,
            file: None,
            color: true,
            modules: HashMap::new(),
        }
    }
}

/// Resolve the log file path with precedence: CLI, CHRONOFS_LOG_FILE env, config file, default.
pub fn resolve_log_file_path(
    cli_file: Option<PathBuf>,
    config_file: Option<PathBuf>,
) -> Result<PathBuf, ApiError> {
    let env_file = std::env::var_os("CHRONOFS_LOG_FILE").map(PathBuf::from);
    match [cli_file, env_file, config_file]
        .into_iter()
        .flatten()
        .find(|p| !p.as_os_str().is_empty())
    {
        Some(path) => Ok(path),
        None => default_log_file_path(),
    }
}

fn default_log_file_path() -> Result<PathBuf, ApiError> {
    let dirs = directories::ProjectDirs::from("", "chronofs", "chronofs").ok_or_else(|| {
        ApiError::ConfigError("No home directory to place the log file under".to_string())
    })?;
    // Not every platform has a state directory.
    let dir = dirs.state_dir().unwrap_or_else(|| dirs.data_local_dir());
    Ok(dir.join("chronofs.log"))
}

/// Install the global subscriber.
///
/// Environment variables win over `config`, which wins over the defaults.
pub fn init_logging(config: Option<&LoggingConfig>) -> Result<(), ApiError> {
    let defaults = LoggingConfig::default();
    let config = config.unwrap_or(&defaults);
    if !config.enabled {
        Registry::default().with(EnvFilter::new("off")).init();
        return Ok(());
    }

    let filter = build_env_filter(config)?;
    let format = env_override("CHRONOFS_LOG_FORMAT")?.unwrap_or(config.format);
    let output = env_override("CHRONOFS_LOG_OUTPUT")?.unwrap_or(config.output);
    let writer = make_writer(output, config.file.clone())?;
    let layer = layer_fmt::layer()
        .with_target(true)
        .with_timer(ChronoUtc::rfc_3339())
        .with_writer(writer);

    let registry = Registry::default().with(filter);
    match format {
        LogFormat::Json => registry.with(layer.json()).init(),
        LogFormat::Text => registry
            .with(layer.with_ansi(config.color && !output.writes_file()))
            .init(),
    }
    Ok(())
}

fn env_override<T: FromStr<Err = ApiError>>(var: &str) -> Result<Option<T>, ApiError> {
    match std::env::var(var) {
        Ok(value) if !value.is_empty() => value.parse().map(Some),
        _ => Ok(None),
    }
}

fn open_log_file(config_file: Option<PathBuf>) -> Result<std::fs::File, ApiError> {
    let log_file = resolve_log_file_path(None, config_file)?;
    if let Some(parent) = log_file.parent() {
        std::fs::create_dir_all(parent).map_err(|e| {
            ApiError::ConfigError(format!("Failed to create log directory: {}", e))
        })?;
    }
    std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_file)
        .map_err(|e| ApiError::ConfigError(format!("Failed to open log file {:?}: {}", log_file, e)))
}

fn make_writer(output: LogOutput, config_file: Option<PathBuf>) -> Result<BoxMakeWriter, ApiError> {
    let writer = match output {
        LogOutput::Stdout => BoxMakeWriter::new(std::io::stdout),
        LogOutput::Stderr => BoxMakeWriter::new(std::io::stderr),
        LogOutput::Both => BoxMakeWriter::new(std::io::stdout.and(std::io::stderr)),
        LogOutput::File => BoxMakeWriter::new(open_log_file(config_file)?),
        LogOutput::FileAndStderr => {
            BoxMakeWriter::new(open_log_file(config_file)?.and(std::io::stderr))
        }
    };
    Ok(writer)
}

/// `CHRONOFS_LOG` replaces the whole filter; otherwise level plus module directives.
fn build_env_filter(config: &LoggingConfig) -> Result<EnvFilter, ApiError> {
    if let Ok(filter) = EnvFilter::try_from_env("CHRONOFS_LOG") {
        return Ok(filter);
    }
    if config.level == "off" {
        return Ok(EnvFilter::new("off"));
    }

    let env_modules = std::env::var("CHRONOFS_LOG_MODULES").unwrap_or_default();
    let env_pairs = env_modules
        .split(',')
        .filter_map(|spec| spec.split_once('='))
        .map(|(module, level)| (module.trim(), level.trim()));
    let config_pairs = config
        .modules
        .iter()
        .map(|(module, level)| (module.as_str(), level.as_str()));

    let mut filter = EnvFilter::new(&config.level);
    for (module, level) in config_pairs.chain(env_pairs) {
        let directive = format!("{}={}", module, level)
            .parse()
            .map_err(|e| ApiError::ConfigError(format!("Invalid log directive {}={}: {}", module, level, e)))?;
        filter = filter.add_directive(directive);
    }
    Ok(filter)
}
