//! CLI Tooling
//!
//! Command-line interface for inspecting and editing a store offline. Paths
//! are resolved one component at a time through `lookup`, starting at inode 1
//! or at the root of a snapshot view when `--at` is given.

use crate::concurrency::RequestContext;
use crate::config::{ChronoConfig, ConfigLoader};
use crate::error::ApiError;
use crate::logging::{LogFormat, LogOutput};
use crate::tree::node::{NodeKind, NodeVersion};
use crate::tree::{MetaStore, StoreOptions};
use crate::types::{Inode, RevisionId, ROOT_INODE};
use clap::{Parser, Subcommand, ValueEnum};
use comfy_table::Table;
use serde::Serialize;
use std::path::PathBuf;
use tracing::info;

/// chronofs CLI - versioned filesystem metadata store
#[derive(Parser)]
#[command(name = "chronofs")]
#[command(about = "Inspect and edit a versioned filesystem metadata store")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Store directory (overrides storage.data_dir)
    #[arg(long)]
    pub data_dir: Option<PathBuf>,

    /// Configuration file path (layered over the global config)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error, off)
    #[arg(long)]
    pub log_level: Option<String>,

    /// Log format
    #[arg(long, value_enum)]
    pub log_format: Option<LogFormat>,

    /// Log destination
    #[arg(long, value_enum)]
    pub log_output: Option<LogOutput>,

    /// Log file path (if output includes "file")
    #[arg(long)]
    pub log_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create the store and its root directory if missing
    Init,
    /// List a directory
    Ls {
        #[arg(default_value = "/")]
        path: String,
        /// Read as of this revision instead of the latest
        #[arg(long)]
        at: Option<RevisionId>,
        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },
    /// Create a directory
    Mkdir { path: String },
    /// Create an empty file
    Touch { path: String },
    /// Remove a file or an empty directory
    Rm { path: String },
    /// Show attributes of a file or directory
    Stat {
        path: String,
        #[arg(long)]
        at: Option<RevisionId>,
        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },
    /// List committed revisions
    Log {
        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },
    /// Show every version of a file or directory
    History {
        path: String,
        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },
    /// Verify structural invariants of the whole store
    Fsck {
        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },
}

impl Cli {
    /// Load configuration and apply command-line overrides on top.
    pub fn load_config(&self) -> Result<ChronoConfig, ApiError> {
        let mut config = ConfigLoader::load_with(self.config.as_deref())?;
        if let Some(dir) = &self.data_dir {
            config.storage.data_dir = Some(dir.clone());
        }
        if let Some(level) = &self.log_level {
            config.logging.level = level.clone();
        }
        if let Some(format) = self.log_format {
            config.logging.format = format;
        }
        if let Some(output) = self.log_output {
            config.logging.output = output;
        }
        if let Some(file) = &self.log_file {
            config.logging.file = Some(file.clone());
        }
        Ok(config)
    }
}

/// Split an absolute or relative path into its non-empty components.
fn components(path: &str) -> Vec<&str> {
    path.split('/').filter(|c| !c.is_empty()).collect()
}

/// Parent components and final name; the root itself has no name.
fn split_parent(path: &str) -> Result<(Vec<&str>, &str), ApiError> {
    let mut parts = components(path);
    let name = parts
        .pop()
        .ok_or_else(|| ApiError::InvalidPath(format!("{:?} names the root directory", path)))?;
    Ok((parts, name))
}

fn render_json<T: Serialize>(value: &T) -> Result<String, ApiError> {
    serde_json::to_string_pretty(value).map_err(|e| ApiError::OutputError(e.to_string()))
}

fn new_table(header: Vec<&str>) -> Table {
    let mut table = Table::new();
    table.load_preset(comfy_table::presets::UTF8_FULL);
    table.set_header(header);
    table
}

/// CLI context holding the opened store
pub struct CliContext {
    store: MetaStore,
    data_dir: PathBuf,
    ctx: RequestContext,
}

impl CliContext {
    pub fn open(config: &ChronoConfig) -> Result<Self, ApiError> {
        let data_dir = config.storage.resolve_data_dir()?;
        let store = MetaStore::open_path(&data_dir, &StoreOptions::from(config))?;
        Ok(Self {
            store,
            data_dir,
            ctx: RequestContext::background(),
        })
    }

    /// Context over an existing store, for tests and embedding.
    pub fn with_store(store: MetaStore) -> Self {
        Self {
            store,
            data_dir: PathBuf::new(),
            ctx: RequestContext::background(),
        }
    }

    /// Release the store's leased ids and flush.
    pub fn close(self) -> Result<(), ApiError> {
        Ok(self.store.close()?)
    }

    fn view_root(&self, at: Option<RevisionId>) -> Result<Inode, ApiError> {
        match at {
            Some(revision) => Ok(self.store.open_snapshot(&self.ctx, revision)?),
            None => Ok(ROOT_INODE),
        }
    }

    fn walk(&self, root: Inode, parts: &[&str]) -> Result<Inode, ApiError> {
        let mut inode = root;
        for part in parts {
            inode = self.store.lookup(&self.ctx, inode, part)?.inode;
        }
        Ok(inode)
    }

    fn resolve(&self, path: &str, at: Option<RevisionId>) -> Result<Inode, ApiError> {
        let root = self.view_root(at)?;
        self.walk(root, &components(path))
    }

    /// Execute a CLI command
    pub fn execute(&self, command: &Commands) -> Result<String, ApiError> {
        match command {
            Commands::Init => {
                let latest = self.store.latest_revision(&self.ctx)?;
                Ok(format!(
                    "Store ready at {} (latest revision {})",
                    self.data_dir.display(),
                    latest.revision_id
                ))
            }
            Commands::Ls { path, at, format } => {
                let dir = self.resolve(path, *at)?;
                let entries = self.store.readdir(&self.ctx, dir)?;
                match format {
                    OutputFormat::Json => render_json(&entries),
                    OutputFormat::Text => {
                        let mut table = new_table(vec!["Name", "Kind", "Inode"]);
                        for entry in &entries {
                            table.add_row(vec![
                                entry.name.clone(),
                                entry.kind.to_string(),
                                entry.inode.to_string(),
                            ]);
                        }
                        Ok(table.to_string())
                    }
                }
            }
            Commands::Mkdir { path } => self.create(path, NodeKind::Directory),
            Commands::Touch { path } => self.create(path, NodeKind::File),
            Commands::Rm { path } => {
                let (parents, name) = split_parent(path)?;
                let dir = self.walk(ROOT_INODE, &parents)?;
                self.store.remove_child(&self.ctx, dir, name)?;
                info!(path = %path, "Removed entry");
                Ok(format!("Removed {}", path))
            }
            Commands::Stat { path, at, format } => {
                let inode = self.resolve(path, *at)?;
                let attr = self.store.getattr(&self.ctx, inode)?;
                match format {
                    OutputFormat::Json => render_json(&attr),
                    OutputFormat::Text => {
                        let mut table = new_table(vec!["Field", "Value"]);
                        table.add_row(vec!["Inode".to_string(), attr.inode.to_string()]);
                        table.add_row(vec!["Node".to_string(), attr.node_id.to_string()]);
                        table.add_row(vec!["Name".to_string(), attr.name.clone()]);
                        table.add_row(vec!["Kind".to_string(), attr.kind.to_string()]);
                        table.add_row(vec!["Revision".to_string(), attr.revision_id.to_string()]);
                        table.add_row(vec!["View".to_string(), attr.resolution.to_string()]);
                        table.add_row(vec!["Children".to_string(), attr.child_count.to_string()]);
                        Ok(table.to_string())
                    }
                }
            }
            Commands::Log { format } => {
                let revisions = self.store.revisions(&self.ctx)?;
                match format {
                    OutputFormat::Json => render_json(&revisions),
                    OutputFormat::Text => {
                        let mut table = new_table(vec!["Revision", "Created At"]);
                        for revision in revisions.iter().rev() {
                            table.add_row(vec![
                                revision.revision_id.to_string(),
                                revision.created_at.to_rfc3339(),
                            ]);
                        }
                        Ok(table.to_string())
                    }
                }
            }
            Commands::History { path, format } => {
                let inode = self.resolve(path, None)?;
                let versions = self.store.node_history(&self.ctx, inode)?;
                match format {
                    OutputFormat::Json => render_json(&versions),
                    OutputFormat::Text => Ok(format_history(&versions)),
                }
            }
            Commands::Fsck { format } => {
                let report = self.store.check_consistency(&self.ctx)?;
                match format {
                    OutputFormat::Json => render_json(&report),
                    OutputFormat::Text => {
                        let mut output = format!(
                            "{} revisions, {} nodes, {} versions, {} inodes\n",
                            report.revisions, report.nodes, report.versions, report.inodes
                        );
                        if report.is_clean() {
                            output.push_str("No problems found.");
                        } else {
                            output.push_str(&format!("{} problems:\n", report.violations.len()));
                            for violation in &report.violations {
                                output.push_str(&format!("  - {}\n", violation));
                            }
                        }
                        Ok(output)
                    }
                }
            }
        }
    }

    fn create(&self, path: &str, kind: NodeKind) -> Result<String, ApiError> {
        let (parents, name) = split_parent(path)?;
        let dir = self.walk(ROOT_INODE, &parents)?;
        let inode = self.store.create_child(&self.ctx, dir, name, kind)?;
        info!(path = %path, %kind, inode, "Created entry");
        Ok(format!("Created {} {} (inode {})", kind, path, inode))
    }
}

fn format_history(versions: &[NodeVersion]) -> String {
    let mut table = new_table(vec!["Revision", "Name", "Kind", "Children"]);
    for version in versions {
        let children = version
            .directory()
            .map(|listing| {
                listing
                    .entries()
                    .iter()
                    .map(|entry| entry.name.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            })
            .unwrap_or_else(|| "-".to_string());
        table.add_row(vec![
            version.revision_id.to_string(),
            version.name.clone(),
            version.kind().to_string(),
            children,
        ]);
    }
    table.to_string()
}
