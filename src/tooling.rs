//! Tooling & Integration Layer
//!
//! The `chronofs` command-line front end over [`crate::tree::MetaStore`].

pub mod cli;

pub use cli::{Cli, CliContext, Commands, OutputFormat};
