//! chronofs CLI Binary
//!
//! Command-line interface for the versioned filesystem metadata store.

use chronofs::logging::init_logging;
use chronofs::tooling::cli::{Cli, CliContext};
use clap::Parser;
use std::process;

fn main() {
    let cli = Cli::parse();

    let config = match cli.load_config() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error loading configuration: {}", e);
            process::exit(1);
        }
    };

    if let Err(e) = init_logging(Some(&config.logging)) {
        eprintln!("Error initializing logging: {}", e);
        process::exit(1);
    }

    let context = match CliContext::open(&config) {
        Ok(ctx) => ctx,
        Err(e) => {
            eprintln!("Error opening store: {}", e);
            process::exit(1);
        }
    };

    let result = context.execute(&cli.command);
    if let Err(e) = context.close() {
        eprintln!("Error closing store: {}", e);
    }
    match result {
        Ok(output) => {
            println!("{}", output);
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            process::exit(1);
        }
    }
}
