//! Integration tests for the chronofs metadata store

mod cli_contracts;
mod concurrency;
mod persistence;
mod properties;
mod snapshots;
mod support;
mod tree_operations;
