//! chronofs: Versioned Filesystem Metadata Store
//!
//! Represents a directory tree as immutable, revision-stamped node versions
//! in a transactional key-value space, and hands out stable inode numbers
//! that resolve either to the live tree or to a frozen historical revision.

pub mod concurrency;
pub mod config;
pub mod error;
pub mod inode;
pub mod keys;
pub mod kv;
pub mod logging;
pub mod revision;
pub mod sequence;
pub mod store;
pub mod tooling;
pub mod tree;
pub mod txn;
pub mod types;

pub use concurrency::{RequestContext, RetryPolicy};
pub use error::{ApiError, StoreError};
pub use inode::Resolution;
pub use tree::node::NodeKind;
pub use tree::{DirEntry, MetaStore, NodeAttr, StoreOptions};
