//! Error types
//!
//! Two layers: `StoreError` is what every store operation returns and what the
//! filesystem bridge translates into an errno; `ApiError` is the tooling-facing
//! error that also covers configuration and logging setup.

use crate::tree::node::NodeKind;
use crate::types::{Inode, NodeId, RevisionId};
use thiserror::Error;

/// Errors produced by the metadata store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A node, revision or other record that was asked for does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Directory lookup miss.
    #[error("no entry named {name:?} in directory inode {dir}")]
    NoEntry { dir: Inode, name: String },

    /// The inode is unknown to the index, or its node has no visible version.
    #[error("stale handle: inode {0} cannot be resolved")]
    StaleHandle(Inode),

    #[error("entry {name:?} already exists")]
    AlreadyExists { name: String },

    #[error("inode {0} is not a directory")]
    NotADirectory(Inode),

    /// A node was read back with a kind other than the one its chain started with.
    #[error("node {node_id} has kind {found:?}, expected {expected:?}")]
    WrongKind {
        node_id: NodeId,
        expected: NodeKind,
        found: NodeKind,
    },

    /// Mutation attempted through an inode pinned to a historical revision.
    #[error("inode {inode} is a read-only view pinned to revision {revision}")]
    ReadOnlySnapshot { inode: Inode, revision: RevisionId },

    #[error("directory {name:?} is not empty")]
    NotEmpty { name: String },

    #[error("invalid entry name {0:?}")]
    InvalidName(String),

    #[error("entry name is {0} bytes long")]
    NameTooLong(usize),

    /// Transient write-write or read-write conflict reported at commit.
    #[error("transaction conflict: {0}")]
    Conflict(String),

    /// The retry budget ran out while conflicts kept occurring.
    #[error("store busy: gave up after {attempts} conflicting attempts")]
    Busy { attempts: u32 },

    /// The caller's request was cancelled or its deadline passed.
    #[error("operation cancelled")]
    Cancelled,

    /// An internal invariant does not hold; on-disk damage or a bug.
    #[error("store corrupt: {0}")]
    Corrupt(String),

    #[error("malformed key: {0}")]
    MalformedKey(String),

    /// A sequence could not hand out a value.
    #[error("id allocation failed: {0}")]
    Allocation(String),

    #[error("storage engine error: {0}")]
    Engine(#[from] sled::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    /// Only commit conflicts are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Conflict(_))
    }

    /// Errors that indicate damage or a bug rather than a caller mistake.
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            StoreError::Corrupt(_) | StoreError::MalformedKey(_) | StoreError::Serialization(_)
        )
    }

    /// POSIX errno for the filesystem bridge.
    ///
    /// Every variant has its own arm so a new variant cannot be added without
    /// choosing an errno for it.
    pub fn to_errno(&self) -> libc::c_int {
        match self {
            StoreError::NotFound(_) => libc::ENOENT,
            StoreError::NoEntry { .. } => libc::ENOENT,
            StoreError::StaleHandle(_) => libc::ESTALE,
            StoreError::AlreadyExists { .. } => libc::EEXIST,
            StoreError::NotADirectory(_) => libc::ENOTDIR,
            StoreError::WrongKind { .. } => libc::EIO,
            StoreError::ReadOnlySnapshot { .. } => libc::EROFS,
            StoreError::NotEmpty { .. } => libc::ENOTEMPTY,
            StoreError::InvalidName(_) => libc::EINVAL,
            StoreError::NameTooLong(_) => libc::ENAMETOOLONG,
            StoreError::Conflict(_) => libc::EAGAIN,
            StoreError::Busy { .. } => libc::EAGAIN,
            StoreError::Cancelled => libc::EINTR,
            StoreError::Corrupt(_) => libc::EIO,
            StoreError::MalformedKey(_) => libc::EIO,
            StoreError::Allocation(_) => libc::EIO,
            StoreError::Engine(_) => libc::EIO,
            StoreError::Serialization(_) => libc::EIO,
            StoreError::Io(err) => err.raw_os_error().unwrap_or(libc::EIO),
        }
    }
}

/// Tooling-level errors
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Storage error: {0}")]
    StorageError(#[from] StoreError),

    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("Output error: {0}")]
    OutputError(String),
}

impl From<config::ConfigError> for ApiError {
    fn from(err: config::ConfigError) -> Self {
        ApiError::ConfigError(err.to_string())
    }
}
