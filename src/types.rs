//! Core identifier types for the versioned metadata store.

/// NodeId: permanent identity of a file or directory
pub type NodeId = u64;

/// RevisionId: position of a committed tree state in the global order
pub type RevisionId = u64;

/// Inode: stable identifier handed out to the filesystem bridge
pub type Inode = u64;

/// The root directory always has node id 1.
pub const ROOT_NODE_ID: NodeId = 1;

/// The root directory is always exposed as inode 1 (live view).
pub const ROOT_INODE: Inode = 1;

/// First value the node id sequence may hand out; 0 is never issued.
pub const FIRST_ALLOCATED_NODE_ID: NodeId = 2;

/// First value the inode sequence may hand out.
pub const FIRST_ALLOCATED_INODE: Inode = 2;

/// First value the revision sequence may hand out; 0 means "no revision".
pub const FIRST_REVISION_ID: RevisionId = 1;

/// Longest child name accepted, in bytes.
pub const MAX_NAME_LEN: usize = 255;
