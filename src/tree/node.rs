//! Filesystem node types
//!
//! A `NodeVersion` is one immutable snapshot of a node as of a revision.
//! Changing a directory never edits a version in place: the caller builds the
//! successor from the old value (`with_child` / `without_child`) and stores it
//! at the new revision.

use crate::error::StoreError;
use crate::types::{NodeId, RevisionId};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

/// Node kind; fixed for the whole life of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeKind {
    File,
    Directory,
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeKind::File => write!(f, "file"),
            NodeKind::Directory => write!(f, "directory"),
        }
    }
}

/// Attributes carried by a file version
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMetadata {
    pub size: u64,
}

/// One (name, child) association inside a directory version
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChildEntry {
    pub name: String,
    pub node_id: NodeId,
}

/// Children of a directory version, in creation order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryListing {
    entries: Vec<ChildEntry>,
}

impl DirectoryListing {
    pub fn entries(&self) -> &[ChildEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn find(&self, name: &str) -> Option<&ChildEntry> {
        self.entries.iter().find(|entry| entry.name == name)
    }

    /// Copy of this listing with one more entry appended.
    pub fn with_child(&self, name: &str, node_id: NodeId) -> Result<Self, StoreError> {
        if self.find(name).is_some() {
            return Err(StoreError::AlreadyExists {
                name: name.to_string(),
            });
        }
        let mut entries = Vec::with_capacity(self.entries.len() + 1);
        entries.extend_from_slice(&self.entries);
        entries.push(ChildEntry {
            name: name.to_string(),
            node_id,
        });
        Ok(Self { entries })
    }

    /// Copy of this listing without `name`, plus the entry that was dropped.
    pub fn without_child(&self, name: &str) -> Option<(Self, ChildEntry)> {
        let position = self.entries.iter().position(|entry| entry.name == name)?;
        let mut entries = self.entries.clone();
        let removed = entries.remove(position);
        Some((Self { entries }, removed))
    }

    /// Names that occur more than once; empty for a well-formed listing.
    pub fn duplicate_names(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        self.entries
            .iter()
            .filter(|entry| !seen.insert(entry.name.as_str()))
            .map(|entry| entry.name.clone())
            .collect()
    }
}

/// Kind-specific payload of a version
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeBody {
    File(FileMetadata),
    Directory(DirectoryListing),
}

impl NodeBody {
    /// Empty body of the given kind, used for a node's first version.
    pub fn empty(kind: NodeKind) -> Self {
        match kind {
            NodeKind::File => NodeBody::File(FileMetadata::default()),
            NodeKind::Directory => NodeBody::Directory(DirectoryListing::default()),
        }
    }

    pub fn kind(&self) -> NodeKind {
        match self {
            NodeBody::File(_) => NodeKind::File,
            NodeBody::Directory(_) => NodeKind::Directory,
        }
    }
}

/// Immutable, revision-stamped snapshot of one node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeVersion {
    pub node_id: NodeId,
    pub revision_id: RevisionId,
    pub name: String,
    pub body: NodeBody,
    /// Set from the revision that removed the node from its parent.
    #[serde(default)]
    pub unlinked: bool,
}

impl NodeVersion {
    /// First version of a new node.
    pub fn initial(node_id: NodeId, revision_id: RevisionId, name: &str, kind: NodeKind) -> Self {
        Self {
            node_id,
            revision_id,
            name: name.to_string(),
            body: NodeBody::empty(kind),
            unlinked: false,
        }
    }

    pub fn kind(&self) -> NodeKind {
        self.body.kind()
    }

    pub fn is_directory(&self) -> bool {
        self.kind() == NodeKind::Directory
    }

    pub fn directory(&self) -> Option<&DirectoryListing> {
        match &self.body {
            NodeBody::Directory(listing) => Some(listing),
            NodeBody::File(_) => None,
        }
    }

    /// The version that follows this one at `revision_id` with a new body.
    pub fn successor(&self, revision_id: RevisionId, body: NodeBody) -> Self {
        Self {
            node_id: self.node_id,
            revision_id,
            name: self.name.clone(),
            body,
            unlinked: self.unlinked,
        }
    }

    /// The version recording that the node was removed at `revision_id`.
    pub fn unlinked_at(&self, revision_id: RevisionId) -> Self {
        Self {
            revision_id,
            unlinked: true,
            ..self.clone()
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, StoreError> {
        Ok(bincode::serialize(self)?)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, StoreError> {
        Ok(bincode::deserialize(bytes)?)
    }
}
