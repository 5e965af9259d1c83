//! Inode Index
//!
//! Maps the stable identifiers handed to the filesystem bridge onto a node and
//! a resolution mode. Entries are write-once: an inode keeps pointing at the
//! same node under the same mode for its whole life. A reverse table keyed by
//! (node, mode) lets repeated lookups reuse an existing binding.

use crate::error::StoreError;
use crate::keys;
use crate::revision::RevisionLog;
use crate::sequence::Sequence;
use crate::txn::StoreTxn;
use crate::types::{Inode, NodeId, RevisionId};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, error};

/// How an inode picks the revision it reads at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Resolution {
    /// Always the latest committed revision.
    Live,
    /// Pinned to one historical revision; read-only.
    Snapshot(RevisionId),
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Resolution::Live => write!(f, "live"),
            Resolution::Snapshot(revision) => write!(f, "snapshot@{}", revision),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InodeIndexEntry {
    pub inode: Inode,
    pub node_id: NodeId,
    pub resolution: Resolution,
}

/// An inode resolved against one transaction's view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolved {
    pub inode: Inode,
    pub node_id: NodeId,
    pub resolution: Resolution,
    pub target_revision: RevisionId,
}

impl Resolved {
    pub fn is_snapshot(&self) -> bool {
        matches!(self.resolution, Resolution::Snapshot(_))
    }
}

fn decode_inode_value(raw: &[u8]) -> Result<Inode, StoreError> {
    let bytes: [u8; 8] = raw.try_into().map_err(|_| {
        StoreError::Corrupt(format!("reverse inode binding has {} bytes, want 8", raw.len()))
    })?;
    Ok(u64::from_be_bytes(bytes))
}

pub struct InodeIndex<'a> {
    sequence: &'a Sequence,
}

impl<'a> InodeIndex<'a> {
    pub fn new(sequence: &'a Sequence) -> Self {
        Self { sequence }
    }

    /// Resolve `inode` to its node and the revision it should be read at.
    pub fn resolve(txn: &mut StoreTxn<'_>, inode: Inode) -> Result<Resolved, StoreError> {
        let entry = Self::get_entry(txn, inode)?.ok_or(StoreError::StaleHandle(inode))?;
        let target_revision = match entry.resolution {
            Resolution::Live => RevisionLog::latest(txn)?.revision_id,
            Resolution::Snapshot(revision) => revision,
        };
        Ok(Resolved {
            inode,
            node_id: entry.node_id,
            resolution: entry.resolution,
            target_revision,
        })
    }

    pub fn get_entry(
        txn: &mut StoreTxn<'_>,
        inode: Inode,
    ) -> Result<Option<InodeIndexEntry>, StoreError> {
        let key = keys::inode_index_key(inode);
        let raw = match txn.get(&key)? {
            Some(raw) => raw,
            None => return Ok(None),
        };
        let entry: InodeIndexEntry = bincode::deserialize(&raw)?;
        if entry.inode != inode {
            error!(inode, value_inode = entry.inode, "Inode index key and value disagree");
            return Err(StoreError::Corrupt(format!(
                "inode index key is for {} but value has {}",
                inode, entry.inode
            )));
        }
        Ok(Some(entry))
    }

    /// Inode already bound to `node_id` under `resolution`, if any.
    pub fn find_binding(
        txn: &mut StoreTxn<'_>,
        node_id: NodeId,
        resolution: Resolution,
    ) -> Result<Option<Inode>, StoreError> {
        match txn.get(&keys::node_to_inode_key(node_id, resolution))? {
            Some(raw) => Ok(Some(decode_inode_value(&raw)?)),
            None => Ok(None),
        }
    }

    /// Inode for (`node_id`, `resolution`), binding a fresh one the first time.
    pub fn bind(
        &self,
        txn: &mut StoreTxn<'_>,
        node_id: NodeId,
        resolution: Resolution,
    ) -> Result<Inode, StoreError> {
        if let Some(inode) = Self::find_binding(txn, node_id, resolution)? {
            return Ok(inode);
        }
        let inode = self.sequence.next()?;
        Self::write_entry(
            txn,
            InodeIndexEntry {
                inode,
                node_id,
                resolution,
            },
        )?;
        debug!(inode, node_id, %resolution, "Bound inode");
        Ok(inode)
    }

    /// Record `entry` under its fixed inode number.
    ///
    /// Idempotent when the identical entry already exists.
    ///
    /// # Panics
    ///
    /// Panics if the inode is already bound to a different node or mode.
    pub fn bind_at(txn: &mut StoreTxn<'_>, entry: InodeIndexEntry) -> Result<(), StoreError> {
        if let Some(existing) = Self::get_entry(txn, entry.inode)? {
            assert_eq!(
                existing, entry,
                "inode {} may not be rebound",
                entry.inode
            );
            return Ok(());
        }
        Self::write_entry(txn, entry)
    }

    fn write_entry(txn: &mut StoreTxn<'_>, entry: InodeIndexEntry) -> Result<(), StoreError> {
        txn.set(
            &keys::inode_index_key(entry.inode),
            bincode::serialize(&entry)?,
        )?;
        txn.set(
            &keys::node_to_inode_key(entry.node_id, entry.resolution),
            entry.inode.to_be_bytes().to_vec(),
        )
    }

    /// Every inode entry, ascending by inode.
    pub fn entries(txn: &mut StoreTxn<'_>) -> Result<Vec<InodeIndexEntry>, StoreError> {
        let mut entries = Vec::new();
        for item in txn.scan_prefix(&keys::inode_index_table_prefix(), false)? {
            let (key, value) = item?;
            let inode = keys::decode_inode_index_key(&key)?;
            let entry: InodeIndexEntry = bincode::deserialize(&value)?;
            if entry.inode != inode {
                return Err(StoreError::Corrupt(format!(
                    "inode index key is for {} but value has {}",
                    inode, entry.inode
                )));
            }
            entries.push(entry);
        }
        Ok(entries)
    }
}
