//! Key-Space Codec
//!
//! Every logical table lives in the single engine keyspace behind a fixed-width
//! big-endian `u32` tag. Numeric fields follow as fixed-width big-endian
//! integers so byte order equals numeric order, which is what makes a reverse
//! scan over one node's prefix yield its versions newest first.

use crate::error::StoreError;
use crate::inode::Resolution;
use crate::types::{Inode, NodeId, RevisionId};

const TAG_LEN: usize = 4;
const ID_LEN: usize = 8;

/// Table tags. Values are persisted; never renumber.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum Table {
    Revision = 0,
    RevisionIdSeq = 1,
    NodeVersion = 2,
    NodeIdSeq = 3,
    InodeIndex = 4,
    InodeIdSeq = 5,
    NodeToInode = 6,
}

impl Table {
    fn from_tag(tag: u32) -> Option<Self> {
        match tag {
            0 => Some(Table::Revision),
            1 => Some(Table::RevisionIdSeq),
            2 => Some(Table::NodeVersion),
            3 => Some(Table::NodeIdSeq),
            4 => Some(Table::InodeIndex),
            5 => Some(Table::InodeIdSeq),
            6 => Some(Table::NodeToInode),
            _ => None,
        }
    }

    fn prefix(self) -> Vec<u8> {
        (self as u32).to_be_bytes().to_vec()
    }
}

const MODE_LIVE: u8 = 0;
const MODE_SNAPSHOT: u8 = 1;

const REVISION_KEY_LEN: usize = TAG_LEN + ID_LEN;
const NODE_VERSION_KEY_LEN: usize = TAG_LEN + 2 * ID_LEN;
const INODE_INDEX_KEY_LEN: usize = TAG_LEN + ID_LEN;
const NODE_TO_INODE_KEY_LEN: usize = TAG_LEN + ID_LEN + 1 + ID_LEN;

fn key_with(table: Table, fields: &[u64]) -> Vec<u8> {
    let mut key = Vec::with_capacity(TAG_LEN + fields.len() * ID_LEN);
    key.extend_from_slice(&(table as u32).to_be_bytes());
    for field in fields {
        key.extend_from_slice(&field.to_be_bytes());
    }
    key
}

fn read_u64(key: &[u8], offset: usize) -> u64 {
    let mut buf = [0u8; ID_LEN];
    buf.copy_from_slice(&key[offset..offset + ID_LEN]);
    u64::from_be_bytes(buf)
}

/// Identify which table a key belongs to.
pub fn table_of(key: &[u8]) -> Result<Table, StoreError> {
    if key.len() < TAG_LEN {
        return Err(StoreError::MalformedKey(format!(
            "key of {} bytes has no table tag",
            key.len()
        )));
    }
    let mut tag = [0u8; TAG_LEN];
    tag.copy_from_slice(&key[..TAG_LEN]);
    let tag = u32::from_be_bytes(tag);
    Table::from_tag(tag).ok_or_else(|| StoreError::MalformedKey(format!("unknown table tag {tag}")))
}

fn expect_shape(key: &[u8], table: Table, len: usize) -> Result<(), StoreError> {
    if key.len() != len {
        return Err(StoreError::MalformedKey(format!(
            "{:?} key has length {}, want {}",
            table,
            key.len(),
            len
        )));
    }
    let found = table_of(key)?;
    if found != table {
        return Err(StoreError::MalformedKey(format!(
            "expected {:?} key, found {:?} key",
            table, found
        )));
    }
    Ok(())
}

pub fn revision_key(revision_id: RevisionId) -> Vec<u8> {
    key_with(Table::Revision, &[revision_id])
}

pub fn revision_table_prefix() -> Vec<u8> {
    Table::Revision.prefix()
}

pub fn decode_revision_key(key: &[u8]) -> Result<RevisionId, StoreError> {
    expect_shape(key, Table::Revision, REVISION_KEY_LEN)?;
    Ok(read_u64(key, TAG_LEN))
}

pub fn node_version_key(node_id: NodeId, revision_id: RevisionId) -> Vec<u8> {
    key_with(Table::NodeVersion, &[node_id, revision_id])
}

/// All versions of one node.
pub fn node_versions_for_node_prefix(node_id: NodeId) -> Vec<u8> {
    key_with(Table::NodeVersion, &[node_id])
}

/// All versions of all nodes.
pub fn node_version_table_prefix() -> Vec<u8> {
    Table::NodeVersion.prefix()
}

pub fn decode_node_version_key(key: &[u8]) -> Result<(NodeId, RevisionId), StoreError> {
    expect_shape(key, Table::NodeVersion, NODE_VERSION_KEY_LEN)?;
    Ok((read_u64(key, TAG_LEN), read_u64(key, TAG_LEN + ID_LEN)))
}

pub fn inode_index_key(inode: Inode) -> Vec<u8> {
    key_with(Table::InodeIndex, &[inode])
}

pub fn inode_index_table_prefix() -> Vec<u8> {
    Table::InodeIndex.prefix()
}

pub fn decode_inode_index_key(key: &[u8]) -> Result<Inode, StoreError> {
    expect_shape(key, Table::InodeIndex, INODE_INDEX_KEY_LEN)?;
    Ok(read_u64(key, TAG_LEN))
}

/// Reverse index: (node, resolution) to the inode already bound for it.
pub fn node_to_inode_key(node_id: NodeId, resolution: Resolution) -> Vec<u8> {
    let (mode, revision) = match resolution {
        Resolution::Live => (MODE_LIVE, 0),
        Resolution::Snapshot(revision) => (MODE_SNAPSHOT, revision),
    };
    let mut key = key_with(Table::NodeToInode, &[node_id]);
    key.push(mode);
    key.extend_from_slice(&revision.to_be_bytes());
    key
}

pub fn decode_node_to_inode_key(key: &[u8]) -> Result<(NodeId, Resolution), StoreError> {
    expect_shape(key, Table::NodeToInode, NODE_TO_INODE_KEY_LEN)?;
    let node_id = read_u64(key, TAG_LEN);
    let revision = read_u64(key, TAG_LEN + ID_LEN + 1);
    let resolution = match key[TAG_LEN + ID_LEN] {
        MODE_LIVE => Resolution::Live,
        MODE_SNAPSHOT => Resolution::Snapshot(revision),
        other => {
            return Err(StoreError::MalformedKey(format!(
                "unknown resolution mode byte {other}"
            )))
        }
    };
    Ok((node_id, resolution))
}

pub fn revision_id_seq_key() -> Vec<u8> {
    Table::RevisionIdSeq.prefix()
}

pub fn node_id_seq_key() -> Vec<u8> {
    Table::NodeIdSeq.prefix()
}

pub fn inode_id_seq_key() -> Vec<u8> {
    Table::InodeIdSeq.prefix()
}
