//! Node Version Store
//!
//! Per-node append-only chains of `NodeVersion` records, keyed by
//! (node id, revision id). A read as of revision R walks the node's chain from
//! the newest key down and returns the first version at or below R.

use crate::error::StoreError;
use crate::keys;
use crate::tree::node::NodeVersion;
use crate::txn::StoreTxn;
use crate::types::{NodeId, RevisionId};
use tracing::error;

fn decode_checked(key: &[u8], value: &[u8]) -> Result<NodeVersion, StoreError> {
    let (node_id, revision_id) = keys::decode_node_version_key(key)?;
    let version = NodeVersion::decode(value)?;
    if version.node_id != node_id || version.revision_id != revision_id {
        error!(
            key_node = node_id,
            key_revision = revision_id,
            value_node = version.node_id,
            value_revision = version.revision_id,
            "Node version key and value disagree"
        );
        return Err(StoreError::Corrupt(format!(
            "node version key ({}, {}) holds value for ({}, {})",
            node_id, revision_id, version.node_id, version.revision_id
        )));
    }
    Ok(version)
}

/// Record `version` in the attempt's observations, checking kind stability.
fn observe(txn: &mut StoreTxn<'_>, version: &NodeVersion) -> Result<(), StoreError> {
    if let Some(seen) = txn.observed(version.node_id) {
        if seen.kind != version.kind() {
            error!(
                node_id = version.node_id,
                expected = ?seen.kind,
                found = ?version.kind(),
                "Node changed kind across its versions"
            );
            return Err(StoreError::WrongKind {
                node_id: version.node_id,
                expected: seen.kind,
                found: version.kind(),
            });
        }
    }
    txn.observe(version.node_id, version.revision_id, version.kind());
    Ok(())
}

/// The version of `node_id` active as of `as_of`.
pub fn read_version(
    txn: &mut StoreTxn<'_>,
    node_id: NodeId,
    as_of: RevisionId,
) -> Result<NodeVersion, StoreError> {
    let mut found = None;
    for item in txn.scan_prefix(&keys::node_versions_for_node_prefix(node_id), true)? {
        let (key, value) = item?;
        let (_, revision_id) = keys::decode_node_version_key(&key)?;
        if revision_id > as_of {
            continue;
        }
        found = Some(decode_checked(&key, &value)?);
        break;
    }

    let version = found.ok_or_else(|| {
        StoreError::NotFound(format!(
            "node {} has no version at or before revision {}",
            node_id, as_of
        ))
    })?;
    observe(txn, &version)?;
    Ok(version)
}

/// Store a new immutable version.
///
/// # Panics
///
/// Panics if this attempt already saw a version of the node at the same or a
/// later revision, or one of a different kind.
pub fn write_version(txn: &mut StoreTxn<'_>, version: &NodeVersion) -> Result<(), StoreError> {
    if let Some(seen) = txn.observed(version.node_id) {
        assert!(
            version.revision_id > seen.highest_revision,
            "node {} written at revision {} after revision {}",
            version.node_id,
            version.revision_id,
            seen.highest_revision
        );
        assert_eq!(
            version.kind(),
            seen.kind,
            "node {} may not change kind",
            version.node_id
        );
    }
    txn.set(
        &keys::node_version_key(version.node_id, version.revision_id),
        version.encode()?,
    )?;
    txn.observe(version.node_id, version.revision_id, version.kind());
    Ok(())
}

/// Every version of `node_id`, oldest first.
pub fn version_history(
    txn: &mut StoreTxn<'_>,
    node_id: NodeId,
) -> Result<Vec<NodeVersion>, StoreError> {
    let mut versions = Vec::new();
    for item in txn.scan_prefix(&keys::node_versions_for_node_prefix(node_id), false)? {
        let (key, value) = item?;
        versions.push(decode_checked(&key, &value)?);
    }
    Ok(versions)
}

/// Whether `node_id` has any version at all.
pub fn node_exists(txn: &mut StoreTxn<'_>, node_id: NodeId) -> Result<bool, StoreError> {
    let first = txn
        .scan_prefix(&keys::node_versions_for_node_prefix(node_id), true)?
        .next()
        .transpose()?;
    Ok(first.is_some())
}
