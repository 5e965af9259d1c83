//! Offline consistency check over the whole key space
//!
//! Walks the revision, node-version and inode tables in one read-only
//! transaction and collects every structural violation it finds. Nothing is
//! repaired; a clean report is the normal outcome.

use crate::error::StoreError;
use crate::inode::{InodeIndex, InodeIndexEntry, Resolution};
use crate::keys;
use crate::revision::Revision;
use crate::tree::node::{NodeKind, NodeVersion};
use crate::txn::StoreTxn;
use crate::types::{Inode, NodeId, RevisionId, ROOT_INODE, ROOT_NODE_ID};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use tracing::{error, info};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Violation {
    /// A record could not be decoded, or its key and value disagree.
    BadRecord { table: String, detail: String },
    /// A version is stamped with a revision the revision table lacks.
    UnknownRevision { node_id: NodeId, revision_id: RevisionId },
    NonIncreasingRevision {
        node_id: NodeId,
        previous: RevisionId,
        revision_id: RevisionId,
    },
    KindChanged {
        node_id: NodeId,
        revision_id: RevisionId,
        expected: NodeKind,
        found: NodeKind,
    },
    DuplicateChildName {
        node_id: NodeId,
        revision_id: RevisionId,
        name: String,
    },
    /// A directory entry names a node with no version at or before the entry's revision.
    DanglingChild {
        parent: NodeId,
        revision_id: RevisionId,
        name: String,
        child: NodeId,
    },
    MissingRoot { detail: String },
    DanglingInode { inode: Inode, node_id: NodeId },
    UnknownSnapshotRevision { inode: Inode, revision_id: RevisionId },
    /// The (node, resolution) reverse key does not lead back to the inode.
    ReverseIndexMismatch {
        inode: Inode,
        node_id: NodeId,
        found: Option<Inode>,
    },
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Violation::BadRecord { table, detail } => write!(f, "bad {} record: {}", table, detail),
            Violation::UnknownRevision {
                node_id,
                revision_id,
            } => write!(
                f,
                "node {} has a version at revision {} which was never committed",
                node_id, revision_id
            ),
            Violation::NonIncreasingRevision {
                node_id,
                previous,
                revision_id,
            } => write!(
                f,
                "node {} version {} follows version {}",
                node_id, revision_id, previous
            ),
            Violation::KindChanged {
                node_id,
                revision_id,
                expected,
                found,
            } => write!(
                f,
                "node {} is {:?} at revision {} but started as {:?}",
                node_id, found, revision_id, expected
            ),
            Violation::DuplicateChildName {
                node_id,
                revision_id,
                name,
            } => write!(
                f,
                "directory {} lists {:?} twice at revision {}",
                node_id, name, revision_id
            ),
            Violation::DanglingChild {
                parent,
                revision_id,
                name,
                child,
            } => write!(
                f,
                "directory {} at revision {} lists {:?} as node {} which does not exist yet",
                parent, revision_id, name, child
            ),
            Violation::MissingRoot { detail } => write!(f, "root: {}", detail),
            Violation::DanglingInode { inode, node_id } => {
                write!(f, "inode {} points at missing node {}", inode, node_id)
            }
            Violation::UnknownSnapshotRevision { inode, revision_id } => write!(
                f,
                "inode {} is pinned to uncommitted revision {}",
                inode, revision_id
            ),
            Violation::ReverseIndexMismatch {
                inode,
                node_id,
                found,
            } => write!(
                f,
                "reverse binding for inode {} (node {}) resolves to {:?}",
                inode, node_id, found
            ),
        }
    }
}

/// Outcome of [`check`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ConsistencyReport {
    pub revisions: usize,
    pub nodes: usize,
    pub versions: usize,
    pub inodes: usize,
    pub violations: Vec<Violation>,
}

impl ConsistencyReport {
    pub fn is_clean(&self) -> bool {
        self.violations.is_empty()
    }
}

fn bad_record(table: &str, err: impl fmt::Display) -> Violation {
    Violation::BadRecord {
        table: table.to_string(),
        detail: err.to_string(),
    }
}

fn scan_revisions(
    txn: &mut StoreTxn<'_>,
    violations: &mut Vec<Violation>,
) -> Result<BTreeSet<RevisionId>, StoreError> {
    let mut revisions = BTreeSet::new();
    for item in txn.scan_prefix(&keys::revision_table_prefix(), false)? {
        let (key, value) = item?;
        let key_id = match keys::decode_revision_key(&key) {
            Ok(id) => id,
            Err(err) => {
                violations.push(bad_record("revision", err));
                continue;
            }
        };
        match bincode::deserialize::<Revision>(&value) {
            Ok(revision) if revision.revision_id == key_id => {
                revisions.insert(key_id);
            }
            Ok(revision) => violations.push(bad_record(
                "revision",
                format!("key {} holds revision {}", key_id, revision.revision_id),
            )),
            Err(err) => violations.push(bad_record("revision", err)),
        }
    }
    Ok(revisions)
}

fn scan_versions(
    txn: &mut StoreTxn<'_>,
    violations: &mut Vec<Violation>,
) -> Result<BTreeMap<NodeId, Vec<NodeVersion>>, StoreError> {
    let mut chains: BTreeMap<NodeId, Vec<NodeVersion>> = BTreeMap::new();
    for item in txn.scan_prefix(&keys::node_version_table_prefix(), false)? {
        let (key, value) = item?;
        let (node_id, revision_id) = match keys::decode_node_version_key(&key) {
            Ok(ids) => ids,
            Err(err) => {
                violations.push(bad_record("node version", err));
                continue;
            }
        };
        let version = match NodeVersion::decode(&value) {
            Ok(version) => version,
            Err(err) => {
                violations.push(bad_record("node version", err));
                continue;
            }
        };
        if version.node_id != node_id || version.revision_id != revision_id {
            violations.push(bad_record(
                "node version",
                format!(
                    "key ({}, {}) holds ({}, {})",
                    node_id, revision_id, version.node_id, version.revision_id
                ),
            ));
            continue;
        }
        chains.entry(node_id).or_default().push(version);
    }
    Ok(chains)
}

fn check_chains(
    chains: &BTreeMap<NodeId, Vec<NodeVersion>>,
    revisions: &BTreeSet<RevisionId>,
    violations: &mut Vec<Violation>,
) {
    // First revision at which each node exists.
    let born: BTreeMap<NodeId, RevisionId> = chains
        .iter()
        .filter_map(|(node_id, chain)| chain.first().map(|v| (*node_id, v.revision_id)))
        .collect();

    for (node_id, chain) in chains {
        let Some(first) = chain.first() else {
            continue;
        };
        let mut previous: Option<RevisionId> = None;
        for version in chain {
            if !revisions.contains(&version.revision_id) {
                violations.push(Violation::UnknownRevision {
                    node_id: *node_id,
                    revision_id: version.revision_id,
                });
            }
            if let Some(previous) = previous.filter(|p| *p >= version.revision_id) {
                violations.push(Violation::NonIncreasingRevision {
                    node_id: *node_id,
                    previous,
                    revision_id: version.revision_id,
                });
            }
            previous = Some(version.revision_id);

            if version.kind() != first.kind() {
                violations.push(Violation::KindChanged {
                    node_id: *node_id,
                    revision_id: version.revision_id,
                    expected: first.kind(),
                    found: version.kind(),
                });
            }

            let Some(listing) = version.directory() else {
                continue;
            };
            for name in listing.duplicate_names() {
                violations.push(Violation::DuplicateChildName {
                    node_id: *node_id,
                    revision_id: version.revision_id,
                    name,
                });
            }
            for entry in listing.entries() {
                let exists = born
                    .get(&entry.node_id)
                    .is_some_and(|birth| *birth <= version.revision_id);
                if !exists {
                    violations.push(Violation::DanglingChild {
                        parent: *node_id,
                        revision_id: version.revision_id,
                        name: entry.name.clone(),
                        child: entry.node_id,
                    });
                }
            }
        }
    }
}

fn scan_inodes(
    txn: &mut StoreTxn<'_>,
    violations: &mut Vec<Violation>,
) -> Result<Vec<InodeIndexEntry>, StoreError> {
    let mut entries = Vec::new();
    for item in txn.scan_prefix(&keys::inode_index_table_prefix(), false)? {
        let (key, value) = item?;
        let inode = match keys::decode_inode_index_key(&key) {
            Ok(inode) => inode,
            Err(err) => {
                violations.push(bad_record("inode index", err));
                continue;
            }
        };
        match bincode::deserialize::<InodeIndexEntry>(&value) {
            Ok(entry) if entry.inode == inode => entries.push(entry),
            Ok(entry) => violations.push(bad_record(
                "inode index",
                format!("key {} holds inode {}", inode, entry.inode),
            )),
            Err(err) => violations.push(bad_record("inode index", err)),
        }
    }
    Ok(entries)
}

fn check_inodes(
    txn: &mut StoreTxn<'_>,
    entries: &[InodeIndexEntry],
    chains: &BTreeMap<NodeId, Vec<NodeVersion>>,
    revisions: &BTreeSet<RevisionId>,
    violations: &mut Vec<Violation>,
) -> Result<(), StoreError> {
    for entry in entries {
        if !chains.contains_key(&entry.node_id) {
            violations.push(Violation::DanglingInode {
                inode: entry.inode,
                node_id: entry.node_id,
            });
        }
        if let Resolution::Snapshot(revision_id) = entry.resolution {
            if !revisions.contains(&revision_id) {
                violations.push(Violation::UnknownSnapshotRevision {
                    inode: entry.inode,
                    revision_id,
                });
            }
        }
        let found = match InodeIndex::find_binding(txn, entry.node_id, entry.resolution) {
            Ok(found) => found,
            Err(err) if err.is_corruption() => {
                violations.push(bad_record("reverse inode binding", err));
                continue;
            }
            Err(err) => return Err(err),
        };
        if found != Some(entry.inode) {
            violations.push(Violation::ReverseIndexMismatch {
                inode: entry.inode,
                node_id: entry.node_id,
                found,
            });
        }
    }
    Ok(())
}

fn check_root(
    entries: &[InodeIndexEntry],
    chains: &BTreeMap<NodeId, Vec<NodeVersion>>,
    violations: &mut Vec<Violation>,
) {
    match chains.get(&ROOT_NODE_ID).and_then(|chain| chain.first()) {
        None => violations.push(Violation::MissingRoot {
            detail: format!("node {} has no versions", ROOT_NODE_ID),
        }),
        Some(first) if first.kind() != NodeKind::Directory => {
            violations.push(Violation::MissingRoot {
                detail: format!("node {} is not a directory", ROOT_NODE_ID),
            })
        }
        Some(_) => {}
    }

    let expected = InodeIndexEntry {
        inode: ROOT_INODE,
        node_id: ROOT_NODE_ID,
        resolution: Resolution::Live,
    };
    match entries.iter().find(|entry| entry.inode == ROOT_INODE) {
        Some(entry) if *entry == expected => {}
        Some(entry) => violations.push(Violation::MissingRoot {
            detail: format!(
                "inode {} is bound to node {} ({})",
                ROOT_INODE, entry.node_id, entry.resolution
            ),
        }),
        None => violations.push(Violation::MissingRoot {
            detail: format!("inode {} is not bound", ROOT_INODE),
        }),
    }
}

/// Check every table visible to `txn`.
pub fn check(txn: &mut StoreTxn<'_>) -> Result<ConsistencyReport, StoreError> {
    let mut violations = Vec::new();

    let revisions = scan_revisions(txn, &mut violations)?;
    let chains = scan_versions(txn, &mut violations)?;
    check_chains(&chains, &revisions, &mut violations);
    let entries = scan_inodes(txn, &mut violations)?;
    check_inodes(txn, &entries, &chains, &revisions, &mut violations)?;
    check_root(&entries, &chains, &mut violations);

    let report = ConsistencyReport {
        revisions: revisions.len(),
        nodes: chains.len(),
        versions: chains.values().map(Vec::len).sum(),
        inodes: entries.len(),
        violations,
    };
    if report.is_clean() {
        info!(
            revisions = report.revisions,
            nodes = report.nodes,
            versions = report.versions,
            inodes = report.inodes,
            "Consistency check passed"
        );
    } else {
        for violation in &report.violations {
            error!(%violation, "Consistency violation");
        }
    }
    Ok(report)
}
