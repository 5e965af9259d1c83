//! Tree Operations
//!
//! [`MetaStore`] is the surface the filesystem bridge talks to. Every
//! operation runs as one closure under [`run_in_txn`]: resolve the inode,
//! read the versions it needs at the resolved revision, write new versions at
//! a freshly appended revision when it mutates, and commit. Conflicts rerun
//! the closure from scratch.

pub mod consistency;
pub mod names;
pub mod node;

use crate::concurrency::{run_in_txn, RequestContext, RetryPolicy};
use crate::config::ChronoConfig;
use crate::error::{ApiError, StoreError};
use crate::inode::{InodeIndex, InodeIndexEntry, Resolution, Resolved};
use crate::kv::{EngineStats, KvEngine, MvccEngine, SledLog};
use crate::revision::{Revision, RevisionLog};
use crate::sequence::Sequences;
use crate::store;
use crate::txn::StoreTxn;
use crate::types::{Inode, NodeId, RevisionId, ROOT_INODE, ROOT_NODE_ID};
use consistency::ConsistencyReport;
use names::validate_name;
use node::{NodeBody, NodeKind, NodeVersion};
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, error, info};

/// One directory entry as seen through a particular inode view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DirEntry {
    pub name: String,
    pub inode: Inode,
    pub kind: NodeKind,
}

/// Attributes of the version an inode currently resolves to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NodeAttr {
    pub inode: Inode,
    pub node_id: NodeId,
    pub name: String,
    pub kind: NodeKind,
    /// Revision of the visible version, not the revision it was resolved at.
    pub revision_id: RevisionId,
    pub resolution: Resolution,
    /// Entries for a directory, zero for a file.
    pub child_count: usize,
}

/// Tuning for a [`MetaStore`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreOptions {
    pub sync_on_commit: bool,
    pub sequence_bandwidth: u64,
    pub retry: RetryPolicy,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            sync_on_commit: true,
            sequence_bandwidth: 100,
            retry: RetryPolicy::default(),
        }
    }
}

impl From<&ChronoConfig> for StoreOptions {
    fn from(config: &ChronoConfig) -> Self {
        Self {
            sync_on_commit: config.storage.sync_on_commit,
            sequence_bandwidth: config.sequence.bandwidth,
            retry: RetryPolicy::from(&config.retry),
        }
    }
}

const ROOT_ENTRY: InodeIndexEntry = InodeIndexEntry {
    inode: ROOT_INODE,
    node_id: ROOT_NODE_ID,
    resolution: Resolution::Live,
};

/// Versioned filesystem metadata store.
///
/// Owns the engine handle and the three id sequences. Call [`MetaStore::close`]
/// to hand unused leased ids back; dropping the store does the same on a best
/// effort basis.
pub struct MetaStore {
    sequences: Sequences,
    engine: Arc<dyn KvEngine>,
    mvcc: Option<MvccEngine>,
    retry: RetryPolicy,
}

impl MetaStore {
    /// Open the durable store described by `config`, bootstrapping it if new.
    pub fn open(config: &ChronoConfig) -> Result<Self, ApiError> {
        let data_dir = config.storage.resolve_data_dir()?;
        Ok(Self::open_path(&data_dir, &StoreOptions::from(config))?)
    }

    /// Open the durable store at `path`.
    pub fn open_path(path: &Path, options: &StoreOptions) -> Result<Self, StoreError> {
        let log = SledLog::open(path, options.sync_on_commit)?;
        let engine = MvccEngine::durable(log)?;
        info!(path = %path.display(), "Opened metadata store");
        Self::with_mvcc(engine, options)
    }

    /// A volatile store; everything is gone once it drops.
    pub fn in_memory(options: &StoreOptions) -> Result<Self, StoreError> {
        Self::with_mvcc(MvccEngine::in_memory(), options)
    }

    fn with_mvcc(engine: MvccEngine, options: &StoreOptions) -> Result<Self, StoreError> {
        let mut store = Self::with_engine(Arc::new(engine.clone()), options)?;
        store.mvcc = Some(engine);
        Ok(store)
    }

    /// Run the store on any engine; bootstraps the root before returning.
    pub fn with_engine(engine: Arc<dyn KvEngine>, options: &StoreOptions) -> Result<Self, StoreError> {
        let store = Self {
            sequences: Sequences::acquire(engine.clone(), options.sequence_bandwidth),
            engine,
            mvcc: None,
            retry: options.retry,
        };
        store.ensure_root(&RequestContext::background())?;
        Ok(store)
    }

    fn run<T>(
        &self,
        ctx: &RequestContext,
        operation: &str,
        body: impl FnMut(&mut StoreTxn<'_>) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        run_in_txn(self.engine.as_ref(), &self.retry, ctx, operation, body)
    }

    fn revision_log(&self) -> RevisionLog<'_> {
        RevisionLog::new(&self.sequences.revision)
    }

    fn inode_index(&self) -> InodeIndex<'_> {
        InodeIndex::new(&self.sequences.inode)
    }

    /// Create the root directory and inode 1 unless they already exist.
    ///
    /// Returns whether this call did the bootstrap.
    pub fn ensure_root(&self, ctx: &RequestContext) -> Result<bool, StoreError> {
        let created = self.run(ctx, "ensure_root", |txn| {
            if store::node_exists(txn, ROOT_NODE_ID)? {
                // Both halves of bootstrap commit together, so a root node
                // without revisions is damage.
                RevisionLog::latest(txn)?;
                InodeIndex::bind_at(txn, ROOT_ENTRY)?;
                return Ok(false);
            }
            let revision = self.revision_log().append(txn)?;
            store::write_version(
                txn,
                &NodeVersion::initial(ROOT_NODE_ID, revision.revision_id, "", NodeKind::Directory),
            )?;
            InodeIndex::bind_at(txn, ROOT_ENTRY)?;
            Ok(true)
        })?;
        if created {
            info!("Bootstrapped root directory");
        }
        Ok(created)
    }

    /// Resolve `inode` and read the version it currently shows.
    fn resolve_node(
        txn: &mut StoreTxn<'_>,
        inode: Inode,
    ) -> Result<(Resolved, NodeVersion), StoreError> {
        let resolved = InodeIndex::resolve(txn, inode)?;
        let version = store::read_version(txn, resolved.node_id, resolved.target_revision)
            .map_err(|err| match err {
                StoreError::NotFound(_) => StoreError::StaleHandle(inode),
                other => other,
            })?;
        Ok((resolved, version))
    }

    fn resolve_directory(
        txn: &mut StoreTxn<'_>,
        inode: Inode,
    ) -> Result<(Resolved, NodeVersion), StoreError> {
        let (resolved, version) = Self::resolve_node(txn, inode)?;
        if !version.is_directory() {
            return Err(StoreError::NotADirectory(inode));
        }
        Ok((resolved, version))
    }

    /// A live directory that is still linked into the tree.
    fn resolve_writable_directory(
        txn: &mut StoreTxn<'_>,
        inode: Inode,
    ) -> Result<(Resolved, NodeVersion), StoreError> {
        let (resolved, version) = Self::resolve_directory(txn, inode)?;
        if let Resolution::Snapshot(revision) = resolved.resolution {
            return Err(StoreError::ReadOnlySnapshot { inode, revision });
        }
        if version.unlinked {
            return Err(StoreError::NotFound(format!(
                "directory inode {} was removed at revision {}",
                inode, version.revision_id
            )));
        }
        Ok((resolved, version))
    }

    /// A child listed by a directory version must exist at that revision.
    fn read_child(
        txn: &mut StoreTxn<'_>,
        parent: &NodeVersion,
        child: NodeId,
        as_of: RevisionId,
    ) -> Result<NodeVersion, StoreError> {
        store::read_version(txn, child, as_of).map_err(|err| match err {
            StoreError::NotFound(_) => {
                error!(
                    parent = parent.node_id,
                    parent_revision = parent.revision_id,
                    child,
                    "Directory entry points at a missing node"
                );
                StoreError::Corrupt(format!(
                    "directory {} lists node {} which has no version at revision {}",
                    parent.node_id, child, as_of
                ))
            }
            other => other,
        })
    }

    fn child_entry(
        &self,
        txn: &mut StoreTxn<'_>,
        resolved: &Resolved,
        parent: &NodeVersion,
        name: &str,
        node_id: NodeId,
    ) -> Result<DirEntry, StoreError> {
        let child = Self::read_child(txn, parent, node_id, resolved.target_revision)?;
        let inode = self.inode_index().bind(txn, node_id, resolved.resolution)?;
        Ok(DirEntry {
            name: name.to_string(),
            inode,
            kind: child.kind(),
        })
    }

    /// Find `name` in directory `dir`, binding an inode for it in the same view.
    pub fn lookup(&self, ctx: &RequestContext, dir: Inode, name: &str) -> Result<DirEntry, StoreError> {
        self.run(ctx, "lookup", |txn| {
            let (resolved, parent) = Self::resolve_directory(txn, dir)?;
            let node_id = parent
                .directory()
                .and_then(|listing| listing.find(name))
                .map(|entry| entry.node_id)
                .ok_or_else(|| StoreError::NoEntry {
                    dir,
                    name: name.to_string(),
                })?;
            self.child_entry(txn, &resolved, &parent, name, node_id)
        })
    }

    /// List directory `dir` in creation order.
    pub fn readdir(&self, ctx: &RequestContext, dir: Inode) -> Result<Vec<DirEntry>, StoreError> {
        self.run(ctx, "readdir", |txn| {
            let (resolved, parent) = Self::resolve_directory(txn, dir)?;
            let children: Vec<(String, NodeId)> = parent
                .directory()
                .map(|listing| {
                    listing
                        .entries()
                        .iter()
                        .map(|entry| (entry.name.clone(), entry.node_id))
                        .collect()
                })
                .unwrap_or_default();

            children
                .iter()
                .map(|(name, node_id)| self.child_entry(txn, &resolved, &parent, name, *node_id))
                .collect()
        })
    }

    /// Create an empty file or directory `name` under live directory `dir`.
    pub fn create_child(
        &self,
        ctx: &RequestContext,
        dir: Inode,
        name: &str,
        kind: NodeKind,
    ) -> Result<Inode, StoreError> {
        validate_name(name)?;
        self.run(ctx, "create_child", |txn| {
            let (_, parent) = Self::resolve_writable_directory(txn, dir)?;
            let listing = parent
                .directory()
                .ok_or(StoreError::NotADirectory(dir))?;
            if listing.find(name).is_some() {
                return Err(StoreError::AlreadyExists {
                    name: name.to_string(),
                });
            }

            let revision = self.revision_log().append(txn)?;
            let node_id = self.sequences.node.next()?;
            let listing = listing.with_child(name, node_id)?;
            store::write_version(
                txn,
                &NodeVersion::initial(node_id, revision.revision_id, name, kind),
            )?;
            store::write_version(
                txn,
                &parent.successor(revision.revision_id, NodeBody::Directory(listing)),
            )?;
            let inode = self.inode_index().bind(txn, node_id, Resolution::Live)?;
            debug!(
                parent = parent.node_id,
                name,
                ?kind,
                node_id,
                inode,
                revision = revision.revision_id,
                "Created child"
            );
            Ok(inode)
        })
    }

    /// Unlink a file or an empty directory from live directory `dir`.
    ///
    /// The removed node keeps its history, so older snapshots still show it.
    /// Its chain ends in an unlinked version, which stops a removed directory
    /// from taking new children through an inode that is still bound to it.
    pub fn remove_child(&self, ctx: &RequestContext, dir: Inode, name: &str) -> Result<(), StoreError> {
        self.run(ctx, "remove_child", |txn| {
            let (resolved, parent) = Self::resolve_writable_directory(txn, dir)?;
            let (listing, removed) = parent
                .directory()
                .and_then(|listing| listing.without_child(name))
                .ok_or_else(|| StoreError::NoEntry {
                    dir,
                    name: name.to_string(),
                })?;

            let child =
                Self::read_child(txn, &parent, removed.node_id, resolved.target_revision)?;
            if child.directory().is_some_and(|entries| !entries.is_empty()) {
                return Err(StoreError::NotEmpty {
                    name: name.to_string(),
                });
            }

            let revision = self.revision_log().append(txn)?;
            store::write_version(
                txn,
                &parent.successor(revision.revision_id, NodeBody::Directory(listing)),
            )?;
            store::write_version(txn, &child.unlinked_at(revision.revision_id))?;
            debug!(
                parent = parent.node_id,
                name,
                node_id = removed.node_id,
                revision = revision.revision_id,
                "Removed child"
            );
            Ok(())
        })
    }

    pub fn getattr(&self, ctx: &RequestContext, inode: Inode) -> Result<NodeAttr, StoreError> {
        self.run(ctx, "getattr", |txn| {
            let (resolved, version) = Self::resolve_node(txn, inode)?;
            Ok(NodeAttr {
                inode,
                node_id: version.node_id,
                name: version.name.clone(),
                kind: version.kind(),
                revision_id: version.revision_id,
                resolution: resolved.resolution,
                child_count: version.directory().map_or(0, |listing| listing.len()),
            })
        })
    }

    /// Root of a read-only view pinned to `revision_id`.
    ///
    /// Repeated calls for the same revision return the same inode.
    pub fn open_snapshot(&self, ctx: &RequestContext, revision_id: RevisionId) -> Result<Inode, StoreError> {
        self.run(ctx, "open_snapshot", |txn| {
            if RevisionLog::get(txn, revision_id)?.is_none() {
                return Err(StoreError::NotFound(format!("revision {}", revision_id)));
            }
            self.inode_index()
                .bind(txn, ROOT_NODE_ID, Resolution::Snapshot(revision_id))
        })
    }

    pub fn latest_revision(&self, ctx: &RequestContext) -> Result<Revision, StoreError> {
        self.run(ctx, "latest_revision", |txn| RevisionLog::latest(txn))
    }

    /// Every committed revision, oldest first.
    pub fn revisions(&self, ctx: &RequestContext) -> Result<Vec<Revision>, StoreError> {
        self.run(ctx, "revisions", |txn| RevisionLog::list(txn))
    }

    /// Versions of the node behind `inode`, oldest first.
    ///
    /// A snapshot inode only sees versions up to its pinned revision.
    pub fn node_history(&self, ctx: &RequestContext, inode: Inode) -> Result<Vec<NodeVersion>, StoreError> {
        self.run(ctx, "node_history", |txn| {
            let resolved = InodeIndex::resolve(txn, inode)?;
            let mut versions = store::version_history(txn, resolved.node_id)?;
            versions.retain(|version| version.revision_id <= resolved.target_revision);
            Ok(versions)
        })
    }

    pub fn check_consistency(&self, ctx: &RequestContext) -> Result<ConsistencyReport, StoreError> {
        self.run(ctx, "check_consistency", consistency::check)
    }

    /// In-memory footprint of the engine, when it is the built-in one.
    pub fn engine_stats(&self) -> Option<EngineStats> {
        self.mvcc.as_ref().map(MvccEngine::stats)
    }

    /// Return unused leased ids and flush the engine.
    pub fn close(self) -> Result<(), StoreError> {
        self.sequences.release()?;
        self.engine.flush()?;
        debug!("Closed metadata store");
        Ok(())
    }
}
