//! Per-attempt transaction handle
//!
//! Wraps one engine transaction together with the facts this attempt has
//! learned so far: the latest revision it observed, the revision it is
//! writing at, and the newest version and kind seen for every node. Nothing
//! here survives a retry; the retry loop builds a fresh handle per attempt.

use crate::error::StoreError;
use crate::kv::{KvEngine, KvIter, KvTxn};
use crate::revision::Revision;
use crate::tree::node::NodeKind;
use crate::types::{NodeId, RevisionId};
use std::collections::HashMap;

/// What one attempt knows about a node's version chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObservedNode {
    pub highest_revision: RevisionId,
    pub kind: NodeKind,
}

pub struct StoreTxn<'e> {
    inner: Box<dyn KvTxn + 'e>,
    observed: HashMap<NodeId, ObservedNode>,
    pub(crate) latest: Option<Revision>,
    pub(crate) working: Option<RevisionId>,
}

impl<'e> StoreTxn<'e> {
    pub fn begin(engine: &'e dyn KvEngine) -> Result<Self, StoreError> {
        Ok(Self {
            inner: engine.begin()?,
            observed: HashMap::new(),
            latest: None,
            working: None,
        })
    }

    pub fn get(&mut self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        self.inner.get(key)
    }

    pub fn set(&mut self, key: &[u8], value: Vec<u8>) -> Result<(), StoreError> {
        self.inner.set(key, value)
    }

    pub fn scan_prefix(&mut self, prefix: &[u8], reverse: bool) -> Result<KvIter<'_>, StoreError> {
        self.inner.scan_prefix(prefix, reverse)
    }

    pub fn commit(self) -> Result<(), StoreError> {
        self.inner.commit()
    }

    pub fn observed(&self, node_id: NodeId) -> Option<ObservedNode> {
        self.observed.get(&node_id).copied()
    }

    /// Record a version of `node_id` seen or written by this attempt.
    pub(crate) fn observe(&mut self, node_id: NodeId, revision_id: RevisionId, kind: NodeKind) {
        self.observed
            .entry(node_id)
            .and_modify(|seen| seen.highest_revision = seen.highest_revision.max(revision_id))
            .or_insert(ObservedNode {
                highest_revision: revision_id,
                kind,
            });
    }
}
