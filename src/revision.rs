//! Revision Log
//!
//! Append-only log of committed tree states. A revision record is written
//! inside the caller's transaction, so it only exists if that transaction
//! commits; the latest revision is the last key of the revision table.

use crate::error::StoreError;
use crate::keys;
use crate::sequence::Sequence;
use crate::txn::StoreTxn;
use crate::types::RevisionId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::error;

/// One committed point-in-time state of the whole tree
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Revision {
    pub revision_id: RevisionId,
    pub created_at: DateTime<Utc>,
}

impl Revision {
    fn decode_entry(key: &[u8], value: &[u8]) -> Result<Self, StoreError> {
        let key_id = keys::decode_revision_key(key)?;
        let revision: Revision = bincode::deserialize(value)?;
        if revision.revision_id != key_id {
            error!(
                key_id,
                value_id = revision.revision_id,
                "Revision key and value disagree"
            );
            return Err(StoreError::Corrupt(format!(
                "revision key is for {} but value has {}",
                key_id, revision.revision_id
            )));
        }
        Ok(revision)
    }
}

/// Revision table access, allocating ids from the revision sequence.
pub struct RevisionLog<'a> {
    sequence: &'a Sequence,
}

impl<'a> RevisionLog<'a> {
    pub fn new(sequence: &'a Sequence) -> Self {
        Self { sequence }
    }

    /// Allocate the next revision and record it in `txn`.
    ///
    /// An attempt appends at most once; every write it makes is stamped with
    /// the returned id.
    pub fn append(&self, txn: &mut StoreTxn<'_>) -> Result<Revision, StoreError> {
        assert!(
            txn.working.is_none(),
            "a transaction attempt may only append one revision"
        );
        // Reading the latest first puts the whole table in our read set, so
        // two appenders can never both commit.
        let previous = Self::latest_opt(txn)?;
        let revision_id = self.sequence.next()?;
        if let Some(previous) = &previous {
            if revision_id <= previous.revision_id {
                error!(
                    revision_id,
                    latest = previous.revision_id,
                    "Revision sequence went backwards"
                );
                return Err(StoreError::Corrupt(format!(
                    "allocated revision {} is not after latest revision {}",
                    revision_id, previous.revision_id
                )));
            }
        }

        let revision = Revision {
            revision_id,
            created_at: Utc::now(),
        };
        txn.set(
            &keys::revision_key(revision_id),
            bincode::serialize(&revision)?,
        )?;
        txn.working = Some(revision_id);
        txn.latest = Some(revision.clone());
        Ok(revision)
    }

    /// Latest revision visible to `txn`.
    ///
    /// An empty table means bootstrap never ran, which is reported as corruption.
    pub fn latest(txn: &mut StoreTxn<'_>) -> Result<Revision, StoreError> {
        Self::latest_opt(txn)?.ok_or_else(|| {
            error!("Revision table is empty");
            StoreError::Corrupt("no revisions".to_string())
        })
    }

    pub(crate) fn latest_opt(txn: &mut StoreTxn<'_>) -> Result<Option<Revision>, StoreError> {
        if let Some(latest) = &txn.latest {
            return Ok(Some(latest.clone()));
        }
        let first = txn
            .scan_prefix(&keys::revision_table_prefix(), true)?
            .next()
            .transpose()?;
        let latest = match first {
            Some((key, value)) => Some(Revision::decode_entry(&key, &value)?),
            None => None,
        };
        txn.latest = latest.clone();
        Ok(latest)
    }

    /// A specific revision, if it was committed.
    pub fn get(txn: &mut StoreTxn<'_>, revision_id: RevisionId) -> Result<Option<Revision>, StoreError> {
        let key = keys::revision_key(revision_id);
        match txn.get(&key)? {
            Some(value) => Ok(Some(Revision::decode_entry(&key, &value)?)),
            None => Ok(None),
        }
    }

    /// Every revision, oldest first.
    pub fn list(txn: &mut StoreTxn<'_>) -> Result<Vec<Revision>, StoreError> {
        let mut revisions = Vec::new();
        for item in txn.scan_prefix(&keys::revision_table_prefix(), false)? {
            let (key, value) = item?;
            revisions.push(Revision::decode_entry(&key, &value)?);
        }
        Ok(revisions)
    }
}
