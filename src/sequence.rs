//! Sequence Allocator
//!
//! Monotonic `u64` counters persisted in the key space. Values are leased in
//! blocks: the high-water mark of the block is written in a short transaction
//! of its own, then values are handed out from memory until the block runs
//! out. The caller's transaction never touches the sequence key, so running out
//! of a block cannot make the caller's commit conflict.

use crate::error::StoreError;
use crate::keys;
use crate::kv::KvEngine;
use crate::types::{FIRST_ALLOCATED_INODE, FIRST_ALLOCATED_NODE_ID, FIRST_REVISION_ID};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, warn};

/// Attempts at reserving a block before giving up.
const MAX_LEASE_ATTEMPTS: u32 = 8;

#[derive(Debug)]
struct Lease {
    /// Next value to hand out.
    next: u64,
    /// Exclusive end of the reserved block; persisted as the high-water mark.
    leased: u64,
    released: bool,
}

/// One persisted counter.
pub struct Sequence {
    name: &'static str,
    key: Vec<u8>,
    floor: u64,
    bandwidth: u64,
    engine: Arc<dyn KvEngine>,
    lease: Mutex<Lease>,
}

impl Sequence {
    /// Attach to the counter stored under `key`.
    ///
    /// No block is reserved until the first call to [`Sequence::next`].
    /// Values below `floor` are never handed out.
    pub fn acquire(
        engine: Arc<dyn KvEngine>,
        name: &'static str,
        key: Vec<u8>,
        floor: u64,
        bandwidth: u64,
    ) -> Self {
        Self {
            name,
            key,
            floor,
            bandwidth: bandwidth.max(1),
            engine,
            lease: Mutex::new(Lease {
                next: floor,
                leased: floor,
                released: false,
            }),
        }
    }

    /// Hand out the next value.
    pub fn next(&self) -> Result<u64, StoreError> {
        let mut lease = self.lease.lock();
        if lease.released {
            return Err(StoreError::Allocation(format!(
                "{} sequence already released",
                self.name
            )));
        }
        if lease.next >= lease.leased {
            self.reserve(&mut lease)?;
        }
        let value = lease.next;
        lease.next += 1;
        Ok(value)
    }

    fn decode(&self, raw: &[u8]) -> Result<u64, StoreError> {
        if raw.len() != 8 {
            return Err(StoreError::Corrupt(format!(
                "{} sequence value has {} bytes, want 8",
                self.name,
                raw.len()
            )));
        }
        let mut buf = [0u8; 8];
        buf.copy_from_slice(raw);
        Ok(u64::from_be_bytes(buf))
    }

    fn reserve(&self, lease: &mut Lease) -> Result<(), StoreError> {
        for attempt in 1..=MAX_LEASE_ATTEMPTS {
            let mut txn = self.engine.begin().map_err(|e| self.allocation_error(e))?;
            let stored = match txn.get(&self.key).map_err(|e| self.allocation_error(e))? {
                Some(raw) => self.decode(&raw)?,
                None => self.floor,
            };
            let start = stored.max(self.floor).max(lease.next);
            let end = start.checked_add(self.bandwidth).ok_or_else(|| {
                StoreError::Allocation(format!("{} sequence exhausted", self.name))
            })?;
            txn.set(&self.key, end.to_be_bytes().to_vec())
                .map_err(|e| self.allocation_error(e))?;

            match txn.commit() {
                Ok(()) => {
                    debug!(sequence = self.name, start, end, "Reserved sequence block");
                    lease.next = start;
                    lease.leased = end;
                    return Ok(());
                }
                Err(StoreError::Conflict(reason)) => {
                    debug!(sequence = self.name, attempt, %reason, "Sequence lease conflicted");
                }
                Err(err) => return Err(self.allocation_error(err)),
            }
        }
        Err(StoreError::Allocation(format!(
            "{} sequence lease kept conflicting",
            self.name
        )))
    }

    fn allocation_error(&self, err: StoreError) -> StoreError {
        if err.is_corruption() {
            return err;
        }
        StoreError::Allocation(format!("{} sequence: {}", self.name, err))
    }

    /// Give back the unused part of the current block and stop handing out values.
    ///
    /// The high-water mark is only lowered if nobody else reserved past it.
    pub fn release(&self) -> Result<(), StoreError> {
        let mut lease = self.lease.lock();
        if lease.released {
            return Ok(());
        }
        lease.released = true;
        if lease.next >= lease.leased {
            return Ok(());
        }

        let mut txn = self.engine.begin()?;
        let stored = match txn.get(&self.key)? {
            Some(raw) => Some(self.decode(&raw)?),
            None => None,
        };
        if stored != Some(lease.leased) {
            return Ok(());
        }
        txn.set(&self.key, lease.next.to_be_bytes().to_vec())?;
        match txn.commit() {
            Ok(()) => {
                debug!(
                    sequence = self.name,
                    returned_from = lease.next,
                    "Released sequence"
                );
                Ok(())
            }
            // Someone leased concurrently; the unused values are simply skipped.
            Err(StoreError::Conflict(_)) => Ok(()),
            Err(err) => Err(err),
        }
    }
}

impl Drop for Sequence {
    fn drop(&mut self) {
        if let Err(err) = self.release() {
            warn!(sequence = self.name, error = %err, "Failed to release sequence");
        }
    }
}

/// The three counters a store owns.
pub struct Sequences {
    pub revision: Sequence,
    pub node: Sequence,
    pub inode: Sequence,
}

impl Sequences {
    pub fn acquire(engine: Arc<dyn KvEngine>, bandwidth: u64) -> Self {
        Self {
            revision: Sequence::acquire(
                engine.clone(),
                "revision",
                keys::revision_id_seq_key(),
                FIRST_REVISION_ID,
                bandwidth,
            ),
            node: Sequence::acquire(
                engine.clone(),
                "node",
                keys::node_id_seq_key(),
                FIRST_ALLOCATED_NODE_ID,
                bandwidth,
            ),
            inode: Sequence::acquire(
                engine,
                "inode",
                keys::inode_id_seq_key(),
                FIRST_ALLOCATED_INODE,
                bandwidth,
            ),
        }
    }

    /// Release all three; the first failure is reported after trying every one.
    pub fn release(&self) -> Result<(), StoreError> {
        let results = [
            self.revision.release(),
            self.node.release(),
            self.inode.release(),
        ];
        results.into_iter().collect::<Result<Vec<()>, _>>()?;
        Ok(())
    }
}
