//! Transactional key-value engine interface
//!
//! The metadata store only needs snapshot-isolated transactions over opaque
//! byte keys with prefix iteration and commit-time conflict reporting. Anything
//! that provides those can sit behind [`KvEngine`].

pub mod mvcc;
pub mod persistence;

use crate::error::StoreError;

pub use mvcc::{EngineStats, MvccEngine};
pub use persistence::SledLog;

/// One key/value pair as returned by a scan.
pub type KvPair = (Vec<u8>, Vec<u8>);

/// Iterator returned by [`KvTxn::scan_prefix`].
pub type KvIter<'a> = Box<dyn Iterator<Item = Result<KvPair, StoreError>> + 'a>;

/// A transactional engine.
pub trait KvEngine: Send + Sync {
    /// Open a transaction reading from the latest committed snapshot.
    fn begin(&self) -> Result<Box<dyn KvTxn + '_>, StoreError>;

    /// Force committed data to stable storage, where there is any.
    fn flush(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

/// One transaction attempt.
///
/// Writes are buffered until [`KvTxn::commit`] and are visible to this
/// transaction's own reads. Dropping a transaction without committing
/// discards its writes.
pub trait KvTxn {
    fn get(&mut self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError>;

    fn set(&mut self, key: &[u8], value: Vec<u8>) -> Result<(), StoreError>;

    /// Iterate every key starting with `prefix`, ascending or descending.
    fn scan_prefix(&mut self, prefix: &[u8], reverse: bool) -> Result<KvIter<'_>, StoreError>;

    /// Publish the buffered writes atomically.
    ///
    /// Returns [`StoreError::Conflict`] when a concurrently committed
    /// transaction touched something this one read or wrote.
    fn commit(self: Box<Self>) -> Result<(), StoreError>;
}

/// Smallest key greater than every key starting with `prefix`, if one exists.
pub fn prefix_upper_bound(prefix: &[u8]) -> Option<Vec<u8>> {
    let mut upper = prefix.to_vec();
    while let Some(last) = upper.pop() {
        if last < u8::MAX {
            upper.push(last + 1);
            return Some(upper);
        }
    }
    None
}
