//! Sled-backed durability for the MVCC engine
//!
//! The engine keeps its version chains in memory; sled holds the latest value
//! of every key. Each commit lands in sled as one atomic batch before it is
//! published to readers, so a restart reloads exactly the committed state.

use crate::error::StoreError;
use crate::kv::KvPair;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, info};

/// Durable image of the committed key space.
pub struct SledLog {
    db: sled::Db,
    sync_on_commit: bool,
}

impl SledLog {
    /// Open (or create) the sled database at `path`.
    pub fn open(path: &Path, sync_on_commit: bool) -> Result<Self, StoreError> {
        std::fs::create_dir_all(path)?;
        let db = sled::open(path)?;
        info!(path = %path.display(), recovered = db.was_recovered(), "Opened sled store");
        Ok(Self { db, sync_on_commit })
    }

    /// Every persisted pair, in key order.
    pub fn load(&self) -> Result<Vec<KvPair>, StoreError> {
        let mut pairs = Vec::new();
        for item in self.db.iter() {
            let (key, value) = item?;
            pairs.push((key.to_vec(), value.to_vec()));
        }
        debug!(pairs = pairs.len(), "Loaded persisted key space");
        Ok(pairs)
    }

    /// Apply one commit's writes atomically.
    pub fn apply(&self, writes: &BTreeMap<Vec<u8>, Vec<u8>>) -> Result<(), StoreError> {
        let mut batch = sled::Batch::default();
        for (key, value) in writes {
            batch.insert(key.as_slice(), value.as_slice());
        }
        self.db.apply_batch(batch)?;
        if self.sync_on_commit {
            self.db.flush()?;
        }
        Ok(())
    }

    pub fn flush(&self) -> Result<(), StoreError> {
        self.db.flush()?;
        Ok(())
    }
}
