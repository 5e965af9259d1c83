//! Multi-version key space with optimistic transactions
//!
//! Each key holds a chain of versions stamped with the commit sequence that
//! wrote them. A transaction reads the newest version at or below the sequence
//! current when it began, buffers its writes, and is validated at commit
//! against every transaction that committed in between (first committer wins).
//!
//! # Concurrency
//!
//! All committed state sits behind one `parking_lot::RwLock`:
//! - reads and scan batches take the shared lock briefly;
//! - `begin`, commit and abort take the exclusive lock.
//!
//! Scans are lazy: they fetch small batches and drop the lock between them, so
//! a long scan never blocks writers.

use crate::error::StoreError;
use crate::kv::persistence::SledLog;
use crate::kv::{prefix_upper_bound, KvEngine, KvIter, KvPair, KvTxn};
use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::iter::Peekable;
use std::ops::Bound;
use std::sync::Arc;
use tracing::{debug, trace};

/// Keys examined per lock acquisition while scanning.
const SCAN_BATCH: usize = 64;

#[derive(Debug, Clone)]
struct KeyVersion {
    commit_seq: u64,
    value: Vec<u8>,
}

#[derive(Debug)]
struct CommitRecord {
    commit_seq: u64,
    keys: Vec<Vec<u8>>,
}

#[derive(Debug, Default)]
struct State {
    /// Sequence of the most recent commit.
    clock: u64,
    versions: BTreeMap<Vec<u8>, Vec<KeyVersion>>,
    /// Keys whose chain currently holds more than one version.
    multi_version: BTreeSet<Vec<u8>>,
    /// Open snapshots: sequence -> number of transactions reading at it.
    active: BTreeMap<u64, usize>,
    /// Write sets of recent commits, kept while some open snapshot predates them.
    commit_log: VecDeque<CommitRecord>,
}

impl State {
    fn visible(&self, key: &[u8], snapshot: u64) -> Option<&[u8]> {
        self.versions
            .get(key)
            .and_then(|chain| visible_in(chain, snapshot))
    }

    fn register(&mut self) -> u64 {
        let snapshot = self.clock;
        *self.active.entry(snapshot).or_insert(0) += 1;
        snapshot
    }

    fn release(&mut self, snapshot: u64) {
        if let Some(count) = self.active.get_mut(&snapshot) {
            *count -= 1;
            if *count == 0 {
                self.active.remove(&snapshot);
            }
        }
        self.prune();
    }

    /// Oldest sequence any open transaction may still read at.
    fn watermark(&self) -> u64 {
        self.active.keys().next().copied().unwrap_or(self.clock)
    }

    fn prune(&mut self) {
        let watermark = self.watermark();

        while self
            .commit_log
            .front()
            .is_some_and(|record| record.commit_seq <= watermark)
        {
            self.commit_log.pop_front();
        }

        let mut settled = Vec::new();
        for key in &self.multi_version {
            if let Some(chain) = self.versions.get_mut(key) {
                // Keep the newest version at or below the watermark and everything newer.
                let keep_from = chain
                    .iter()
                    .rposition(|v| v.commit_seq <= watermark)
                    .unwrap_or(0);
                if keep_from > 0 {
                    chain.drain(..keep_from);
                }
                if chain.len() <= 1 {
                    settled.push(key.clone());
                }
            }
        }
        for key in settled {
            self.multi_version.remove(&key);
        }
    }
}

fn visible_in(chain: &[KeyVersion], snapshot: u64) -> Option<&[u8]> {
    chain
        .iter()
        .rev()
        .find(|v| v.commit_seq <= snapshot)
        .map(|v| v.value.as_slice())
}

struct Shared {
    state: RwLock<State>,
    durable: Option<SledLog>,
}

/// Counters describing the engine's in-memory footprint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineStats {
    pub last_commit: u64,
    pub keys: usize,
    pub versions: usize,
    pub open_snapshots: usize,
}

/// Snapshot-isolated in-memory engine, optionally backed by sled.
#[derive(Clone)]
pub struct MvccEngine {
    shared: Arc<Shared>,
}

impl MvccEngine {
    /// Volatile engine; everything is lost when the last handle drops.
    pub fn in_memory() -> Self {
        Self {
            shared: Arc::new(Shared {
                state: RwLock::new(State::default()),
                durable: None,
            }),
        }
    }

    /// Engine whose commits are persisted to `log`.
    ///
    /// Previously persisted pairs are loaded as the initial committed state.
    pub fn durable(log: SledLog) -> Result<Self, StoreError> {
        let mut state = State::default();
        for (key, value) in log.load()? {
            state.versions.insert(
                key,
                vec![KeyVersion {
                    commit_seq: 0,
                    value,
                }],
            );
        }
        Ok(Self {
            shared: Arc::new(Shared {
                state: RwLock::new(state),
                durable: Some(log),
            }),
        })
    }

    pub fn stats(&self) -> EngineStats {
        let state = self.shared.state.read();
        EngineStats {
            last_commit: state.clock,
            keys: state.versions.len(),
            versions: state.versions.values().map(Vec::len).sum(),
            open_snapshots: state.active.values().sum(),
        }
    }
}

impl KvEngine for MvccEngine {
    fn begin(&self) -> Result<Box<dyn KvTxn + '_>, StoreError> {
        let snapshot = self.shared.state.write().register();
        trace!(snapshot, "Began transaction");
        Ok(Box::new(MvccTxn {
            shared: self.shared.as_ref(),
            snapshot,
            reads: BTreeSet::new(),
            scanned: Vec::new(),
            writes: BTreeMap::new(),
            finished: false,
        }))
    }

    fn flush(&self) -> Result<(), StoreError> {
        match &self.shared.durable {
            Some(log) => log.flush(),
            None => Ok(()),
        }
    }
}

struct MvccTxn<'a> {
    shared: &'a Shared,
    snapshot: u64,
    reads: BTreeSet<Vec<u8>>,
    scanned: Vec<Vec<u8>>,
    writes: BTreeMap<Vec<u8>, Vec<u8>>,
    finished: bool,
}

impl MvccTxn<'_> {
    /// First committed key, written after our snapshot, that overlaps our
    /// read set, scanned prefixes or write set.
    fn find_conflict(&self, state: &State) -> Option<(u64, Vec<u8>)> {
        state
            .commit_log
            .iter()
            .filter(|record| record.commit_seq > self.snapshot)
            .find_map(|record| {
                record
                    .keys
                    .iter()
                    .find(|key| {
                        self.reads.contains(*key)
                            || self.writes.contains_key(*key)
                            || self.scanned.iter().any(|prefix| key.starts_with(prefix))
                    })
                    .map(|key| (record.commit_seq, key.clone()))
            })
    }
}

impl KvTxn for MvccTxn<'_> {
    fn get(&mut self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        if let Some(value) = self.writes.get(key) {
            return Ok(Some(value.clone()));
        }
        self.reads.insert(key.to_vec());
        let state = self.shared.state.read();
        Ok(state.visible(key, self.snapshot).map(<[u8]>::to_vec))
    }

    fn set(&mut self, key: &[u8], value: Vec<u8>) -> Result<(), StoreError> {
        self.writes.insert(key.to_vec(), value);
        Ok(())
    }

    fn scan_prefix(&mut self, prefix: &[u8], reverse: bool) -> Result<KvIter<'_>, StoreError> {
        self.scanned.push(prefix.to_vec());
        let upper = prefix_upper_bound(prefix);

        let lower_bound = Bound::Included(prefix.to_vec());
        let upper_bound = match &upper {
            Some(u) => Bound::Excluded(u.clone()),
            None => Bound::Unbounded,
        };
        let mut overlay: Vec<KvPair> = self
            .writes
            .range::<Vec<u8>, _>((lower_bound, upper_bound))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        if reverse {
            overlay.reverse();
        }

        let base = SnapshotScan {
            shared: self.shared,
            snapshot: self.snapshot,
            prefix: prefix.to_vec(),
            upper,
            reverse,
            cursor: None,
            buffer: VecDeque::new(),
            exhausted: false,
        };

        Ok(Box::new(
            MergedScan {
                base: base.peekable(),
                overlay: overlay.into_iter().peekable(),
                reverse,
            }
            .map(Ok::<KvPair, StoreError>),
        ))
    }

    fn commit(mut self: Box<Self>) -> Result<(), StoreError> {
        let shared = self.shared;
        if self.writes.is_empty() {
            self.finished = true;
            shared.state.write().release(self.snapshot);
            return Ok(());
        }

        let mut state = shared.state.write();
        self.finished = true;

        if let Some((commit_seq, key)) = self.find_conflict(&state) {
            state.release(self.snapshot);
            debug!(snapshot = self.snapshot, commit_seq, "Commit conflict");
            return Err(StoreError::Conflict(format!(
                "key {:02x?} was written by commit {} after snapshot {}",
                key, commit_seq, self.snapshot
            )));
        }

        if let Some(log) = &shared.durable {
            if let Err(err) = log.apply(&self.writes) {
                state.release(self.snapshot);
                return Err(err);
            }
        }

        let commit_seq = state.clock + 1;
        state.clock = commit_seq;

        let writes = std::mem::take(&mut self.writes);
        let mut keys = Vec::with_capacity(writes.len());
        for (key, value) in writes {
            let chain_len = {
                let chain = state.versions.entry(key.clone()).or_default();
                chain.push(KeyVersion { commit_seq, value });
                chain.len()
            };
            if chain_len > 1 {
                state.multi_version.insert(key.clone());
            }
            keys.push(key);
        }
        trace!(commit_seq, keys = keys.len(), "Committed transaction");
        state.commit_log.push_back(CommitRecord { commit_seq, keys });
        state.release(self.snapshot);
        Ok(())
    }
}

impl Drop for MvccTxn<'_> {
    fn drop(&mut self) {
        if !self.finished {
            self.shared.state.write().release(self.snapshot);
        }
    }
}

/// Lazy scan over committed versions visible at one snapshot.
struct SnapshotScan<'a> {
    shared: &'a Shared,
    snapshot: u64,
    prefix: Vec<u8>,
    upper: Option<Vec<u8>>,
    reverse: bool,
    /// Last key examined; the next batch resumes past it.
    cursor: Option<Vec<u8>>,
    buffer: VecDeque<KvPair>,
    exhausted: bool,
}

impl SnapshotScan<'_> {
    fn refill(&mut self) {
        let shared = self.shared;
        let state = shared.state.read();

        let lower = match (&self.cursor, self.reverse) {
            (Some(cursor), false) => Bound::Excluded(cursor.clone()),
            _ => Bound::Included(self.prefix.clone()),
        };
        let upper = match (&self.cursor, self.reverse) {
            (Some(cursor), true) => Bound::Excluded(cursor.clone()),
            _ => match &self.upper {
                Some(u) => Bound::Excluded(u.clone()),
                None => Bound::Unbounded,
            },
        };

        let range = state.versions.range::<Vec<u8>, _>((lower, upper));
        let entries: Box<dyn Iterator<Item = (&Vec<u8>, &Vec<KeyVersion>)>> = if self.reverse {
            Box::new(range.rev())
        } else {
            Box::new(range)
        };

        let mut examined = 0;
        for (key, chain) in entries {
            examined += 1;
            self.cursor = Some(key.clone());
            if let Some(value) = visible_in(chain, self.snapshot) {
                self.buffer.push_back((key.clone(), value.to_vec()));
            }
            if examined == SCAN_BATCH {
                return;
            }
        }
        self.exhausted = true;
    }
}

impl Iterator for SnapshotScan<'_> {
    type Item = KvPair;

    fn next(&mut self) -> Option<KvPair> {
        while self.buffer.is_empty() && !self.exhausted {
            self.refill();
        }
        self.buffer.pop_front()
    }
}

/// Committed entries merged with the transaction's own pending writes.
struct MergedScan<'a> {
    base: Peekable<SnapshotScan<'a>>,
    overlay: Peekable<std::vec::IntoIter<KvPair>>,
    reverse: bool,
}

impl Iterator for MergedScan<'_> {
    type Item = KvPair;

    fn next(&mut self) -> Option<KvPair> {
        let order = match (self.base.peek(), self.overlay.peek()) {
            (None, None) => return None,
            (Some(_), None) => return self.base.next(),
            (None, Some(_)) => return self.overlay.next(),
            (Some((base_key, _)), Some((own_key, _))) => base_key.cmp(own_key),
        };
        let order = if self.reverse { order.reverse() } else { order };
        match order {
            std::cmp::Ordering::Less => self.base.next(),
            std::cmp::Ordering::Greater => self.overlay.next(),
            std::cmp::Ordering::Equal => {
                // Our own write shadows the committed value.
                self.base.next();
                self.overlay.next()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn put(engine: &MvccEngine, key: &[u8], value: &[u8]) {
        let mut txn = engine.begin().unwrap();
        txn.set(key, value.to_vec()).unwrap();
        txn.commit().unwrap();
    }

    fn keys_of(iter: KvIter<'_>) -> Vec<Vec<u8>> {
        iter.map(|item| item.unwrap().0).collect()
    }

    #[test]
    fn test_snapshot_does_not_see_later_commits() {
        let engine = MvccEngine::in_memory();
        put(&engine, b"k", b"v1");

        let mut reader = engine.begin().unwrap();
        put(&engine, b"k", b"v2");

        assert_eq!(reader.get(b"k").unwrap(), Some(b"v1".to_vec()));
        drop(reader);

        let mut fresh = engine.begin().unwrap();
        assert_eq!(fresh.get(b"k").unwrap(), Some(b"v2".to_vec()));
    }

    #[test]
    fn test_read_your_own_writes() {
        let engine = MvccEngine::in_memory();
        put(&engine, b"p/a", b"1");
        put(&engine, b"p/c", b"3");

        let mut txn = engine.begin().unwrap();
        txn.set(b"p/b", b"2".to_vec()).unwrap();
        txn.set(b"p/c", b"33".to_vec()).unwrap();
        assert_eq!(txn.get(b"p/b").unwrap(), Some(b"2".to_vec()));

        let forward: Vec<KvPair> = txn
            .scan_prefix(b"p/", false)
            .unwrap()
            .map(Result::unwrap)
            .collect();
        assert_eq!(
            forward,
            vec![
                (b"p/a".to_vec(), b"1".to_vec()),
                (b"p/b".to_vec(), b"2".to_vec()),
                (b"p/c".to_vec(), b"33".to_vec()),
            ]
        );
        let backward = keys_of(txn.scan_prefix(b"p/", true).unwrap());
        assert_eq!(
            backward,
            vec![b"p/c".to_vec(), b"p/b".to_vec(), b"p/a".to_vec()]
        );
    }

    #[test]
    fn test_scan_spans_multiple_batches() {
        let engine = MvccEngine::in_memory();
        let mut txn = engine.begin().unwrap();
        for i in 0..(SCAN_BATCH as u32 * 3 + 5) {
            let mut key = b"x".to_vec();
            key.extend_from_slice(&i.to_be_bytes());
            txn.set(&key, vec![1]).unwrap();
        }
        txn.set(b"y", vec![2]).unwrap();
        txn.commit().unwrap();

        let mut txn = engine.begin().unwrap();
        assert_eq!(
            txn.scan_prefix(b"x", false).unwrap().count(),
            SCAN_BATCH * 3 + 5
        );
        let backward = keys_of(txn.scan_prefix(b"x", true).unwrap());
        assert_eq!(backward.len(), SCAN_BATCH * 3 + 5);
        assert!(backward.windows(2).all(|w| w[0] > w[1]));
    }

    #[test]
    fn test_write_write_conflict_first_committer_wins() {
        let engine = MvccEngine::in_memory();
        let mut a = engine.begin().unwrap();
        let mut b = engine.begin().unwrap();
        a.set(b"k", b"a".to_vec()).unwrap();
        b.set(b"k", b"b".to_vec()).unwrap();

        a.commit().unwrap();
        assert!(matches!(b.commit(), Err(StoreError::Conflict(_))));

        let mut check = engine.begin().unwrap();
        assert_eq!(check.get(b"k").unwrap(), Some(b"a".to_vec()));
    }

    #[test]
    fn test_read_write_conflict() {
        let engine = MvccEngine::in_memory();
        put(&engine, b"counter", b"0");

        let mut a = engine.begin().unwrap();
        let mut b = engine.begin().unwrap();
        a.get(b"counter").unwrap();
        a.set(b"other", b"x".to_vec()).unwrap();
        b.set(b"counter", b"1".to_vec()).unwrap();

        b.commit().unwrap();
        assert!(matches!(a.commit(), Err(StoreError::Conflict(_))));
    }

    #[test]
    fn test_phantom_insert_under_scanned_prefix_conflicts() {
        let engine = MvccEngine::in_memory();
        let mut a = engine.begin().unwrap();
        let mut b = engine.begin().unwrap();

        assert_eq!(a.scan_prefix(b"dir/", false).unwrap().count(), 0);
        a.set(b"elsewhere", b"1".to_vec()).unwrap();
        b.set(b"dir/new", b"1".to_vec()).unwrap();

        b.commit().unwrap();
        assert!(matches!(a.commit(), Err(StoreError::Conflict(_))));
    }

    #[test]
    fn test_disjoint_transactions_both_commit() {
        let engine = MvccEngine::in_memory();
        let mut a = engine.begin().unwrap();
        let mut b = engine.begin().unwrap();
        a.get(b"a").unwrap();
        a.set(b"a", b"1".to_vec()).unwrap();
        b.get(b"b").unwrap();
        b.set(b"b", b"1".to_vec()).unwrap();
        a.commit().unwrap();
        b.commit().unwrap();
    }

    #[test]
    fn test_read_only_transaction_always_commits() {
        let engine = MvccEngine::in_memory();
        let mut reader = engine.begin().unwrap();
        reader.get(b"k").unwrap();
        put(&engine, b"k", b"v");
        reader.commit().unwrap();
    }

    #[test]
    fn test_versions_pruned_once_snapshots_close() {
        let engine = MvccEngine::in_memory();
        put(&engine, b"k", b"1");

        let reader = engine.begin().unwrap();
        put(&engine, b"k", b"2");
        put(&engine, b"k", b"3");
        assert_eq!(engine.stats().versions, 3);
        assert_eq!(engine.stats().open_snapshots, 1);

        drop(reader);
        let stats = engine.stats();
        assert_eq!(stats.open_snapshots, 0);
        assert_eq!(stats.versions, 1);
        assert_eq!(stats.last_commit, 3);
    }

    #[test]
    fn test_durable_engine_reloads_commits() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let path = temp_dir.path().join("kv");
        {
            let engine = MvccEngine::durable(SledLog::open(&path, true).unwrap()).unwrap();
            put(&engine, b"k", b"persisted");
            let mut aborted = engine.begin().unwrap();
            aborted.set(b"lost", b"x".to_vec()).unwrap();
            drop(aborted);
        }

        let engine = MvccEngine::durable(SledLog::open(&path, true).unwrap()).unwrap();
        let mut txn = engine.begin().unwrap();
        assert_eq!(txn.get(b"k").unwrap(), Some(b"persisted".to_vec()));
        assert_eq!(txn.get(b"lost").unwrap(), None);
    }
}
