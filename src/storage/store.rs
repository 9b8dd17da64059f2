//! Versioned Store
//!
//! Ordered, multi-version key-value store backed by a segmented WAL. Both the
//! main engine and the log engine are `Store`s.
//!
//! ## Layout
//! ```text
//! user key ──► version (desc) ──► [record@seq1, record@seq2, ...]
//! ```
//! Every atomic update is stamped with one commit sequence. A reader pinned at
//! sequence `s` sees, for each version, the newest record with `seq <= s`.
//! A tombstone hides every older version of its key.
//!
//! ## Concurrency
//! - `wal`: Mutex, serializes commits (append → publish → bump sequence)
//! - `data`: RwLock, readers never wait on the WAL
//! - `readers`: pinned sequences, consulted by compaction

use std::cmp::Reverse;
use std::collections::BTreeMap;
use std::fs;
use std::ops::Bound;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::config::WalSyncStrategy;
use crate::error::{Result, StoreError};
use crate::keys::VersionedKey;
use crate::wal::{Operation, WalRecovery, WalWriter};

use super::compaction::{checkpoint_batches, CompactionFilterFactory, CompactionStats, Decision};
use super::snapshot::ReadTxn;

pub(crate) type VersionChain = BTreeMap<Reverse<u64>, Vec<Record>>;
pub(crate) type DataMap = BTreeMap<Vec<u8>, VersionChain>;

/// One write of one version, stamped with its commit sequence
#[derive(Debug, Clone)]
pub(crate) struct Record {
    pub seq: u64,
    /// `None` is a tombstone
    pub value: Option<Vec<u8>>,
    pub user_meta: Vec<u8>,
}

/// A live entry returned by reads
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Item {
    pub key: Vec<u8>,
    pub version: u64,
    pub value: Vec<u8>,
    pub user_meta: Vec<u8>,
}

impl Item {
    pub(crate) fn from_record(key: &[u8], version: u64, record: &Record) -> Option<Self> {
        record.value.as_ref().map(|value| Item {
            key: key.to_vec(),
            version,
            value: value.clone(),
            user_meta: record.user_meta.clone(),
        })
    }
}

/// Options for opening a store
#[derive(Clone)]
pub struct StoreOptions {
    pub sync_strategy: WalSyncStrategy,
    pub segment_size: u64,
    /// Filter consulted by `compact`
    pub compaction_filter: Option<CompactionFilterFactory>,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            sync_strategy: WalSyncStrategy::EveryNEntries { count: 100 },
            segment_size: 64 * 1024 * 1024,
            compaction_filter: None,
        }
    }
}

/// Mutations staged for one atomic update
#[derive(Debug, Default)]
pub struct WriteTxn {
    ops: Vec<Operation>,
}

impl WriteTxn {
    /// Stage a value (with optional user meta) at `key.version`
    pub fn set(&mut self, key: &VersionedKey, value: &[u8], user_meta: &[u8]) {
        self.ops.push(Operation::Put {
            key: key.user_key.clone(),
            version: key.version,
            value: value.to_vec(),
            user_meta: user_meta.to_vec(),
        });
    }

    /// Stage a tombstone at `key.version`
    pub fn delete(&mut self, key: &VersionedKey, user_meta: &[u8]) {
        self.ops.push(Operation::Delete {
            key: key.user_key.clone(),
            version: key.version,
            user_meta: user_meta.to_vec(),
        });
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

/// Versioned key-value store with snapshot reads
pub struct Store {
    dir: PathBuf,
    data: RwLock<DataMap>,
    wal: Mutex<WalWriter>,
    /// Sequence of the last published update
    seq: AtomicU64,
    /// Highest version ever written
    max_version: AtomicU64,
    /// Pinned read sequence → number of readers
    readers: Mutex<BTreeMap<u64, usize>>,
    compaction_filter: Option<CompactionFilterFactory>,
}

impl Store {
    /// Open or create a store in `dir`
    ///
    /// On startup:
    /// 1. Recover WAL records (torn tail truncated)
    /// 2. Replay each record as one update, in LSN order
    /// 3. Reopen the WAL for appends
    pub fn open(dir: &Path, options: StoreOptions) -> Result<Self> {
        fs::create_dir_all(dir)?;

        let (records, recovery) = WalRecovery::recover(dir)?;
        let mut data = DataMap::new();
        let mut seq = 0;
        let mut max_version = 0;
        for record in &records {
            seq += 1;
            max_version = max_version.max(apply_ops(&mut data, &record.operations, seq));
        }
        if recovery.records_recovered > 0 || recovery.records_corrupted > 0 {
            tracing::info!(
                dir = %dir.display(),
                recovered = recovery.records_recovered,
                corrupted = recovery.records_corrupted,
                last_lsn = recovery.last_lsn,
                truncated = recovery.was_truncated,
                "store WAL recovery"
            );
        }

        let wal = WalWriter::open(dir, options.sync_strategy, options.segment_size, recovery.last_lsn)?;

        Ok(Self {
            dir: dir.to_path_buf(),
            data: RwLock::new(data),
            wal: Mutex::new(wal),
            seq: AtomicU64::new(seq),
            max_version: AtomicU64::new(max_version),
            readers: Mutex::new(BTreeMap::new()),
            compaction_filter: options.compaction_filter,
        })
    }

    /// Run `f` against a fresh `WriteTxn` and commit everything it staged atomically
    ///
    /// Either every staged entry becomes visible under one new sequence, or
    /// none does. An error from `f` aborts without touching the store.
    pub fn update<F>(&self, f: F) -> Result<()>
    where
        F: FnOnce(&mut WriteTxn) -> Result<()>,
    {
        let mut txn = WriteTxn::default();
        f(&mut txn)?;
        if txn.is_empty() {
            return Ok(());
        }

        let mut wal = self.wal.lock();
        wal.append(&txn.ops)
            .map_err(|e| StoreError::Engine(format!("{}: WAL append failed: {}", self.dir.display(), e)))?;

        let seq = self.seq.load(Ordering::Acquire) + 1;
        let max_version = {
            let mut data = self.data.write();
            apply_ops(&mut data, &txn.ops, seq)
        };
        self.max_version.fetch_max(max_version, Ordering::AcqRel);
        self.seq.store(seq, Ordering::Release);
        Ok(())
    }

    /// Latest live entry of `key`
    pub fn get(&self, key: &[u8]) -> Option<Item> {
        let seq = self.seq.load(Ordering::Acquire);
        let data = self.data.read();
        let chain = data.get(key)?;
        let (version, record) = top_at(chain, seq)?;
        Item::from_record(key, version, record)
    }

    /// Latest live entry of every key in `[start, end)`; empty `end` is unbounded
    pub fn scan(&self, start: &[u8], end: &[u8]) -> Vec<Item> {
        let seq = self.seq.load(Ordering::Acquire);
        self.scan_raw(start, end, seq)
            .into_iter()
            .filter_map(|(key, version, record)| Item::from_record(&key, version, &record))
            .collect()
    }

    /// Topmost entry (tombstones included) of every key in range, as of `seq`
    pub(crate) fn scan_raw(&self, start: &[u8], end: &[u8], seq: u64) -> Vec<(Vec<u8>, u64, Record)> {
        let data = self.data.read();
        let mut out = Vec::new();
        let Some(bounds) = range_bounds(start, end) else {
            return out;
        };
        for (key, chain) in data.range::<[u8], _>(bounds) {
            if let Some((version, record)) = top_at(chain, seq) {
                out.push((key.clone(), version, record.clone()));
            }
        }
        out
    }

    /// Topmost entry of `key` (tombstones included), as of `seq`
    pub(crate) fn top_raw(&self, key: &[u8], seq: u64) -> Option<(u64, Record)> {
        let data = self.data.read();
        let chain = data.get(key)?;
        top_at(chain, seq).map(|(version, record)| (version, record.clone()))
    }

    /// Open a snapshot-isolated read transaction pinned at the current sequence
    pub fn begin_read(self: &Arc<Self>) -> ReadTxn {
        let mut readers = self.readers.lock();
        let seq = self.seq.load(Ordering::Acquire);
        *readers.entry(seq).or_insert(0) += 1;
        ReadTxn::new(Arc::clone(self), seq)
    }

    pub(crate) fn unpin(&self, seq: u64) {
        let mut readers = self.readers.lock();
        if let Some(count) = readers.get_mut(&seq) {
            *count -= 1;
            if *count == 0 {
                readers.remove(&seq);
            }
        }
    }

    /// Number of open read transactions
    pub fn active_readers(&self) -> usize {
        self.readers.lock().values().sum()
    }

    /// Compact in memory and rewrite the WAL as a checkpoint
    ///
    /// 1. Horizon = oldest pinned sequence (or the current one)
    /// 2. Per version, drop records no reader at or above the horizon can see
    /// 3. Drop keys whose visible top is a tombstone with nothing newer
    /// 4. Consult the compaction filter on settled live entries
    /// 5. Write the newest record of every version as a checkpoint, grouped by
    ///    the filter's guards
    pub fn compact(&self) -> Result<CompactionStats> {
        let mut wal = self.wal.lock();
        let current = self.seq.load(Ordering::Acquire);
        let horizon = {
            let readers = self.readers.lock();
            readers.keys().next().copied().unwrap_or(current).min(current)
        };
        let filter = self.compaction_filter.map(|factory| factory(0, &[], &[]));

        let mut stats = CompactionStats::default();
        let batches = {
            let mut data = self.data.write();

            data.retain(|key, chain| {
                for records in chain.values_mut() {
                    let settled = records.iter().rposition(|r| r.seq <= horizon);
                    if let Some(pos) = settled {
                        stats.records_pruned += pos;
                        records.drain(..pos);
                    }
                }
                chain.retain(|_, records| !records.is_empty());

                let newest_seq = chain.values().flat_map(|rs| rs.iter().map(|r| r.seq)).max();
                let shadowed = match top_at(chain, horizon) {
                    Some((_, record)) => record.value.is_none() && newest_seq.map_or(true, |s| s <= horizon),
                    None => chain.is_empty(),
                };
                if shadowed {
                    stats.keys_dropped += 1;
                    return false;
                }

                if let Some(filter) = &filter {
                    // Only a settled top (single record, at or below the horizon) is filtered.
                    let decision = chain.iter().next().and_then(|(&Reverse(version), records)| {
                        match records.as_slice() {
                            [record] if record.seq <= horizon => record
                                .value
                                .as_ref()
                                .map(|value| (version, filter.filter(key, value, &record.user_meta))),
                            _ => None,
                        }
                    });
                    match decision {
                        Some((version, Decision::MarkTombstone)) => {
                            if let Some(records) = chain.get_mut(&Reverse(version)) {
                                records.iter_mut().for_each(|r| r.value = None);
                            }
                            stats.filtered += 1;
                        }
                        Some((version, Decision::Drop)) => {
                            chain.remove(&Reverse(version));
                            stats.filtered += 1;
                        }
                        Some((_, Decision::Keep)) | None => {}
                    }
                }
                !chain.is_empty()
            });

            let guards = filter.as_ref().map(|f| f.guards()).unwrap_or_default();
            checkpoint_batches(&data, &guards)
        };

        stats.batches = batches.len();
        wal.rewrite(batches)?;
        tracing::info!(
            dir = %self.dir.display(),
            horizon,
            pruned = stats.records_pruned,
            dropped = stats.keys_dropped,
            filtered = stats.filtered,
            batches = stats.batches,
            "store compacted"
        );
        Ok(stats)
    }

    /// Force the WAL to disk
    pub fn sync(&self) -> Result<()> {
        self.wal.lock().sync()
    }

    /// WAL watermark: `segment << 32 | offset within segment`
    pub fn write_offset(&self) -> u64 {
        self.wal.lock().write_offset()
    }

    /// Sequence of the last published update
    pub fn sequence(&self) -> u64 {
        self.seq.load(Ordering::Acquire)
    }

    /// Highest version ever written
    pub fn max_version(&self) -> u64 {
        self.max_version.load(Ordering::Acquire)
    }

    /// Number of keys with at least one record (live or tombstone)
    pub fn key_count(&self) -> usize {
        self.data.read().len()
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

/// Publish `ops` under `seq`; returns the highest version written
fn apply_ops(data: &mut DataMap, ops: &[Operation], seq: u64) -> u64 {
    let mut max_version = 0;
    for op in ops {
        let record = match op {
            Operation::Put { value, user_meta, .. } => Record {
                seq,
                value: Some(value.clone()),
                user_meta: user_meta.clone(),
            },
            Operation::Delete { user_meta, .. } => Record {
                seq,
                value: None,
                user_meta: user_meta.clone(),
            },
        };
        max_version = max_version.max(op.version());
        data.entry(op.key().to_vec())
            .or_default()
            .entry(Reverse(op.version()))
            .or_default()
            .push(record);
    }
    max_version
}

/// Highest version that has a record visible at `seq`, with that record
pub(crate) fn top_at(chain: &VersionChain, seq: u64) -> Option<(u64, &Record)> {
    chain.iter().find_map(|(Reverse(version), records)| {
        records.iter().rev().find(|r| r.seq <= seq).map(|r| (*version, r))
    })
}

/// `[start, end)` as map bounds; `None` when the range is empty
pub(crate) fn range_bounds<'a>(start: &'a [u8], end: &'a [u8]) -> Option<(Bound<&'a [u8]>, Bound<&'a [u8]>)> {
    if end.is_empty() {
        return Some((Bound::Included(start), Bound::Unbounded));
    }
    if start >= end {
        return None;
    }
    Some((Bound::Included(start), Bound::Excluded(end)))
}
