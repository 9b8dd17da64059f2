//! Applied-entry replay
//!
//! Turns committed raft log entries into storage mutations.
//!
//! ## Two halves
//! - `apply_entry`: the normal path. Decodes the entry's `RaftCmd`, fills a
//!   `WriteBatch` with data, lock-index changes and the new apply state, and
//!   commits it to the main engine.
//! - `restore_applied_entry`: the redo path. Re-applies only the lock-index
//!   effect of an entry that already reached the main store (plus any missing
//!   committed write, into a read transaction's private overlay). Replaying an
//!   entry twice leaves the same state as replaying it once.

use serde::{Deserialize, Serialize};

use crate::engine::KvEngine;
use crate::error::{Result, StoreError};
use crate::keys::{apply_state_key, raft_log_key, VersionedKey};
use crate::lockstore::{LockStore, LockWriter};
use crate::meta::{decode, ApplyState, EntryType, RaftLogEntry};
use crate::mvcc::{encode_extra_txn_status_key, DbUserMeta, Lock, LockOp};
use crate::storage::{ReadTxn, Store};

use super::write_batch::WriteBatch;

/// Payload of a normal raft log entry
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RaftCmd {
    pub mutations: Vec<Mutation>,
}

/// One transactional step carried by a `RaftCmd`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Mutation {
    Prewrite { key: Vec<u8>, lock: Lock },
    Commit { key: Vec<u8>, start_ts: u64, commit_ts: u64 },
    Rollback { key: Vec<u8>, start_ts: u64 },
    PessimisticLock { key: Vec<u8>, lock: Lock },
    PessimisticRollback { key: Vec<u8>, start_ts: u64 },
}

impl RaftCmd {
    pub fn new(mutations: Vec<Mutation>) -> Self {
        Self { mutations }
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    /// Command carried by `entry`; `None` for conf changes and no-op entries
    pub fn from_entry(entry: &RaftLogEntry) -> Result<Option<Self>> {
        if entry.entry_type != EntryType::Normal || entry.data.is_empty() {
            return Ok(None);
        }
        decode(&entry.data).map(Some)
    }
}

// =============================================================================
// Apply
// =============================================================================

/// Apply one committed entry of `region_id` to the main engine
///
/// Data, lock-index changes and the advanced apply state commit as one
/// `WriteBatch`.
pub fn apply_entry(
    kv: &KvEngine,
    region_id: u64,
    entry: &RaftLogEntry,
    apply_state: &mut ApplyState,
) -> Result<()> {
    let mut wb = WriteBatch::new();
    if let Some(cmd) = RaftCmd::from_entry(entry)? {
        for mutation in cmd.mutations {
            // A mutation that fails to stage must not leave half its entries.
            wb.set_checkpoint();
            if let Err(e) = stage_mutation(&mut wb, kv.lock_store(), mutation) {
                wb.rollback_to_checkpoint();
                return Err(e);
            }
        }
    }

    let mut next_state = *apply_state;
    next_state.applied_index = entry.index;
    wb.set_message(VersionedKey::unassigned(apply_state_key(region_id)), &next_state)?;
    wb.commit_to_main(kv)?;
    *apply_state = next_state;
    Ok(())
}

fn stage_mutation(wb: &mut WriteBatch, locks: &LockStore, mutation: Mutation) -> Result<()> {
    match mutation {
        Mutation::Prewrite { key, lock } | Mutation::PessimisticLock { key, lock } => {
            wb.set_lock(&key, lock.encode()?);
        }
        Mutation::Commit {
            key,
            start_ts,
            commit_ts,
        } => {
            let Some(lock) = pending_lock(wb, locks, &key)? else {
                tracing::debug!(start_ts, commit_ts, "commit without lock, already resolved");
                return Ok(());
            };
            if lock.start_ts != start_ts {
                return Ok(());
            }
            let meta = DbUserMeta::new(start_ts, commit_ts).encode();
            let committed = VersionedKey::new(key.clone(), commit_ts);
            match lock.op {
                LockOp::Put => wb.set_with_meta(committed, lock.value, meta),
                LockOp::Del => wb.set_with_meta(committed, Vec::new(), meta),
                LockOp::Lock => wb.set_op_lock(&committed, meta)?,
                LockOp::Pessimistic => {}
            }
            wb.delete_lock(&key);
        }
        Mutation::Rollback { key, start_ts } => {
            if let Some(lock) = pending_lock(wb, locks, &key)? {
                if lock.start_ts == start_ts {
                    wb.delete_lock(&key);
                }
            }
            wb.rollback_marker(&VersionedKey::new(key, start_ts));
        }
        Mutation::PessimisticRollback { key, start_ts } => {
            if let Some(lock) = pending_lock(wb, locks, &key)? {
                if lock.start_ts == start_ts && lock.op == LockOp::Pessimistic {
                    wb.delete_lock(&key);
                }
            }
        }
    }
    Ok(())
}

/// Lock on `key` as it will be once `wb` commits
fn pending_lock(wb: &WriteBatch, locks: &LockStore, key: &[u8]) -> Result<Option<Lock>> {
    let staged = wb
        .lock_entries()
        .iter()
        .rev()
        .find(|entry| entry.key.user_key == key);
    match staged {
        Some(entry) if entry.value.is_empty() => Ok(None),
        Some(entry) => Lock::decode(&entry.value).map(Some),
        None => locks.get(key).map(|raw| Lock::decode(&raw)).transpose(),
    }
}

// =============================================================================
// Redo
// =============================================================================

/// Replay the lock-index effect of an already applied entry
///
/// With `txn`, committed writes the transaction cannot see are also written
/// into its private overlay, so the pair stays consistent.
pub fn restore_applied_entry(
    entry: &RaftLogEntry,
    mut txn: Option<&mut ReadTxn>,
    locks: &LockStore,
) -> Result<()> {
    let Some(cmd) = RaftCmd::from_entry(entry)? else {
        return Ok(());
    };
    let mut writer = locks.writer();
    for mutation in cmd.mutations {
        redo_mutation(&mut writer, txn.as_deref_mut(), mutation)?;
    }
    Ok(())
}

fn redo_mutation(writer: &mut LockWriter<'_>, txn: Option<&mut ReadTxn>, mutation: Mutation) -> Result<()> {
    match mutation {
        Mutation::Prewrite { key, lock } | Mutation::PessimisticLock { key, lock } => {
            writer.put(&key, &lock.encode()?);
        }
        Mutation::Commit {
            key,
            start_ts,
            commit_ts,
        } => {
            let Some(lock) = writer.get(&key).map(Lock::decode).transpose()? else {
                return Ok(());
            };
            if lock.start_ts != start_ts {
                return Ok(());
            }
            if let Some(txn) = txn {
                let seen = txn.get(&key).map_or(false, |item| item.version >= commit_ts);
                let meta = DbUserMeta::new(start_ts, commit_ts).encode();
                let committed = VersionedKey::new(key.clone(), commit_ts);
                match lock.op {
                    LockOp::Put if !seen => txn.set(&committed, &lock.value, &meta),
                    LockOp::Del if !seen => txn.set(&committed, &[], &meta),
                    LockOp::Lock => {
                        let op_lock = VersionedKey::new(encode_extra_txn_status_key(&key, start_ts), commit_ts);
                        txn.set(&op_lock, &[], &meta);
                    }
                    _ => {}
                }
            }
            writer.delete(&key);
        }
        Mutation::Rollback { key, start_ts } => {
            let matches = writer
                .get(&key)
                .map(Lock::decode)
                .transpose()?
                .map_or(false, |lock| lock.start_ts == start_ts);
            if matches {
                writer.delete(&key);
            }
            if let Some(txn) = txn {
                let marker = VersionedKey::new(encode_extra_txn_status_key(&key, start_ts), start_ts);
                txn.set(&marker, &[], &DbUserMeta::new(start_ts, 0).encode());
            }
        }
        Mutation::PessimisticRollback { key, start_ts } => {
            let matches = writer
                .get(&key)
                .map(Lock::decode)
                .transpose()?
                .map_or(false, |lock| lock.start_ts == start_ts && lock.op == LockOp::Pessimistic);
            if matches {
                writer.delete(&key);
            }
        }
    }
    Ok(())
}

// =============================================================================
// Log Engine
// =============================================================================

/// Stage `entries` of `region_id` for the log engine
pub fn append_entries(wb: &mut WriteBatch, region_id: u64, entries: &[RaftLogEntry]) -> Result<()> {
    for entry in entries {
        wb.set_message(VersionedKey::unassigned(raft_log_key(region_id, entry.index)), entry)?;
    }
    Ok(())
}

/// Log entries `[low, high)` of `region_id`
///
/// Stops once the entries fetched exceed `max_size` bytes, but always returns
/// at least one entry when `low < high`. A gap (an index already truncated or
/// never written) is `NotFound`. Returns the entries and their total size.
pub fn fetch_entries_to(
    raft: &Store,
    region_id: u64,
    low: u64,
    high: u64,
    max_size: u64,
) -> Result<(Vec<RaftLogEntry>, u64)> {
    let mut entries = Vec::new();
    let mut total = 0u64;
    if low >= high {
        return Ok((entries, total));
    }

    let start = raft_log_key(region_id, low);
    let end = raft_log_key(region_id, high);
    let mut expected = low;
    for item in raft.scan(&start, &end) {
        let entry: RaftLogEntry = decode(&item.value)?;
        if entry.index != expected {
            break;
        }
        total += entry.size();
        entries.push(entry);
        expected += 1;
        if total > max_size {
            return Ok((entries, total));
        }
    }

    if expected != high {
        return Err(StoreError::NotFound(format!(
            "raft log entry {} of region {}",
            expected, region_id
        )));
    }
    Ok((entries, total))
}
