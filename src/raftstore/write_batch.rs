//! Write Batch
//!
//! Buffers main-engine entries and lock-index entries produced while applying
//! raft log entries, then commits them in two steps:
//!
//! ```text
//! commit_to_main:
//!   1. entries      ──► one atomic Store::update (all or nothing)
//!                       KV_TS versions replaced by one fresh write version
//!   2. lock_entries ──► LockStore writer, held for the whole batch
//! ```
//!
//! Step 1 persists the apply state together with the data, so a snapshot
//! started afterwards begins at the new raft index. The lock index may
//! therefore lag the main store; the snapshot builder closes that gap by
//! replaying log entries.
//!
//! Nothing touches storage until a commit; building a batch is pure buffering.

use serde::Serialize;

use crate::engine::KvEngine;
use crate::error::Result;
use crate::keys::{VersionedKey, KV_TS};
use crate::mvcc::{
    encode_extra_txn_status_key, DbUserMeta, LOCK_USER_META_DELETE, LOCK_USER_META_DELETE_BYTE,
    LOCK_USER_META_NONE,
};
use crate::storage::Store;

/// One buffered entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchEntry {
    pub key: VersionedKey,
    pub value: Vec<u8>,
    pub user_meta: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Checkpoint {
    entries: usize,
    lock_entries: usize,
    size: usize,
}

/// Ordered buffer of main-engine and lock-index mutations
#[derive(Debug, Default)]
pub struct WriteBatch {
    entries: Vec<BatchEntry>,
    lock_entries: Vec<BatchEntry>,
    /// Approximate payload bytes of `entries`
    size: usize,
    checkpoint: Option<Checkpoint>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of buffered entries, lock entries included
    pub fn len(&self) -> usize {
        self.entries.len() + self.lock_entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn entries(&self) -> &[BatchEntry] {
        &self.entries
    }

    pub fn lock_entries(&self) -> &[BatchEntry] {
        &self.lock_entries
    }

    // =========================================================================
    // Main engine entries
    // =========================================================================

    pub fn set(&mut self, key: VersionedKey, value: Vec<u8>) {
        self.size += key.len() + value.len();
        self.entries.push(BatchEntry {
            key,
            value,
            user_meta: Vec::new(),
        });
    }

    pub fn set_with_meta(&mut self, key: VersionedKey, value: Vec<u8>, user_meta: Vec<u8>) {
        self.size += key.len() + value.len() + user_meta.len();
        self.entries.push(BatchEntry {
            key,
            value,
            user_meta,
        });
    }

    /// Tombstone for `key`: no value, no meta
    pub fn delete(&mut self, key: VersionedKey) {
        self.size += key.len();
        self.entries.push(BatchEntry {
            key,
            value: Vec::new(),
            user_meta: Vec::new(),
        });
    }

    /// Record that the transaction at `key.version` was rolled back
    pub fn rollback_marker(&mut self, key: &VersionedKey) {
        let marker = encode_extra_txn_status_key(&key.user_key, key.version);
        self.entries.push(BatchEntry {
            key: VersionedKey::new(marker, key.version),
            value: Vec::new(),
            user_meta: DbUserMeta::new(key.version, 0).encode(),
        });
    }

    /// Record a lock-only operation, keyed by the start ts carried in `user_meta`
    pub fn set_op_lock(&mut self, key: &VersionedKey, user_meta: Vec<u8>) -> Result<()> {
        let start_ts = DbUserMeta::decode(&user_meta)?.start_ts;
        self.size += key.len() + user_meta.len();
        self.entries.push(BatchEntry {
            key: VersionedKey::new(
                encode_extra_txn_status_key(&key.user_key, start_ts),
                key.version,
            ),
            value: Vec::new(),
            user_meta,
        });
        Ok(())
    }

    /// Serialize `msg` and `set` it
    pub fn set_message<T: Serialize>(&mut self, key: VersionedKey, msg: &T) -> Result<()> {
        let value = bincode::serialize(msg)?;
        self.set(key, value);
        Ok(())
    }

    // =========================================================================
    // Lock index entries
    // =========================================================================

    pub fn set_lock(&mut self, key: &[u8], value: Vec<u8>) {
        self.lock_entries.push(BatchEntry {
            key: VersionedKey::unassigned(key),
            value,
            user_meta: LOCK_USER_META_NONE.to_vec(),
        });
    }

    pub fn delete_lock(&mut self, key: &[u8]) {
        self.lock_entries.push(BatchEntry {
            key: VersionedKey::unassigned(key),
            value: Vec::new(),
            user_meta: LOCK_USER_META_DELETE.to_vec(),
        });
    }

    // =========================================================================
    // Checkpoints
    // =========================================================================

    /// Remember the current lengths and size, replacing any earlier checkpoint
    pub fn set_checkpoint(&mut self) {
        self.checkpoint = Some(Checkpoint {
            entries: self.entries.len(),
            lock_entries: self.lock_entries.len(),
            size: self.size,
        });
    }

    /// Drop everything added since the checkpoint and consume it
    ///
    /// Returns `false` (and changes nothing) when no checkpoint is set.
    pub fn rollback_to_checkpoint(&mut self) -> bool {
        let Some(cp) = self.checkpoint.take() else {
            return false;
        };
        self.entries.truncate(cp.entries);
        self.lock_entries.truncate(cp.lock_entries);
        self.size = cp.size;
        true
    }

    /// Clear every entry and the checkpoint, keeping allocations
    pub fn reset(&mut self) {
        self.entries.clear();
        self.lock_entries.clear();
        self.size = 0;
        self.checkpoint = None;
    }

    // =========================================================================
    // Commit
    // =========================================================================

    /// Commit to the main engine, then to its lock index
    ///
    /// A store failure aborts the whole update and leaves the lock index
    /// untouched.
    pub fn commit_to_main(&self, kv: &KvEngine) -> Result<()> {
        if !self.entries.is_empty() {
            let write_version = kv.next_write_version();
            kv.store().update(|txn| {
                for entry in &self.entries {
                    let assigned;
                    let key = if entry.key.version == KV_TS {
                        assigned = VersionedKey::new(entry.key.user_key.clone(), write_version);
                        &assigned
                    } else {
                        &entry.key
                    };
                    if entry.value.is_empty() && entry.user_meta.is_empty() {
                        txn.delete(key, &[]);
                    } else {
                        txn.set(key, &entry.value, &entry.user_meta);
                    }
                }
                Ok(())
            })?;
        }

        if !self.lock_entries.is_empty() {
            let mut writer = kv.lock_store().writer();
            for entry in &self.lock_entries {
                match entry.user_meta.first() {
                    Some(&LOCK_USER_META_DELETE_BYTE) => {
                        writer.delete(&entry.key.user_key);
                    }
                    _ => writer.put(&entry.key.user_key, &entry.value),
                }
            }
        }
        Ok(())
    }

    /// Commit to the log engine; lock entries are ignored
    pub fn commit_to_log(&self, raft: &Store) -> Result<()> {
        if self.entries.is_empty() {
            return Ok(());
        }
        raft.update(|txn| {
            for entry in &self.entries {
                if entry.value.is_empty() {
                    txn.delete(&entry.key, &entry.user_meta);
                } else {
                    txn.set(&entry.key, &entry.value, &entry.user_meta);
                }
            }
            Ok(())
        })
    }
}
