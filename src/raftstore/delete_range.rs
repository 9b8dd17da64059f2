//! Range delete
//!
//! Removes every key of `[start, end)` from the main engine and its lock
//! index. Work is split into batches; each batch commits on its own, so a
//! failure part way leaves earlier batches applied. Running the same delete
//! again finishes the job: keys already deleted are no longer collected.

use crate::engine::KvEngine;
use crate::error::{Result, StoreError};
use crate::keys::VersionedKey;

use super::write_batch::WriteBatch;

/// Default number of keys per committed batch
pub const DELETE_RANGE_BATCH_SIZE: usize = 4096;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DeleteRangeStats {
    pub keys_deleted: usize,
    pub locks_deleted: usize,
    pub batches: usize,
}

/// Delete every key and lock in `[start, end)`; `end` must not be empty
pub fn delete_range(kv: &KvEngine, start: &[u8], end: &[u8], batch_size: usize) -> Result<DeleteRangeStats> {
    if end.is_empty() {
        return Err(StoreError::InvalidRange("range delete needs an end key".into()));
    }
    let batch_size = batch_size.max(1);
    let mut stats = DeleteRangeStats::default();

    // Step 1: data keys, tombstoned just above their latest version
    let keys: Vec<VersionedKey> = {
        let txn = kv.store().begin_read();
        txn.scan(start, end)
            .into_iter()
            .map(|item| VersionedKey::new(item.key, item.version))
            .collect()
    };
    // A tombstone must sit strictly above the version it hides; checked before
    // any batch commits so the range is left untouched.
    if let Some(key) = keys.iter().find(|key| key.version == u64::MAX) {
        return Err(StoreError::InvalidRange(format!(
            "key {:?} is at the maximum version and cannot be tombstoned",
            key.user_key
        )));
    }
    let mut wb = WriteBatch::new();
    for chunk in keys.chunks(batch_size) {
        wb.reset();
        for key in chunk {
            wb.delete(VersionedKey::new(key.user_key.clone(), key.version + 1));
        }
        wb.commit_to_main(kv)?;
        stats.keys_deleted += chunk.len();
        stats.batches += 1;
    }

    // Step 2: locks
    let lock_keys: Vec<Vec<u8>> = kv
        .lock_store()
        .scan(start, end)
        .into_iter()
        .map(|(key, _)| key)
        .collect();
    for chunk in lock_keys.chunks(batch_size) {
        wb.reset();
        for key in chunk {
            wb.delete_lock(key);
        }
        wb.commit_to_main(kv)?;
        stats.locks_deleted += chunk.len();
        stats.batches += 1;
    }

    tracing::info!(
        start = ?start,
        end = ?end,
        keys = stats.keys_deleted,
        locks = stats.locks_deleted,
        batches = stats.batches,
        "range deleted"
    );
    Ok(stats)
}
