//! Region Snapshot Builder
//!
//! Produces a causally consistent view of one region: main-engine data pinned
//! at one commit sequence, plus a private copy of the region's lock index.
//!
//! ## Why redo is needed
//! `WriteBatch::commit_to_main` commits data (and the apply state) before it
//! updates the lock index. A lock copy taken at any moment may therefore lag
//! the main store by a few applied entries. The builder copies the locks
//! *first*, then pins the main store, then replays the log entries between
//! the two observations into the copy.
//!
//! ```text
//! 1. region state (latest)     ──► start/end keys, epoch version
//! 2. redo_idx = applied index  ──► copy locks in [start, end)
//! 3. begin_read                ──► pinned view
//! 4. region state (pinned)     ──► epoch changed? RegionChanged
//! 5. applied index/term        ──► from the pinned apply state
//! 6. redo [redo_idx, applied]  ──► lock copy + overlay catch up
//! ```

use crate::engine::KvEngine;
use crate::error::{Result, StoreError};
use crate::keys::{apply_state_key, raft_log_key, region_state_key};
use crate::lockstore::LockStore;
use crate::meta::{decode, ApplyState, RaftLogEntry, Region, RegionLocalState};
use crate::storage::{ReadTxn, Store};

use super::apply::{fetch_entries_to, restore_applied_entry};

/// Point-in-time view of one region
pub struct RegionSnapshot {
    region_state: RegionLocalState,
    txn: ReadTxn,
    lock_snap: LockStore,
    term: u64,
    index: u64,
}

impl RegionSnapshot {
    /// Build a snapshot of `region_id`
    ///
    /// `redo_idx` is the first log index to replay; `None` uses the applied
    /// index observed before the lock copy. Any failure drops the read
    /// transaction, so no partial snapshot escapes.
    pub fn build(kv: &KvEngine, raft: &Store, region_id: u64, redo_idx: Option<u64>) -> Result<Self> {
        let old_state = get_region_local_state(kv.store(), region_id)?;
        let redo_idx = match redo_idx {
            Some(idx) => idx,
            None => get_apply_state(kv.store(), region_id)?.applied_index,
        };
        let region = &old_state.region;
        let lock_snap = kv.lock_store().copy_range(&region.start_key, &region.end_key);

        let txn = kv.store().begin_read();

        let region_state: RegionLocalState = decode(&txn.get_value(&region_state_key(region_id))?)?;
        let expected = old_state.region.epoch.version;
        let actual = region_state.region.epoch.version;
        if actual != expected {
            return Err(StoreError::RegionChanged {
                region_id,
                expected,
                actual,
            });
        }

        let (index, term) = get_applied_idx_term_for_snapshot(raft, &txn, region_id)?;
        let mut snap = RegionSnapshot {
            region_state,
            txn,
            lock_snap,
            term,
            index,
        };
        snap.redo_locks(raft, redo_idx)?;
        Ok(snap)
    }

    /// Replay entries `[redo_idx, applied]` into the lock copy and overlay
    fn redo_locks(&mut self, raft: &Store, redo_idx: u64) -> Result<()> {
        let region_id = self.region_state.region.id;
        let apply_state = match self.txn.get(&apply_state_key(region_id)) {
            Some(item) => decode::<ApplyState>(&item.value)?,
            None => ApplyState::default(),
        };
        // Entries up to the truncated index are gone from the log engine.
        let low = redo_idx.max(apply_state.truncated_index + 1);
        let high = apply_state.applied_index + 1;
        let (entries, _) = fetch_entries_to(raft, region_id, low, high, u64::MAX)?;

        for entry in &entries {
            restore_applied_entry(entry, Some(&mut self.txn), &self.lock_snap)?;
        }
        if !entries.is_empty() {
            tracing::debug!(region_id, low, high, replayed = entries.len(), "snapshot locks redone");
        }
        Ok(())
    }

    pub fn region_state(&self) -> &RegionLocalState {
        &self.region_state
    }

    pub fn region(&self) -> &Region {
        &self.region_state.region
    }

    pub fn txn(&self) -> &ReadTxn {
        &self.txn
    }

    pub fn lock_snapshot(&self) -> &LockStore {
        &self.lock_snap
    }

    pub fn applied_term(&self) -> u64 {
        self.term
    }

    pub fn applied_index(&self) -> u64 {
        self.index
    }

    /// Release the read transaction
    pub fn release(self) {
        self.txn.release();
    }
}

/// Latest committed local state of `region_id`
pub fn get_region_local_state(kv: &Store, region_id: u64) -> Result<RegionLocalState> {
    let item = kv
        .get(&region_state_key(region_id))
        .ok_or_else(|| StoreError::NotFound(format!("region state of {}", region_id)))?;
    decode(&item.value)
}

/// Latest committed apply state of `region_id`; default when never applied
pub fn get_apply_state(kv: &Store, region_id: u64) -> Result<ApplyState> {
    match kv.get(&apply_state_key(region_id)) {
        Some(item) => decode(&item.value),
        None => Ok(ApplyState::default()),
    }
}

/// Applied index and its term, as of `txn`'s pinned view
pub fn get_applied_idx_term_for_snapshot(raft: &Store, txn: &ReadTxn, region_id: u64) -> Result<(u64, u64)> {
    let apply_state: ApplyState = decode(&txn.get_value(&apply_state_key(region_id))?)?;
    let idx = apply_state.applied_index;
    if idx == apply_state.truncated_index {
        return Ok((idx, apply_state.truncated_term));
    }
    let item = raft
        .get(&raft_log_key(region_id, idx))
        .ok_or_else(|| StoreError::NotFound(format!("raft log entry {} of region {}", idx, region_id)))?;
    let entry: RaftLogEntry = decode(&item.value)?;
    Ok((idx, entry.term))
}
