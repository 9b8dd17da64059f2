//! Engine Module
//!
//! Owns the two storage engines of a node and the lock index.
//!
//! ## Responsibilities
//! - Open the main engine (data, apply state, region state) and the log
//!   engine (raft log entries), each with its own WAL directory
//! - Rebuild the lock index on startup from its dump plus log replay
//! - Commit write batches, build region snapshots, delete ranges
//! - Expose the log engine watermark and dump the lock index against it
//!
//! ## Layout
//! ```text
//! {data_dir}/
//!   ├── kv/      main engine WAL segments + lockstore.dump
//!   └── raft/    log engine WAL segments
//! ```
//!
//! The two engines commit independently. Nothing here makes a write to one
//! atomic with a write to the other.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::config::Config;
use crate::error::{Result, StoreError};
use crate::keys::{decode_region_state_key, region_meta_max_key, region_meta_min_key};
use crate::lockstore::LockStore;
use crate::meta::{decode, PeerState, RegionLocalState};
use crate::raftstore::{
    create_raft_log_compaction_filter, delete_range, fetch_entries_to, get_apply_state,
    restore_applied_entry, DeleteRangeStats, RegionSnapshot, WriteBatch,
};
use crate::storage::{CompactionStats, Store, StoreOptions};

// =============================================================================
// Main Engine
// =============================================================================

/// Main engine: versioned store, its lock index and the write-version counter
pub struct KvEngine {
    store: Arc<Store>,
    lock_store: LockStore,
    /// Last write version handed out
    state_ts: AtomicU64,
}

impl KvEngine {
    /// The counter resumes above every version already in `store`
    pub fn new(store: Arc<Store>, lock_store: LockStore) -> Self {
        let state_ts = AtomicU64::new(store.max_version());
        Self {
            store,
            lock_store,
            state_ts,
        }
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    pub fn lock_store(&self) -> &LockStore {
        &self.lock_store
    }

    /// Draw a fresh write version
    pub fn next_write_version(&self) -> u64 {
        self.state_ts.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub fn state_ts(&self) -> u64 {
        self.state_ts.load(Ordering::Acquire)
    }
}

// =============================================================================
// Engines
// =============================================================================

/// Main engine + log engine of one node
pub struct Engines {
    config: Config,
    kv: KvEngine,
    raft: Arc<Store>,
    kv_path: PathBuf,
    raft_path: PathBuf,
}

impl Engines {
    /// Open or create both engines under `config.data_dir`
    ///
    /// On startup:
    /// 1. Validate config, create directories
    /// 2. Open the main engine and the log engine (each recovers its WAL)
    /// 3. Load the lock index dump, if any
    /// 4. Replay every region's retained applied log entries into the lock index
    pub fn open(config: Config) -> Result<Self> {
        // Step 1: Validate and lay out directories
        config.validate()?;
        let kv_path = config.kv_path();
        let raft_path = config.raft_path();
        fs::create_dir_all(&kv_path)?;
        fs::create_dir_all(&raft_path)?;

        // Step 2: Open both stores
        let kv_store = Store::open(
            &kv_path,
            StoreOptions {
                sync_strategy: config.wal_sync_strategy,
                segment_size: config.wal_segment_size,
                compaction_filter: None,
            },
        )?;
        let raft = Store::open(
            &raft_path,
            StoreOptions {
                sync_strategy: config.wal_sync_strategy,
                segment_size: config.wal_segment_size,
                compaction_filter: Some(create_raft_log_compaction_filter),
            },
        )?;

        // Step 3: Lock index dump
        let dump_path = kv_path.join(&config.lock_store_file_name);
        let lock_store = match LockStore::load_from_file(&dump_path)? {
            Some((locks, watermark)) => {
                tracing::info!(watermark, locks = locks.len(), "lock index restored from dump");
                locks
            }
            None => LockStore::new(),
        };

        let engines = Self {
            kv: KvEngine::new(Arc::new(kv_store), lock_store),
            raft: Arc::new(raft),
            config,
            kv_path,
            raft_path,
        };

        // Step 4: Log replay
        let replayed = engines.restore_lock_store()?;
        tracing::info!(
            data_dir = %engines.config.data_dir.display(),
            kv_keys = engines.kv.store().key_count(),
            raft_keys = engines.raft.key_count(),
            locks = engines.kv.lock_store().len(),
            replayed,
            "engines opened"
        );
        Ok(engines)
    }

    /// Replay applied, untruncated entries of every live region
    fn restore_lock_store(&self) -> Result<usize> {
        let mut replayed = 0;
        let states = self
            .kv
            .store()
            .scan(&region_meta_min_key(), &region_meta_max_key());
        for item in states {
            let Some(region_id) = decode_region_state_key(&item.key) else {
                continue;
            };
            let state: RegionLocalState = decode(&item.value)?;
            if state.state == PeerState::Tombstone {
                continue;
            }
            let apply_state = get_apply_state(self.kv.store(), region_id)?;
            let fetched = fetch_entries_to(
                &self.raft,
                region_id,
                apply_state.truncated_index + 1,
                apply_state.applied_index + 1,
                u64::MAX,
            );
            let entries = match fetched {
                Ok((entries, _)) => entries,
                Err(StoreError::NotFound(what)) => {
                    tracing::warn!(region_id, missing = %what, "applied log entries missing, locks not replayed");
                    continue;
                }
                Err(e) => return Err(e),
            };
            for entry in &entries {
                restore_applied_entry(entry, None, self.kv.lock_store())?;
            }
            replayed += entries.len();
        }
        Ok(replayed)
    }

    // =========================================================================
    // Writes
    // =========================================================================

    pub fn write_kv(&self, wb: &WriteBatch) -> Result<()> {
        wb.commit_to_main(&self.kv)
    }

    pub fn write_raft(&self, wb: &WriteBatch) -> Result<()> {
        wb.commit_to_log(&self.raft)
    }

    pub fn sync_kv_wal(&self) -> Result<()> {
        self.kv.store().sync()
    }

    pub fn sync_raft_wal(&self) -> Result<()> {
        self.raft.sync()
    }

    // =========================================================================
    // Snapshots
    // =========================================================================

    /// Snapshot of `region_id`, redoing from the applied index observed now
    pub fn new_region_snapshot(&self, region_id: u64) -> Result<RegionSnapshot> {
        self.build_snapshot(region_id, None)
    }

    /// Snapshot of `region_id`, redoing log entries from `redo_idx`
    pub fn new_region_snapshot_from(&self, region_id: u64, redo_idx: u64) -> Result<RegionSnapshot> {
        self.build_snapshot(region_id, Some(redo_idx))
    }

    fn build_snapshot(&self, region_id: u64, redo_idx: Option<u64>) -> Result<RegionSnapshot> {
        RegionSnapshot::build(&self.kv, &self.raft, region_id, redo_idx).map_err(|e| {
            tracing::warn!(region_id, error = %e, retryable = e.is_retryable(), "region snapshot failed");
            e
        })
    }

    // =========================================================================
    // Maintenance
    // =========================================================================

    /// Delete every key and lock in `[start, end)` from the main engine
    pub fn delete_range(&self, start: &[u8], end: &[u8]) -> Result<DeleteRangeStats> {
        delete_range(&self.kv, start, end, self.config.delete_range_batch_size)
    }

    /// Log engine watermark: `segment << 32 | offset in segment`
    pub fn raft_write_offset(&self) -> u64 {
        self.raft.write_offset()
    }

    /// Default dump location
    pub fn lock_store_path(&self) -> PathBuf {
        self.kv_path.join(&self.config.lock_store_file_name)
    }

    /// Dump the lock index to `path`, tagged with the current watermark
    pub fn dump_lock_store(&self, path: &Path) -> Result<usize> {
        self.kv.lock_store().dump_to_file(path, self.raft_write_offset())
    }

    /// Dump the lock index to the default location, tagged with `watermark`
    pub fn dump_lock_store_at(&self, watermark: u64) -> Result<usize> {
        self.kv.lock_store().dump_to_file(&self.lock_store_path(), watermark)
    }

    pub fn compact_kv(&self) -> Result<CompactionStats> {
        self.kv.store().compact()
    }

    pub fn compact_raft(&self) -> Result<CompactionStats> {
        self.raft.compact()
    }

    /// Sync both WALs
    pub fn close(self) -> Result<()> {
        self.sync_kv_wal()?;
        self.sync_raft_wal()?;
        tracing::info!(data_dir = %self.config.data_dir.display(), "engines closed");
        Ok(())
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn kv(&self) -> &KvEngine {
        &self.kv
    }

    pub fn raft(&self) -> &Arc<Store> {
        &self.raft
    }

    pub fn kv_path(&self) -> &Path {
        &self.kv_path
    }

    pub fn raft_path(&self) -> &Path {
        &self.raft_path
    }

    pub fn config(&self) -> &Config {
        &self.config
    }
}
