//! Tests for Engines
//!
//! These tests verify:
//! - Open lays out both engine directories and validates config
//! - The lock index is rebuilt on reopen from its dump plus log replay
//! - Tombstoned regions and missing log entries do not block startup
//! - Maintenance operations (dump, compaction, close)

use std::fs;
use std::path::{Path, PathBuf};

use regionstore::keys::{apply_state_key, raft_log_key, region_state_key, VersionedKey};
use regionstore::meta::{ApplyState, EntryType, PeerState, RaftLogEntry, Region, RegionLocalState};
use regionstore::mvcc::{Lock, LockOp};
use regionstore::raftstore::{append_entries, apply_entry, get_apply_state, Mutation, RaftCmd};
use regionstore::{Config, Engines, LockStore, StoreError, WalSyncStrategy, WriteBatch};
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

fn setup_temp_dir() -> (TempDir, PathBuf) {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("node");
    (temp_dir, path)
}

fn test_config(path: &Path) -> Config {
    Config::builder()
        .data_dir(path)
        .wal_sync_strategy(WalSyncStrategy::EveryWrite)
        .build()
}

fn put_region(engines: &Engines, region_id: u64, state: PeerState) {
    let local = RegionLocalState {
        state,
        region: Region {
            id: region_id,
            ..Region::default()
        },
    };
    let mut wb = WriteBatch::new();
    wb.set_message(VersionedKey::unassigned(region_state_key(region_id)), &local)
        .unwrap();
    engines.write_kv(&wb).unwrap();
}

fn prewrite(key: &str, start_ts: u64) -> Mutation {
    Mutation::Prewrite {
        key: key.as_bytes().to_vec(),
        lock: Lock {
            start_ts,
            primary: key.as_bytes().to_vec(),
            ttl: 3000,
            op: LockOp::Put,
            value: b"value".to_vec(),
        },
    }
}

/// Append and apply one entry of `region_id`
fn propose(engines: &Engines, region_id: u64, state: &mut ApplyState, mutations: Vec<Mutation>) {
    let entry = RaftLogEntry {
        term: 1,
        index: state.applied_index + 1,
        entry_type: EntryType::Normal,
        data: RaftCmd::new(mutations).encode().unwrap(),
    };
    let mut wb = WriteBatch::new();
    append_entries(&mut wb, region_id, std::slice::from_ref(&entry)).unwrap();
    engines.write_raft(&wb).unwrap();
    apply_entry(engines.kv(), region_id, &entry, state).unwrap();
}

fn lock_keys(locks: &LockStore) -> Vec<String> {
    locks
        .scan(b"", b"")
        .into_iter()
        .map(|(k, _)| String::from_utf8(k).unwrap())
        .collect()
}

// =============================================================================
// Open Tests
// =============================================================================

#[test]
fn test_open_creates_layout() {
    let (_temp, path) = setup_temp_dir();
    let engines = Engines::open(test_config(&path)).unwrap();

    assert!(path.join("kv").is_dir());
    assert!(path.join("raft").is_dir());
    assert_eq!(engines.kv_path(), path.join("kv"));
    assert_eq!(engines.raft_path(), path.join("raft"));
    assert!(engines.kv().lock_store().is_empty());
    assert_eq!(engines.lock_store_path(), path.join("kv").join("lockstore.dump"));
}

#[test]
fn test_invalid_config_is_rejected() {
    let (_temp, path) = setup_temp_dir();

    let configs = [
        Config::builder().data_dir(&path).wal_segment_size(0).build(),
        Config::builder().data_dir(&path).delete_range_batch_size(0).build(),
        Config::builder().data_dir(&path).lock_store_file_name("").build(),
        Config::builder().data_dir(&path).dump_file_num_diff(0).build(),
        Config::builder()
            .data_dir(&path)
            .wal_sync_strategy(WalSyncStrategy::EveryNEntries { count: 0 })
            .build(),
    ];
    for config in configs {
        assert!(matches!(Engines::open(config), Err(StoreError::Config(_))));
    }
    // Nothing created for a rejected config
    assert!(!path.exists());
}

// =============================================================================
// Lock Index Recovery Tests
// =============================================================================

#[test]
fn test_reopen_replays_applied_log() {
    let (_temp, path) = setup_temp_dir();
    {
        let engines = Engines::open(test_config(&path)).unwrap();
        put_region(&engines, 1, PeerState::Normal);
        let mut state = ApplyState::default();
        propose(&engines, 1, &mut state, vec![prewrite("a", 1)]);
        propose(&engines, 1, &mut state, vec![prewrite("b", 2)]);
        engines.close().unwrap();
    }

    let engines = Engines::open(test_config(&path)).unwrap();
    assert_eq!(lock_keys(engines.kv().lock_store()), vec!["a", "b"]);
}

#[test]
fn test_reopen_combines_dump_and_log() {
    let (_temp, path) = setup_temp_dir();
    {
        let engines = Engines::open(test_config(&path)).unwrap();
        put_region(&engines, 1, PeerState::Normal);
        let mut state = ApplyState::default();
        propose(&engines, 1, &mut state, vec![prewrite("a", 1)]);
        engines.dump_lock_store_at(engines.raft_write_offset()).unwrap();

        // Entry 1 leaves the log; only the dump remembers its lock.
        let mut wb = WriteBatch::new();
        wb.delete(VersionedKey::unassigned(raft_log_key(1, 1)));
        engines.write_raft(&wb).unwrap();
        state.truncated_index = 1;
        state.truncated_term = 1;
        propose(&engines, 1, &mut state, vec![prewrite("b", 2)]);
        engines.close().unwrap();
    }

    let engines = Engines::open(test_config(&path)).unwrap();
    assert_eq!(lock_keys(engines.kv().lock_store()), vec!["a", "b"]);
    assert_eq!(get_apply_state(engines.kv().store(), 1).unwrap().truncated_index, 1);
}

#[test]
fn test_tombstone_region_is_not_replayed() {
    let (_temp, path) = setup_temp_dir();
    {
        let engines = Engines::open(test_config(&path)).unwrap();
        put_region(&engines, 1, PeerState::Normal);
        put_region(&engines, 2, PeerState::Normal);
        let mut one = ApplyState::default();
        let mut two = ApplyState::default();
        propose(&engines, 1, &mut one, vec![prewrite("a", 1)]);
        propose(&engines, 2, &mut two, vec![prewrite("x", 1)]);
        put_region(&engines, 2, PeerState::Tombstone);
        engines.close().unwrap();
    }

    let engines = Engines::open(test_config(&path)).unwrap();
    assert_eq!(lock_keys(engines.kv().lock_store()), vec!["a"]);
}

#[test]
fn test_missing_log_entries_are_skipped() {
    let (_temp, path) = setup_temp_dir();
    {
        let engines = Engines::open(test_config(&path)).unwrap();
        put_region(&engines, 1, PeerState::Normal);
        put_region(&engines, 2, PeerState::Normal);
        let mut one = ApplyState::default();
        propose(&engines, 1, &mut one, vec![prewrite("a", 1)]);

        // Region 2 claims applied entries the log engine never saw.
        let mut wb = WriteBatch::new();
        wb.set_message(
            VersionedKey::unassigned(apply_state_key(2)),
            &ApplyState {
                applied_index: 5,
                ..ApplyState::default()
            },
        )
        .unwrap();
        engines.write_kv(&wb).unwrap();
        engines.close().unwrap();
    }

    let engines = Engines::open(test_config(&path)).unwrap();
    assert_eq!(lock_keys(engines.kv().lock_store()), vec!["a"]);
}

#[test]
fn test_corrupt_dump_fails_open() {
    let (_temp, path) = setup_temp_dir();
    {
        let engines = Engines::open(test_config(&path)).unwrap();
        engines.dump_lock_store_at(0).unwrap();
    }
    let dump = path.join("kv").join("lockstore.dump");
    let mut bytes = fs::read(&dump).unwrap();
    bytes.truncate(bytes.len() - 1);
    fs::write(&dump, bytes).unwrap();

    assert!(matches!(
        Engines::open(test_config(&path)),
        Err(StoreError::Corruption(_))
    ));
}

// =============================================================================
// Maintenance Tests
// =============================================================================

#[test]
fn test_dump_to_explicit_path() {
    let (temp, path) = setup_temp_dir();
    let engines = Engines::open(test_config(&path)).unwrap();
    put_region(&engines, 1, PeerState::Normal);
    let mut state = ApplyState::default();
    propose(&engines, 1, &mut state, vec![prewrite("a", 1), prewrite("b", 1)]);

    let target = temp.path().join("copy.dump");
    assert_eq!(engines.dump_lock_store(&target).unwrap(), 2);
    let (locks, watermark) = LockStore::load_from_file(&target).unwrap().unwrap();
    assert_eq!(locks.len(), 2);
    assert_eq!(watermark, engines.raft_write_offset());
}

#[test]
fn test_compact_raft_keeps_log() {
    let (_temp, path) = setup_temp_dir();
    {
        let engines = Engines::open(test_config(&path)).unwrap();
        put_region(&engines, 1, PeerState::Normal);
        put_region(&engines, 2, PeerState::Normal);
        let mut one = ApplyState::default();
        let mut two = ApplyState::default();
        for i in 0..5 {
            propose(&engines, 1, &mut one, vec![prewrite(&format!("a{}", i), 1)]);
            propose(&engines, 2, &mut two, vec![prewrite(&format!("b{}", i), 1)]);
        }

        let stats = engines.compact_raft().unwrap();
        assert_eq!(stats.filtered, 0);
        assert_eq!(stats.keys_dropped, 0);
        // Every log entry survives.
        assert_eq!(engines.raft().key_count(), 10);
        assert!(stats.batches >= 1);

        engines.compact_kv().unwrap();
        engines.close().unwrap();
    }

    // Compacted WALs still rebuild the lock index.
    let engines = Engines::open(test_config(&path)).unwrap();
    assert_eq!(engines.kv().lock_store().len(), 10);
}

#[test]
fn test_sync_and_close() {
    let (_temp, path) = setup_temp_dir();
    let engines = Engines::open(test_config(&path)).unwrap();
    put_region(&engines, 1, PeerState::Normal);
    engines.sync_kv_wal().unwrap();
    engines.sync_raft_wal().unwrap();
    engines.close().unwrap();

    let engines = Engines::open(test_config(&path)).unwrap();
    assert!(engines.kv().store().get(&region_state_key(1)).is_some());
}
