//! Tests for applying and replaying raft log entries
//!
//! These tests verify:
//! - Prewrite, commit and rollback effects on data and the lock index
//! - The apply state advances with every entry
//! - Replaying an entry twice is the same as replaying it once
//! - Log fetches stop at gaps and size limits

use regionstore::keys::{apply_state_key, raft_log_key, VersionedKey};
use regionstore::meta::{decode, ApplyState, EntryType, RaftLogEntry};
use regionstore::mvcc::{encode_extra_txn_status_key, DbUserMeta, Lock, LockOp};
use regionstore::raftstore::{
    append_entries, apply_entry, fetch_entries_to, get_apply_state, restore_applied_entry,
    Mutation, RaftCmd,
};
use regionstore::{Config, Engines, LockStore, StoreError, WalSyncStrategy, WriteBatch};
use tempfile::TempDir;

const REGION: u64 = 1;

// =============================================================================
// Helper Functions
// =============================================================================

fn setup_engines() -> (TempDir, Engines) {
    let temp_dir = TempDir::new().unwrap();
    let config = Config::builder()
        .data_dir(temp_dir.path())
        .wal_sync_strategy(WalSyncStrategy::EveryWrite)
        .build();
    let engines = Engines::open(config).unwrap();
    (temp_dir, engines)
}

fn lock(start_ts: u64, op: LockOp, value: &[u8]) -> Lock {
    Lock {
        start_ts,
        primary: b"primary".to_vec(),
        ttl: 3000,
        op,
        value: value.to_vec(),
    }
}

fn entry(index: u64, mutations: Vec<Mutation>) -> RaftLogEntry {
    RaftLogEntry {
        term: 1,
        index,
        entry_type: EntryType::Normal,
        data: RaftCmd::new(mutations).encode().unwrap(),
    }
}

fn prewrite(key: &[u8], lock: Lock) -> Mutation {
    Mutation::Prewrite {
        key: key.to_vec(),
        lock,
    }
}

fn commit(key: &[u8], start_ts: u64, commit_ts: u64) -> Mutation {
    Mutation::Commit {
        key: key.to_vec(),
        start_ts,
        commit_ts,
    }
}

/// Persist `entries` in the log engine
fn append(engines: &Engines, entries: &[RaftLogEntry]) {
    let mut wb = WriteBatch::new();
    append_entries(&mut wb, REGION, entries).unwrap();
    engines.write_raft(&wb).unwrap();
}

/// Append and apply one entry holding `mutations`
fn propose(engines: &Engines, state: &mut ApplyState, mutations: Vec<Mutation>) -> RaftLogEntry {
    let e = entry(state.applied_index + 1, mutations);
    append(engines, std::slice::from_ref(&e));
    apply_entry(engines.kv(), REGION, &e, state).unwrap();
    e
}

fn stored_lock(locks: &LockStore, key: &[u8]) -> Option<Lock> {
    locks.get(key).map(|raw| Lock::decode(&raw).unwrap())
}

// =============================================================================
// Apply Tests
// =============================================================================

#[test]
fn test_prewrite_then_commit() {
    let (_temp, engines) = setup_engines();
    let mut state = ApplyState::default();

    propose(&engines, &mut state, vec![prewrite(b"k", lock(10, LockOp::Put, b"value"))]);
    assert_eq!(stored_lock(engines.kv().lock_store(), b"k").unwrap().start_ts, 10);
    assert!(engines.kv().store().get(b"k").is_none());

    propose(&engines, &mut state, vec![commit(b"k", 10, 20)]);
    assert!(engines.kv().lock_store().get(b"k").is_none());
    let item = engines.kv().store().get(b"k").unwrap();
    assert_eq!(item.version, 20);
    assert_eq!(item.value, b"value");
    assert_eq!(DbUserMeta::decode(&item.user_meta).unwrap(), DbUserMeta::new(10, 20));

    assert_eq!(state.applied_index, 2);
    assert_eq!(get_apply_state(engines.kv().store(), REGION).unwrap(), state);
}

#[test]
fn test_commit_sees_lock_staged_in_same_entry() {
    let (_temp, engines) = setup_engines();
    let mut state = ApplyState::default();

    propose(
        &engines,
        &mut state,
        vec![prewrite(b"k", lock(5, LockOp::Put, b"v")), commit(b"k", 5, 6)],
    );
    assert!(engines.kv().lock_store().is_empty());
    assert_eq!(engines.kv().store().get(b"k").unwrap().version, 6);
}

#[test]
fn test_commit_of_delete_and_lock_ops() {
    let (_temp, engines) = setup_engines();
    let mut state = ApplyState::default();

    propose(
        &engines,
        &mut state,
        vec![
            prewrite(b"del", lock(10, LockOp::Del, b"")),
            prewrite(b"only", lock(10, LockOp::Lock, b"")),
        ],
    );
    propose(&engines, &mut state, vec![commit(b"del", 10, 11), commit(b"only", 10, 11)]);

    let store = engines.kv().store();
    // Delete commits as an empty value carrying its timestamps.
    let del = store.get(b"del").unwrap();
    assert!(del.value.is_empty());
    assert_eq!(del.version, 11);

    assert!(store.get(b"only").is_none());
    let op_lock = store.get(&encode_extra_txn_status_key(b"only", 10)).unwrap();
    assert_eq!(op_lock.version, 11);
    assert!(engines.kv().lock_store().is_empty());
}

#[test]
fn test_commit_with_other_start_ts_keeps_lock() {
    let (_temp, engines) = setup_engines();
    let mut state = ApplyState::default();

    propose(&engines, &mut state, vec![prewrite(b"k", lock(10, LockOp::Put, b"v"))]);
    propose(&engines, &mut state, vec![commit(b"k", 9, 12)]);

    assert_eq!(stored_lock(engines.kv().lock_store(), b"k").unwrap().start_ts, 10);
    assert!(engines.kv().store().get(b"k").is_none());
    assert_eq!(state.applied_index, 2);
}

#[test]
fn test_rollback_removes_lock_and_marks() {
    let (_temp, engines) = setup_engines();
    let mut state = ApplyState::default();

    propose(&engines, &mut state, vec![prewrite(b"k", lock(10, LockOp::Put, b"v"))]);
    propose(
        &engines,
        &mut state,
        vec![Mutation::Rollback {
            key: b"k".to_vec(),
            start_ts: 10,
        }],
    );

    assert!(engines.kv().lock_store().is_empty());
    let marker = engines
        .kv()
        .store()
        .get(&encode_extra_txn_status_key(b"k", 10))
        .unwrap();
    assert_eq!(DbUserMeta::decode(&marker.user_meta).unwrap(), DbUserMeta::new(10, 0));
}

#[test]
fn test_pessimistic_rollback_only_removes_pessimistic_lock() {
    let (_temp, engines) = setup_engines();
    let mut state = ApplyState::default();

    propose(
        &engines,
        &mut state,
        vec![
            Mutation::PessimisticLock {
                key: b"p".to_vec(),
                lock: lock(7, LockOp::Pessimistic, b""),
            },
            prewrite(b"q", lock(7, LockOp::Put, b"v")),
        ],
    );
    propose(
        &engines,
        &mut state,
        vec![
            Mutation::PessimisticRollback {
                key: b"p".to_vec(),
                start_ts: 7,
            },
            Mutation::PessimisticRollback {
                key: b"q".to_vec(),
                start_ts: 7,
            },
        ],
    );

    let locks = engines.kv().lock_store();
    assert!(locks.get(b"p").is_none());
    assert!(locks.get(b"q").is_some());
}

#[test]
fn test_conf_change_only_advances_apply_state() {
    let (_temp, engines) = setup_engines();
    let mut state = ApplyState::default();

    let conf = RaftLogEntry {
        term: 2,
        index: 1,
        entry_type: EntryType::ConfChange,
        data: b"not a command".to_vec(),
    };
    assert!(RaftCmd::from_entry(&conf).unwrap().is_none());
    apply_entry(engines.kv(), REGION, &conf, &mut state).unwrap();

    assert_eq!(state.applied_index, 1);
    let raw = engines.kv().store().get(&apply_state_key(REGION)).unwrap();
    assert_eq!(decode::<ApplyState>(&raw.value).unwrap().applied_index, 1);
    assert!(engines.kv().lock_store().is_empty());
}

#[test]
fn test_undecodable_command_fails_without_writes() {
    let (_temp, engines) = setup_engines();
    let mut state = ApplyState::default();

    let bad = RaftLogEntry {
        term: 1,
        index: 1,
        entry_type: EntryType::Normal,
        data: vec![0xff; 3],
    };
    assert!(apply_entry(engines.kv(), REGION, &bad, &mut state).is_err());
    assert_eq!(state.applied_index, 0);
    assert!(engines.kv().store().get(&apply_state_key(REGION)).is_none());
}

// =============================================================================
// Redo Tests
// =============================================================================

#[test]
fn test_restore_is_idempotent() {
    let locks = LockStore::new();
    let prewrite_entry = entry(1, vec![prewrite(b"a", lock(3, LockOp::Put, b"1"))]);

    restore_applied_entry(&prewrite_entry, None, &locks).unwrap();
    let once = locks.scan(b"", b"");
    restore_applied_entry(&prewrite_entry, None, &locks).unwrap();
    assert_eq!(locks.scan(b"", b""), once);
    assert_eq!(once.len(), 1);

    let commit_entry = entry(2, vec![commit(b"a", 3, 4)]);
    restore_applied_entry(&commit_entry, None, &locks).unwrap();
    restore_applied_entry(&commit_entry, None, &locks).unwrap();
    assert!(locks.is_empty());
}

#[test]
fn test_restore_writes_missing_commit_into_overlay() {
    let (_temp, engines) = setup_engines();
    let locks = LockStore::new();
    locks.writer().put(b"k", &lock(3, LockOp::Put, b"late").encode().unwrap());

    let mut txn = engines.kv().store().begin_read();
    let commit_entry = entry(1, vec![commit(b"k", 3, 4)]);
    restore_applied_entry(&commit_entry, Some(&mut txn), &locks).unwrap();

    let item = txn.get(b"k").unwrap();
    assert_eq!(item.version, 4);
    assert_eq!(item.value, b"late");
    assert!(locks.is_empty());
    // Never reaches the store
    assert!(engines.kv().store().get(b"k").is_none());

    // Second replay finds no lock and changes nothing.
    restore_applied_entry(&commit_entry, Some(&mut txn), &locks).unwrap();
    assert_eq!(txn.overlay_len(), 1);
}

#[test]
fn test_restore_skips_value_already_visible() {
    let (_temp, engines) = setup_engines();
    let mut state = ApplyState::default();
    propose(&engines, &mut state, vec![prewrite(b"k", lock(3, LockOp::Put, b"v"))]);
    let commit_entry = propose(&engines, &mut state, vec![commit(b"k", 3, 4)]);

    // A lagging lock index still holds the lock.
    let locks = LockStore::new();
    locks.writer().put(b"k", &lock(3, LockOp::Put, b"v").encode().unwrap());

    let mut txn = engines.kv().store().begin_read();
    restore_applied_entry(&commit_entry, Some(&mut txn), &locks).unwrap();
    assert_eq!(txn.overlay_len(), 0);
    assert!(locks.is_empty());
}

#[test]
fn test_restore_rollback_marks_overlay() {
    let (_temp, engines) = setup_engines();
    let locks = LockStore::new();
    let mut txn = engines.kv().store().begin_read();

    let rollback = entry(
        1,
        vec![Mutation::Rollback {
            key: b"k".to_vec(),
            start_ts: 8,
        }],
    );
    restore_applied_entry(&rollback, Some(&mut txn), &locks).unwrap();
    restore_applied_entry(&rollback, Some(&mut txn), &locks).unwrap();
    assert_eq!(txn.overlay_len(), 1);
    assert!(txn.get(&encode_extra_txn_status_key(b"k", 8)).is_some());
}

// =============================================================================
// Fetch Tests
// =============================================================================

#[test]
fn test_fetch_entries_range() {
    let (_temp, engines) = setup_engines();
    let entries: Vec<_> = (1..=5).map(|i| entry(i, Vec::new())).collect();
    append(&engines, &entries);

    let (all, size) = fetch_entries_to(engines.raft(), REGION, 1, 6, u64::MAX).unwrap();
    assert_eq!(all, entries);
    assert_eq!(size, entries.iter().map(|e| e.size()).sum::<u64>());

    let (middle, _) = fetch_entries_to(engines.raft(), REGION, 2, 4, u64::MAX).unwrap();
    assert_eq!(middle.iter().map(|e| e.index).collect::<Vec<_>>(), vec![2, 3]);

    let (none, size) = fetch_entries_to(engines.raft(), REGION, 4, 4, u64::MAX).unwrap();
    assert!(none.is_empty());
    assert_eq!(size, 0);
}

#[test]
fn test_fetch_respects_max_size() {
    let (_temp, engines) = setup_engines();
    let entries: Vec<_> = (1..=5).map(|i| entry(i, Vec::new())).collect();
    append(&engines, &entries);

    // Always at least one entry
    let (first, _) = fetch_entries_to(engines.raft(), REGION, 1, 6, 0).unwrap();
    assert_eq!(first.len(), 1);

    let one = entries[0].size();
    let (some, _) = fetch_entries_to(engines.raft(), REGION, 1, 6, one * 2).unwrap();
    assert_eq!(some.len(), 3);
}

#[test]
fn test_fetch_gap_is_not_found() {
    let (_temp, engines) = setup_engines();
    let entries: Vec<_> = [1, 2, 4].iter().map(|&i| entry(i, Vec::new())).collect();
    append(&engines, &entries);

    assert!(matches!(
        fetch_entries_to(engines.raft(), REGION, 1, 5, u64::MAX),
        Err(StoreError::NotFound(_))
    ));
    assert!(matches!(
        fetch_entries_to(engines.raft(), REGION, 0, 2, u64::MAX),
        Err(StoreError::NotFound(_))
    ));
    // Other regions have no entries at all.
    assert!(fetch_entries_to(engines.raft(), 2, 1, 2, u64::MAX).is_err());
}

#[test]
fn test_fetch_after_truncation() {
    let (_temp, engines) = setup_engines();
    let entries: Vec<_> = (1..=4).map(|i| entry(i, Vec::new())).collect();
    append(&engines, &entries);

    let mut wb = WriteBatch::new();
    for index in 1..=2 {
        wb.delete(VersionedKey::unassigned(raft_log_key(REGION, index)));
    }
    engines.write_raft(&wb).unwrap();

    assert!(fetch_entries_to(engines.raft(), REGION, 1, 5, u64::MAX).is_err());
    let (rest, _) = fetch_entries_to(engines.raft(), REGION, 3, 5, u64::MAX).unwrap();
    assert_eq!(rest.len(), 2);
}
