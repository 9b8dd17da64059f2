//! Tests for the versioned store
//!
//! These tests verify:
//! - Atomic updates and version ordering
//! - Tombstones hide older versions
//! - Read transactions are pinned and their overlay stays private
//! - Reopen recovers every committed update
//! - Compaction respects pinned readers and the compaction filter

use std::path::{Path, PathBuf};
use std::sync::Arc;

use regionstore::keys::VersionedKey;
use regionstore::storage::{CompactionFilter, Decision, Guard, Store, StoreOptions};
use regionstore::{StoreError, WalSyncStrategy};
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

fn setup_temp_dir() -> (TempDir, PathBuf) {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("store");
    (temp_dir, path)
}

fn test_options() -> StoreOptions {
    StoreOptions {
        sync_strategy: WalSyncStrategy::EveryWrite,
        ..StoreOptions::default()
    }
}

fn open_store(path: &Path) -> Arc<Store> {
    Arc::new(Store::open(path, test_options()).unwrap())
}

fn put(store: &Store, key: &str, version: u64, value: &str) {
    store
        .update(|txn| {
            txn.set(&VersionedKey::new(key, version), value.as_bytes(), &[]);
            Ok(())
        })
        .unwrap();
}

fn delete(store: &Store, key: &str, version: u64) {
    store
        .update(|txn| {
            txn.delete(&VersionedKey::new(key, version), &[]);
            Ok(())
        })
        .unwrap();
}

fn value_of(store: &Store, key: &str) -> Option<String> {
    store
        .get(key.as_bytes())
        .map(|item| String::from_utf8(item.value).unwrap())
}

// =============================================================================
// Update Tests
// =============================================================================

#[test]
fn test_update_is_atomic() {
    let (_temp, path) = setup_temp_dir();
    let store = open_store(&path);

    store
        .update(|txn| {
            txn.set(&VersionedKey::new("a", 1), b"1", &[]);
            txn.set(&VersionedKey::new("b", 1), b"2", b"meta");
            Ok(())
        })
        .unwrap();
    assert_eq!(store.sequence(), 1);
    assert_eq!(store.get(b"b").unwrap().user_meta, b"meta");

    // A failing closure commits nothing.
    let result = store.update(|txn| {
        txn.set(&VersionedKey::new("c", 1), b"3", &[]);
        Err(StoreError::Engine("abort".into()))
    });
    assert!(result.is_err());
    assert!(store.get(b"c").is_none());
    assert_eq!(store.sequence(), 1);
}

#[test]
fn test_newest_version_wins() {
    let (_temp, path) = setup_temp_dir();
    let store = open_store(&path);

    put(&store, "k", 5, "five");
    put(&store, "k", 3, "three");
    let item = store.get(b"k").unwrap();
    assert_eq!(item.version, 5);
    assert_eq!(item.value, b"five");
    assert_eq!(store.max_version(), 5);

    // Rewriting the same version replaces it.
    put(&store, "k", 5, "FIVE");
    assert_eq!(value_of(&store, "k").as_deref(), Some("FIVE"));
}

#[test]
fn test_tombstone_hides_older_versions() {
    let (_temp, path) = setup_temp_dir();
    let store = open_store(&path);

    put(&store, "k", 1, "v1");
    delete(&store, "k", 2);
    assert!(store.get(b"k").is_none());

    put(&store, "k", 3, "v3");
    assert_eq!(value_of(&store, "k").as_deref(), Some("v3"));
}

#[test]
fn test_scan_range() {
    let (_temp, path) = setup_temp_dir();
    let store = open_store(&path);

    for key in ["a", "b", "c", "d"] {
        put(&store, key, 1, key);
    }
    delete(&store, "c", 2);

    let keys: Vec<_> = store.scan(b"b", b"d").into_iter().map(|i| i.key).collect();
    assert_eq!(keys, vec![b"b".to_vec()]);

    // Empty end is unbounded.
    let keys: Vec<_> = store.scan(b"b", b"").into_iter().map(|i| i.key).collect();
    assert_eq!(keys, vec![b"b".to_vec(), b"d".to_vec()]);

    assert!(store.scan(b"d", b"a").is_empty());
}

// =============================================================================
// Read Transaction Tests
// =============================================================================

#[test]
fn test_read_txn_is_pinned() {
    let (_temp, path) = setup_temp_dir();
    let store = open_store(&path);

    put(&store, "k", 1, "old");
    let txn = store.begin_read();
    assert_eq!(store.active_readers(), 1);

    put(&store, "k", 2, "new");
    put(&store, "other", 1, "x");

    assert_eq!(txn.get(b"k").unwrap().value, b"old");
    assert!(txn.get(b"other").is_none());
    assert!(matches!(txn.get_value(b"other"), Err(StoreError::NotFound(_))));
    assert_eq!(txn.scan(b"", b"").len(), 1);

    txn.release();
    assert_eq!(store.active_readers(), 0);
}

#[test]
fn test_overlay_is_private() {
    let (_temp, path) = setup_temp_dir();
    let store = open_store(&path);

    put(&store, "k", 1, "stored");
    let mut txn = store.begin_read();
    txn.set(&VersionedKey::new("k", 2), b"overlay", &[]);
    txn.set(&VersionedKey::new("j", 1), b"only-here", &[]);

    assert_eq!(txn.get(b"k").unwrap().value, b"overlay");
    assert_eq!(txn.overlay_len(), 2);
    let keys: Vec<_> = txn.scan(b"", b"").into_iter().map(|i| i.key).collect();
    assert_eq!(keys, vec![b"j".to_vec(), b"k".to_vec()]);

    // Never visible outside the transaction
    assert_eq!(value_of(&store, "k").as_deref(), Some("stored"));
    assert!(store.get(b"j").is_none());

    // An overlay tombstone hides the stored version.
    txn.delete(&VersionedKey::new("k", 3));
    assert!(txn.get(b"k").is_none());
}

#[test]
fn test_dropped_txn_unpins() {
    let (_temp, path) = setup_temp_dir();
    let store = open_store(&path);
    {
        let _a = store.begin_read();
        let _b = store.begin_read();
        assert_eq!(store.active_readers(), 2);
    }
    assert_eq!(store.active_readers(), 0);
}

// =============================================================================
// Recovery Tests
// =============================================================================

#[test]
fn test_reopen_recovers_updates() {
    let (_temp, path) = setup_temp_dir();
    {
        let store = open_store(&path);
        put(&store, "a", 1, "1");
        put(&store, "b", 7, "2");
        delete(&store, "a", 2);
        store.sync().unwrap();
    }

    let store = open_store(&path);
    assert!(store.get(b"a").is_none());
    assert_eq!(value_of(&store, "b").as_deref(), Some("2"));
    assert_eq!(store.sequence(), 3);
    assert_eq!(store.max_version(), 7);
}

// =============================================================================
// Compaction Tests
// =============================================================================

#[test]
fn test_compaction_drops_shadowed_keys() {
    let (_temp, path) = setup_temp_dir();
    {
        let store = open_store(&path);
        put(&store, "gone", 1, "x");
        delete(&store, "gone", 2);
        put(&store, "kept", 1, "a");
        put(&store, "kept", 1, "b");

        let stats = store.compact().unwrap();
        assert_eq!(stats.keys_dropped, 1);
        assert_eq!(stats.records_pruned, 1);
        assert_eq!(store.key_count(), 1);
    }

    // The rewritten WAL recovers the compacted state.
    let store = open_store(&path);
    assert_eq!(store.key_count(), 1);
    assert_eq!(value_of(&store, "kept").as_deref(), Some("b"));
}

#[test]
fn test_compaction_keeps_pinned_view() {
    let (_temp, path) = setup_temp_dir();
    let store = open_store(&path);

    put(&store, "k", 1, "old");
    let txn = store.begin_read();
    put(&store, "k", 1, "new");
    delete(&store, "j", 1);

    let stats = store.compact().unwrap();
    assert_eq!(stats.records_pruned, 0);
    assert_eq!(txn.get(b"k").unwrap().value, b"old");
    assert_eq!(value_of(&store, "k").as_deref(), Some("new"));
    drop(txn);

    let stats = store.compact().unwrap();
    assert_eq!(stats.records_pruned, 1);
    assert_eq!(stats.keys_dropped, 1);
}

struct DropPrefix;

impl CompactionFilter for DropPrefix {
    fn filter(&self, key: &[u8], _value: &[u8], _user_meta: &[u8]) -> Decision {
        if key.starts_with(b"tmp/") {
            Decision::Drop
        } else if key.starts_with(b"old/") {
            Decision::MarkTombstone
        } else {
            Decision::Keep
        }
    }

    fn guards(&self) -> Vec<Guard> {
        vec![Guard {
            prefix: Vec::new(),
            match_len: 1,
            min_size: 1,
        }]
    }
}

fn drop_prefix_filter(_level: usize, _start: &[u8], _end: &[u8]) -> Box<dyn CompactionFilter> {
    Box::new(DropPrefix)
}

#[test]
fn test_compaction_filter_decisions() {
    let (_temp, path) = setup_temp_dir();
    let options = StoreOptions {
        compaction_filter: Some(drop_prefix_filter),
        ..test_options()
    };
    let store = Store::open(&path, options).unwrap();

    put(&store, "tmp/a", 1, "x");
    put(&store, "old/a", 1, "y");
    put(&store, "live", 1, "z");

    let stats = store.compact().unwrap();
    assert_eq!(stats.filtered, 2);
    assert!(store.get(b"tmp/a").is_none());
    assert!(store.get(b"old/a").is_none());
    assert_eq!(value_of(&store, "live").as_deref(), Some("z"));
    // One checkpoint batch per first-byte group
    assert!(stats.batches >= 2);
}
