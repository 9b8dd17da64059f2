//! Tests for lock index dump files
//!
//! These tests verify:
//! - Dump and load preserve every lock and the watermark
//! - A missing dump is not an error
//! - Truncated or damaged dumps are rejected, including bogus length headers

use std::fs;
use std::path::PathBuf;

use regionstore::lockstore::DUMP_TRAILER_LEN;
use regionstore::{LockStore, StoreError};
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

fn setup_temp_dump() -> (TempDir, PathBuf) {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("lockstore.dump");
    (temp_dir, path)
}

fn populated(count: usize) -> LockStore {
    let locks = LockStore::new();
    {
        let mut writer = locks.writer();
        for i in 0..count {
            writer.put(format!("key{:04}", i).as_bytes(), format!("lock{}", i).as_bytes());
        }
    }
    locks
}

// =============================================================================
// Round Trip Tests
// =============================================================================

#[test]
fn test_dump_and_load() {
    let (_temp, path) = setup_temp_dump();
    let locks = populated(100);

    let written = locks.dump_to_file(&path, (3 << 32) | 1234).unwrap();
    assert_eq!(written, 100);
    // No temporary file left behind
    assert!(!path.with_extension("dump.tmp").exists());

    let (loaded, watermark) = LockStore::load_from_file(&path).unwrap().unwrap();
    assert_eq!(watermark, (3 << 32) | 1234);
    assert_eq!(loaded.len(), 100);
    assert_eq!(loaded.scan(b"", b""), locks.scan(b"", b""));
    assert_eq!(loaded.get(b"key0042").unwrap(), b"lock42");
}

#[test]
fn test_dump_empty_store() {
    let (_temp, path) = setup_temp_dump();
    LockStore::new().dump_to_file(&path, 0).unwrap();

    let (loaded, watermark) = LockStore::load_from_file(&path).unwrap().unwrap();
    assert!(loaded.is_empty());
    assert_eq!(watermark, 0);
}

#[test]
fn test_dump_replaces_previous() {
    let (_temp, path) = setup_temp_dump();
    populated(10).dump_to_file(&path, 1).unwrap();
    populated(3).dump_to_file(&path, 2).unwrap();

    let (loaded, watermark) = LockStore::load_from_file(&path).unwrap().unwrap();
    assert_eq!(loaded.len(), 3);
    assert_eq!(watermark, 2);
}

#[test]
fn test_missing_dump_is_none() {
    let (_temp, path) = setup_temp_dump();
    assert!(LockStore::load_from_file(&path).unwrap().is_none());
}

// =============================================================================
// Corruption Tests
// =============================================================================

#[test]
fn test_flipped_payload_byte_is_corruption() {
    let (_temp, path) = setup_temp_dump();
    populated(5).dump_to_file(&path, 7).unwrap();

    let mut bytes = fs::read(&path).unwrap();
    bytes[20] ^= 0xff;
    fs::write(&path, bytes).unwrap();

    assert!(matches!(
        LockStore::load_from_file(&path),
        Err(StoreError::Corruption(_))
    ));
}

#[test]
fn test_truncated_dump_is_corruption() {
    let (_temp, path) = setup_temp_dump();
    populated(5).dump_to_file(&path, 7).unwrap();

    let bytes = fs::read(&path).unwrap();
    fs::write(&path, &bytes[..bytes.len() - DUMP_TRAILER_LEN / 2]).unwrap();
    assert!(matches!(
        LockStore::load_from_file(&path),
        Err(StoreError::Corruption(_))
    ));

    fs::write(&path, &bytes[..4]).unwrap();
    assert!(matches!(
        LockStore::load_from_file(&path),
        Err(StoreError::Corruption(_))
    ));
}

#[test]
fn test_oversized_payload_length_is_corruption() {
    let (_temp, path) = setup_temp_dump();

    for declared in [u64::MAX, u64::MAX - 19, 1 << 40] {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&declared.to_le_bytes());
        bytes.extend_from_slice(&0u32.to_le_bytes());
        bytes.extend_from_slice(&7u64.to_le_bytes());
        fs::write(&path, &bytes).unwrap();

        assert!(matches!(
            LockStore::load_from_file(&path),
            Err(StoreError::Corruption(_))
        ));
    }
}
