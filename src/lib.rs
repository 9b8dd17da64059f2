//! # regionstore
//!
//! Storage core of a replicated key-value node:
//! - Atomic write batches spanning the main engine and the lock index
//! - Causally consistent region snapshots (lock copy + log redo)
//! - Idempotent batched range delete
//! - Segmented WALs with crash recovery and checkpointing compaction
//! - A reader (and writer) for RocksDB block-based SST files
//!
//! ## Architecture Overview
//!
//! ```text
//!        applied raft log entries
//!                  │
//! ┌────────────────▼────────────────────────────────────────────┐
//! │                 raftstore (WriteBatch, apply)                │
//! └───────┬──────────────────────────────┬──────────────────────┘
//!         │ commit_to_main               │ commit_to_log
//! ┌───────▼──────────────────────┐ ┌─────▼──────────────────────┐
//! │ KvEngine                     │ │ Log engine                 │
//! │  ┌─────────┐  ┌────────────┐ │ │  ┌─────────┐               │
//! │  │  Store  │  │ LockStore  │ │ │  │  Store  │ raft log,     │
//! │  │ (MVCC)  │  │ (RwLock)   │ │ │  │         │ raft state    │
//! │  └────┬────┘  └─────┬──────┘ │ │  └────┬────┘               │
//! └───────┼─────────────┼────────┘ └───────┼────────────────────┘
//!         ▼             ▼                  ▼
//!     kv/*.wal    lockstore.dump       raft/*.wal
//!
//! RegionSnapshot = pinned ReadTxn + lock copy + redo from the log engine
//! SstFileIterator = independent path over external .sst files
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod config;
pub mod error;

pub mod keys;
pub mod meta;
pub mod mvcc;

pub mod engine;
pub mod lockstore;
pub mod raftstore;
pub mod storage;
pub mod wal;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use config::{Config, WalSyncStrategy};
pub use engine::{Engines, KvEngine};
pub use error::{Result, StoreError};
pub use keys::{VersionedKey, KV_TS};
pub use lockstore::LockStore;
pub use raftstore::{RegionSnapshot, WriteBatch};
pub use storage::sstable::{InternalKey, SstFileIterator};
pub use storage::{ReadTxn, Store};

// =============================================================================
// Version Info
// =============================================================================

/// Current version of regionstore
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
