//! Storage Module
//!
//! Persistent, versioned key-value storage and the SST file codec.
//!
//! ## Responsibilities
//! - Multi-version ordered store with atomic updates and pinned snapshots
//! - Durability through a segmented WAL with checkpointing compaction
//! - Compaction filters with guard-based grouping of the rewritten log
//! - Sequential reading of RocksDB block-based SST files
//!
//! ## Read Path
//! ```text
//! ┌──────────────┐  begin_read   ┌──────────────────────────────┐
//! │    Store     │ ────────────► │ ReadTxn (pinned seq, overlay) │
//! │ BTreeMap     │               └──────────────────────────────┘
//! │ key ─► ver ─► records        │ get / scan: overlay merged over
//! └──────┬───────┘               │ the store as of the pinned seq
//!        │ update()
//!        ▼
//! ┌──────────────┐
//! │  WAL segments │ ◄── compact(): checkpoint + drop old segments
//! └──────────────┘
//! ```

pub mod compaction;
pub mod snapshot;
pub mod sstable;
pub mod store;

pub use compaction::{CompactionFilter, CompactionFilterFactory, CompactionStats, Decision, Guard};
pub use snapshot::ReadTxn;
pub use store::{Item, Store, StoreOptions, WriteTxn};
