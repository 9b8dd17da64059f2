//! Raftstore Module
//!
//! Glue between applied raft log entries and the storage engines.
//!
//! ## Responsibilities
//! - Buffer the mutations of applied entries and commit them atomically
//! - Build causally consistent region snapshots (lock copy + redo)
//! - Replay applied entries into the lock index
//! - Delete key ranges in idempotent batches
//! - Keep the raft log grouped per region during log engine compaction
//! - Periodically dump the lock index

pub mod apply;
pub mod delete_range;
pub mod dumper;
pub mod log_filter;
pub mod region_snapshot;
pub mod write_batch;

pub use apply::{
    append_entries, apply_entry, fetch_entries_to, restore_applied_entry, Mutation, RaftCmd,
};
pub use delete_range::{delete_range, DeleteRangeStats, DELETE_RANGE_BATCH_SIZE};
pub use dumper::{DumperOptions, LockStoreDumper};
pub use log_filter::{create_raft_log_compaction_filter, raft_log_guard, RaftLogFilter};
pub use region_snapshot::{
    get_applied_idx_term_for_snapshot, get_apply_state, get_region_local_state, RegionSnapshot,
};
pub use write_batch::{BatchEntry, WriteBatch};
