//! Raft log compaction filter
//!
//! Raft log entries are removed by log truncation, never by compaction, so
//! the filter keeps everything. Its guard keeps each region's log entries
//! together when the log engine rewrites its WAL.

use crate::keys::{LOCAL_PREFIX, REGION_RAFT_PREFIX, REGION_RAFT_PREFIX_LEN};
use crate::storage::{CompactionFilter, Decision, Guard};

/// Minimum bytes of one region's log kept in a single checkpoint record
pub const RAFT_LOG_GUARD_MIN_SIZE: usize = 1024 * 1024;

/// `LOCAL_PREFIX, REGION_RAFT_PREFIX, region_id(8)` groups one region
pub fn raft_log_guard() -> Guard {
    Guard {
        prefix: vec![LOCAL_PREFIX, REGION_RAFT_PREFIX],
        match_len: REGION_RAFT_PREFIX_LEN,
        min_size: RAFT_LOG_GUARD_MIN_SIZE,
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct RaftLogFilter;

impl CompactionFilter for RaftLogFilter {
    fn filter(&self, _key: &[u8], _value: &[u8], _user_meta: &[u8]) -> Decision {
        Decision::Keep
    }

    fn guards(&self) -> Vec<Guard> {
        vec![raft_log_guard()]
    }
}

/// Filter factory registered on the log engine
pub fn create_raft_log_compaction_filter(
    _target_level: usize,
    _start_key: &[u8],
    _end_key: &[u8],
) -> Box<dyn CompactionFilter> {
    Box::new(RaftLogFilter)
}
