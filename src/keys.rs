//! Key layout
//!
//! Versioned user keys and the local key space used for raft metadata.
//!
//! ## Local keys
//! ```text
//! raft log:     0x01 0x02 | region_id (8, BE) | 0x01 | log index (8, BE)
//! raft state:   0x01 0x02 | region_id (8, BE) | 0x02
//! apply state:  0x01 0x02 | region_id (8, BE) | 0x03
//! region state: 0x01 0x03 | region_id (8, BE) | 0x01
//! ```
//! Big-endian ids keep every key of one region contiguous and log entries in
//! index order.

use std::cmp::Ordering;

use bytes::{Buf, BufMut};

/// Version sentinel: "not assigned yet, take the engine's next write version"
pub const KV_TS: u64 = 0;

pub const LOCAL_PREFIX: u8 = 0x01;
pub const REGION_RAFT_PREFIX: u8 = 0x02;
pub const REGION_META_PREFIX: u8 = 0x03;

pub const RAFT_LOG_SUFFIX: u8 = 0x01;
pub const RAFT_STATE_SUFFIX: u8 = 0x02;
pub const APPLY_STATE_SUFFIX: u8 = 0x03;
pub const REGION_STATE_SUFFIX: u8 = 0x01;

/// `LOCAL_PREFIX + REGION_RAFT_PREFIX + region_id`
pub const REGION_RAFT_PREFIX_LEN: usize = 10;

/// A user key plus a logical timestamp
///
/// Orders by user key ascending, then version descending, so the newest
/// version of a key is met first on read paths.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VersionedKey {
    pub user_key: Vec<u8>,
    pub version: u64,
}

impl VersionedKey {
    pub fn new(user_key: impl Into<Vec<u8>>, version: u64) -> Self {
        Self {
            user_key: user_key.into(),
            version,
        }
    }

    /// A key whose version is assigned at commit time
    pub fn unassigned(user_key: impl Into<Vec<u8>>) -> Self {
        Self::new(user_key, KV_TS)
    }

    pub fn is_unassigned(&self) -> bool {
        self.version == KV_TS
    }

    /// Encoded length: user key plus an 8-byte version
    pub fn len(&self) -> usize {
        self.user_key.len() + 8
    }

    pub fn is_empty(&self) -> bool {
        self.user_key.is_empty()
    }
}

impl Ord for VersionedKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.user_key
            .cmp(&other.user_key)
            .then_with(|| other.version.cmp(&self.version))
    }
}

impl PartialOrd for VersionedKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

fn region_raft_key(region_id: u64, suffix: u8, extra: usize) -> Vec<u8> {
    let mut key = Vec::with_capacity(REGION_RAFT_PREFIX_LEN + 1 + extra);
    key.put_u8(LOCAL_PREFIX);
    key.put_u8(REGION_RAFT_PREFIX);
    key.put_u64(region_id);
    key.put_u8(suffix);
    key
}

/// Key of log entry `index` of `region_id`
pub fn raft_log_key(region_id: u64, index: u64) -> Vec<u8> {
    let mut key = region_raft_key(region_id, RAFT_LOG_SUFFIX, 8);
    key.put_u64(index);
    key
}

pub fn raft_state_key(region_id: u64) -> Vec<u8> {
    region_raft_key(region_id, RAFT_STATE_SUFFIX, 0)
}

pub fn apply_state_key(region_id: u64) -> Vec<u8> {
    region_raft_key(region_id, APPLY_STATE_SUFFIX, 0)
}

pub fn region_state_key(region_id: u64) -> Vec<u8> {
    let mut key = Vec::with_capacity(11);
    key.put_u8(LOCAL_PREFIX);
    key.put_u8(REGION_META_PREFIX);
    key.put_u64(region_id);
    key.put_u8(REGION_STATE_SUFFIX);
    key
}

/// Lower bound of all region state keys
pub fn region_meta_min_key() -> Vec<u8> {
    vec![LOCAL_PREFIX, REGION_META_PREFIX]
}

/// Upper bound (exclusive) of all region state keys
pub fn region_meta_max_key() -> Vec<u8> {
    vec![LOCAL_PREFIX, REGION_META_PREFIX + 1]
}

/// Region id of a region state key
pub fn decode_region_state_key(key: &[u8]) -> Option<u64> {
    if key.len() != 11
        || key[0] != LOCAL_PREFIX
        || key[1] != REGION_META_PREFIX
        || key[10] != REGION_STATE_SUFFIX
    {
        return None;
    }
    Some((&key[2..10]).get_u64())
}

/// Log index of a raft log key
pub fn decode_raft_log_key(key: &[u8]) -> Option<(u64, u64)> {
    if key.len() != REGION_RAFT_PREFIX_LEN + 9
        || key[0] != LOCAL_PREFIX
        || key[1] != REGION_RAFT_PREFIX
        || key[10] != RAFT_LOG_SUFFIX
    {
        return None;
    }
    let region_id = (&key[2..10]).get_u64();
    let index = (&key[11..19]).get_u64();
    Some((region_id, index))
}
