//! Region and raft metadata records
//!
//! These are the persisted records the core reads and writes; all encode with
//! bincode.

use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::error::Result;

/// Configuration-change and split/merge counters of a region
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegionEpoch {
    /// Bumped on membership changes
    pub conf_ver: u64,
    /// Bumped on split and merge; changes the key range
    pub version: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Peer {
    pub id: u64,
    pub store_id: u64,
}

/// A contiguous key range owned by one replication group
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Region {
    pub id: u64,
    pub start_key: Vec<u8>,
    /// Exclusive; empty means unbounded
    pub end_key: Vec<u8>,
    pub epoch: RegionEpoch,
    pub peers: Vec<Peer>,
}

impl Region {
    pub fn contains(&self, key: &[u8]) -> bool {
        key >= self.start_key.as_slice() && (self.end_key.is_empty() || key < self.end_key.as_slice())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PeerState {
    #[default]
    Normal,
    Applying,
    Tombstone,
}

/// Region descriptor as persisted in the main engine
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegionLocalState {
    pub state: PeerState,
    pub region: Region,
}

/// Apply progress of one region, persisted in the main engine
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplyState {
    pub applied_index: u64,
    pub truncated_index: u64,
    pub truncated_term: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntryType {
    #[default]
    Normal,
    ConfChange,
}

/// A raft log entry as persisted in the log engine
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RaftLogEntry {
    pub term: u64,
    pub index: u64,
    pub entry_type: EntryType,
    /// Encoded `RaftCmd`; empty for leader no-op entries
    pub data: Vec<u8>,
}

impl RaftLogEntry {
    /// Approximate encoded size, used for fetch size limits
    pub fn size(&self) -> u64 {
        (self.data.len() + 24) as u64
    }
}

/// Decode a bincode record
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    Ok(bincode::deserialize(bytes)?)
}

/// Encode a bincode record
pub fn encode<T: Serialize>(msg: &T) -> Result<Vec<u8>> {
    Ok(bincode::serialize(msg)?)
}
