//! Compaction hooks
//!
//! A `CompactionFilter` is consulted for settled live entries while a store
//! compacts. Its guards describe key prefixes whose entries should be grouped
//! together in the rewritten WAL: entries sharing the first `match_len` bytes
//! of a guard prefix stay in one record until that record reaches `min_size`.

use crate::wal::Operation;

use super::store::DataMap;

/// Upper bound on one checkpoint record when no guard asks for a split
const CHECKPOINT_BATCH_BYTES: usize = 4 * 1024 * 1024;

/// What compaction does with an entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Keep,
    /// Replace the value with a tombstone
    MarkTombstone,
    /// Remove the entry
    Drop,
}

/// Placement hint for entries under `prefix`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Guard {
    pub prefix: Vec<u8>,
    /// Bytes of the key that identify one group
    pub match_len: usize,
    /// Minimum bytes in a group's record before a boundary may split it
    pub min_size: usize,
}

impl Guard {
    fn group_of<'a>(&self, key: &'a [u8]) -> Option<&'a [u8]> {
        if key.starts_with(&self.prefix) {
            Some(&key[..self.match_len.min(key.len())])
        } else {
            None
        }
    }
}

pub trait CompactionFilter: Send {
    fn filter(&self, key: &[u8], value: &[u8], user_meta: &[u8]) -> Decision;

    fn guards(&self) -> Vec<Guard>;
}

/// Builds a filter for one compaction: `(target_level, start_key, end_key)`
pub type CompactionFilterFactory = fn(usize, &[u8], &[u8]) -> Box<dyn CompactionFilter>;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CompactionStats {
    /// Superseded records removed from version chains
    pub records_pruned: usize,
    /// Keys removed because a tombstone shadowed them for every reader
    pub keys_dropped: usize,
    /// Entries changed by the compaction filter
    pub filtered: usize,
    /// Records written to the checkpoint
    pub batches: usize,
}

/// Newest record of every version, split into WAL records along guard groups
pub(crate) fn checkpoint_batches(data: &DataMap, guards: &[Guard]) -> Vec<Vec<Operation>> {
    let mut batches = Vec::new();
    let mut current: Vec<Operation> = Vec::new();
    let mut current_bytes = 0usize;
    let mut current_group: Option<(usize, Vec<u8>)> = None;

    for (key, chain) in data {
        let group = guards
            .iter()
            .enumerate()
            .find_map(|(i, g)| g.group_of(key).map(|prefix| (i, prefix.to_vec())));

        let boundary = group != current_group;
        let min_size = current_group
            .as_ref()
            .map(|(i, _)| guards[*i].min_size)
            .unwrap_or(0);
        let split = !current.is_empty()
            && ((boundary && current_bytes >= min_size) || current_bytes >= CHECKPOINT_BATCH_BYTES);
        if split {
            batches.push(std::mem::take(&mut current));
            current_bytes = 0;
        }
        if boundary {
            current_group = group;
        }

        for (version, records) in chain {
            let Some(record) = records.last() else {
                continue;
            };
            let op = match &record.value {
                Some(value) => Operation::Put {
                    key: key.clone(),
                    version: version.0,
                    value: value.clone(),
                    user_meta: record.user_meta.clone(),
                },
                None => Operation::Delete {
                    key: key.clone(),
                    version: version.0,
                    user_meta: record.user_meta.clone(),
                },
            };
            current_bytes += key.len() + record.value.as_ref().map_or(0, |v| v.len()) + 8;
            current.push(op);
        }
    }
    if !current.is_empty() {
        batches.push(current);
    }
    batches
}
