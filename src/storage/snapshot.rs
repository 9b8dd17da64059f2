//! Snapshot read transactions
//!
//! A `ReadTxn` pins one commit sequence of a `Store`. Later commits are
//! invisible to it for its whole lifetime. It also carries a private overlay:
//! writes made through the transaction are seen only by this transaction and
//! never reach the store.

use std::cmp::Reverse;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::{Result, StoreError};
use crate::keys::VersionedKey;

use super::store::{range_bounds, top_at, Item, Record, Store, VersionChain};

/// Snapshot-isolated read transaction with a private write overlay
pub struct ReadTxn {
    store: Arc<Store>,
    read_seq: u64,
    overlay: BTreeMap<Vec<u8>, VersionChain>,
    released: bool,
}

impl ReadTxn {
    pub(crate) fn new(store: Arc<Store>, read_seq: u64) -> Self {
        Self {
            store,
            read_seq,
            overlay: BTreeMap::new(),
            released: false,
        }
    }

    /// Commit sequence this transaction reads at
    pub fn read_seq(&self) -> u64 {
        self.read_seq
    }

    /// Latest live entry of `key` as seen by this transaction
    pub fn get(&self, key: &[u8]) -> Option<Item> {
        let from_store = self.store.top_raw(key, self.read_seq);
        let from_overlay = self
            .overlay
            .get(key)
            .and_then(|chain| top_at(chain, u64::MAX))
            .map(|(version, record)| (version, record.clone()));
        let (version, record) = newer(from_store, from_overlay)?;
        Item::from_record(key, version, &record)
    }

    /// Like `get`, but a missing key is `NotFound`
    pub fn get_value(&self, key: &[u8]) -> Result<Vec<u8>> {
        self.get(key)
            .map(|item| item.value)
            .ok_or_else(|| StoreError::NotFound(format!("key {:?}", key)))
    }

    /// Latest live entry of every key in `[start, end)`; empty `end` is unbounded
    pub fn scan(&self, start: &[u8], end: &[u8]) -> Vec<Item> {
        let mut tops: BTreeMap<Vec<u8>, (u64, Record)> = self
            .store
            .scan_raw(start, end, self.read_seq)
            .into_iter()
            .map(|(key, version, record)| (key, (version, record)))
            .collect();

        if let Some(bounds) = range_bounds(start, end) {
            for (key, chain) in self.overlay.range::<[u8], _>(bounds) {
                let Some((version, record)) = top_at(chain, u64::MAX) else {
                    continue;
                };
                let candidate = Some((version, record.clone()));
                let merged = newer(tops.remove(key), candidate);
                if let Some(top) = merged {
                    tops.insert(key.clone(), top);
                }
            }
        }

        tops.into_iter()
            .filter_map(|(key, (version, record))| Item::from_record(&key, version, &record))
            .collect()
    }

    /// Write a value into the private overlay
    pub fn set(&mut self, key: &VersionedKey, value: &[u8], user_meta: &[u8]) {
        self.put_overlay(key, Some(value.to_vec()), user_meta);
    }

    /// Write a tombstone into the private overlay
    pub fn delete(&mut self, key: &VersionedKey) {
        self.put_overlay(key, None, &[]);
    }

    fn put_overlay(&mut self, key: &VersionedKey, value: Option<Vec<u8>>, user_meta: &[u8]) {
        let records = self
            .overlay
            .entry(key.user_key.clone())
            .or_default()
            .entry(Reverse(key.version))
            .or_default();
        records.clear();
        records.push(Record {
            seq: self.read_seq,
            value,
            user_meta: user_meta.to_vec(),
        });
    }

    /// Number of keys written through this transaction
    pub fn overlay_len(&self) -> usize {
        self.overlay.len()
    }

    /// Release the pinned sequence
    pub fn release(mut self) {
        self.unpin();
    }

    fn unpin(&mut self) {
        if !self.released {
            self.released = true;
            self.store.unpin(self.read_seq);
        }
    }
}

impl Drop for ReadTxn {
    fn drop(&mut self) {
        self.unpin();
    }
}

/// Higher version wins; the overlay wins a tie
fn newer(store: Option<(u64, Record)>, overlay: Option<(u64, Record)>) -> Option<(u64, Record)> {
    match (store, overlay) {
        (Some(s), Some(o)) => Some(if o.0 >= s.0 { o } else { s }),
        (s, o) => s.or(o),
    }
}
