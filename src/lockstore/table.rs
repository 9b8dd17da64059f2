//! LockStore implementation
//!
//! BTreeMap-based lock index with RwLock for concurrency.

use std::collections::BTreeMap;
use std::ops::Bound;

use parking_lot::{RwLock, RwLockWriteGuard};

type LockMap = BTreeMap<Vec<u8>, Vec<u8>>;

/// Ordered in-memory lock index
#[derive(Debug, Default)]
pub struct LockStore {
    data: RwLock<LockMap>,
}

/// Exclusive writer over a `LockStore`
///
/// Holding it blocks every other writer and reader until it is dropped, so a
/// batch applied through one writer is observed all at once.
pub struct LockWriter<'a> {
    guard: RwLockWriteGuard<'a, LockMap>,
}

impl LockWriter<'_> {
    pub fn put(&mut self, key: &[u8], value: &[u8]) {
        self.guard.insert(key.to_vec(), value.to_vec());
    }

    /// Returns whether the key was present
    pub fn delete(&mut self, key: &[u8]) -> bool {
        self.guard.remove(key).is_some()
    }

    pub fn get(&self, key: &[u8]) -> Option<&[u8]> {
        self.guard.get(key).map(Vec::as_slice)
    }
}

impl LockStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn from_map(map: LockMap) -> Self {
        Self {
            data: RwLock::new(map),
        }
    }

    /// Take the exclusive writer
    pub fn writer(&self) -> LockWriter<'_> {
        LockWriter {
            guard: self.data.write(),
        }
    }

    pub fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
        self.data.read().get(key).cloned()
    }

    /// Visit entries in key order starting at `start`, until `f` returns false
    pub fn for_each_from<F>(&self, start: &[u8], mut f: F)
    where
        F: FnMut(&[u8], &[u8]) -> bool,
    {
        let data = self.data.read();
        for (key, value) in data.range::<[u8], _>((Bound::Included(start), Bound::Unbounded)) {
            if !f(key, value) {
                break;
            }
        }
    }

    /// Entries in `[start, end)`; an empty `end` is unbounded
    pub fn scan(&self, start: &[u8], end: &[u8]) -> Vec<(Vec<u8>, Vec<u8>)> {
        let mut out = Vec::new();
        self.for_each_from(start, |key, value| {
            if !end.is_empty() && key >= end {
                return false;
            }
            out.push((key.to_vec(), value.to_vec()));
            true
        });
        out
    }

    /// Private copy of the entries in `[start, end)`, taken under the read lock
    pub fn copy_range(&self, start: &[u8], end: &[u8]) -> LockStore {
        LockStore::from_map(self.scan(start, end).into_iter().collect())
    }

    /// All entries, in key order
    pub(crate) fn snapshot_all(&self) -> Vec<(Vec<u8>, Vec<u8>)> {
        self.data
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.data.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.read().is_empty()
    }
}
