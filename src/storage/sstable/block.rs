//! Prefix-compressed blocks
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │ entry: shared (v32) │ non_shared (v32) │ value_len (v32)      │
//! │        key delta (non_shared bytes) │ value (value_len bytes) │
//! ├──────────────────────────────────────────────────────────────┤
//! │ ... more entries ...                                          │
//! ├──────────────────────────────────────────────────────────────┤
//! │ restart offsets: u32 LE × num_restarts                        │
//! │ packed num_restarts: u32 LE (bit 31 = hash index present)     │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! An entry at a restart point stores its full key (`shared == 0`).

use bytes::{Buf, BufMut};

use crate::error::{Result, StoreError};

use super::format::{decode_varint32, put_varint32};

const NUM_RESTARTS_MASK: u32 = (1 << 31) - 1;
const HASH_INDEX_FLAG: u32 = 1 << 31;

// =============================================================================
// Block Iterator
// =============================================================================

/// Forward cursor over one block
///
/// The cursor owns its buffer. `take_buffer` hands the allocation back so the
/// next block can be decoded into it.
#[derive(Debug, Default)]
pub struct BlockIter {
    data: Vec<u8>,
    /// Where the restart array starts; entries live in `data[..restarts_offset]`
    restarts_offset: usize,
    num_restarts: u32,
    /// Offset of the next entry to decode
    offset: usize,
    key: Vec<u8>,
    value_start: usize,
    value_end: usize,
    valid: bool,
}

impl BlockIter {
    pub fn new(data: Vec<u8>) -> Result<Self> {
        let mut iter = Self::default();
        iter.reset(data)?;
        Ok(iter)
    }

    /// Point the cursor at a new block, positioned before its first entry
    pub fn reset(&mut self, data: Vec<u8>) -> Result<()> {
        self.data = data;
        self.valid = false;
        self.key.clear();
        self.restarts_offset = 0;
        self.num_restarts = 0;
        self.offset = 0;

        if self.data.len() < 4 {
            return Err(StoreError::Corruption(format!(
                "block of {} bytes has no restart count",
                self.data.len()
            )));
        }
        let mut tail = &self.data[self.data.len() - 4..];
        let packed = tail.get_u32_le();
        if packed & HASH_INDEX_FLAG != 0 {
            return Err(StoreError::UnsupportedAlgorithm("data block hash index".into()));
        }
        let num_restarts = packed & NUM_RESTARTS_MASK;
        let restart_bytes = (num_restarts as usize)
            .checked_mul(4)
            .and_then(|n| n.checked_add(4))
            .filter(|n| *n <= self.data.len())
            .ok_or_else(|| {
                StoreError::Corruption(format!("restart array of {} entries overflows block", num_restarts))
            })?;

        self.num_restarts = num_restarts;
        self.restarts_offset = self.data.len() - restart_bytes;
        Ok(())
    }

    /// Return to the position before the first entry
    pub fn rewind(&mut self) {
        self.offset = 0;
        self.valid = false;
        self.key.clear();
    }

    /// Decode the next entry
    pub fn next(&mut self) -> Result<()> {
        if self.at_end() {
            self.valid = false;
            return Ok(());
        }
        let entries = &self.data[..self.restarts_offset];
        let mut pos = self.offset;
        let mut header = [0u32; 3];
        for field in header.iter_mut() {
            let (value, n) = decode_varint32(&entries[pos..])
                .ok_or_else(|| StoreError::Corruption(format!("bad entry header at {}", self.offset)))?;
            *field = value;
            pos += n;
        }
        let [shared, non_shared, value_len] = header.map(|v| v as usize);

        if shared > self.key.len() {
            return Err(StoreError::Corruption(format!(
                "entry at {} shares {} bytes of a {} byte key",
                self.offset,
                shared,
                self.key.len()
            )));
        }
        let key_end = pos + non_shared;
        let value_end = key_end + value_len;
        if value_end > entries.len() {
            return Err(StoreError::Corruption(format!(
                "entry at {} runs past the restart array",
                self.offset
            )));
        }

        self.key.truncate(shared);
        self.key.extend_from_slice(&entries[pos..key_end]);
        self.value_start = key_end;
        self.value_end = value_end;
        self.offset = value_end;
        self.valid = true;
        Ok(())
    }

    /// No entries remain after the current one
    pub fn at_end(&self) -> bool {
        self.offset >= self.restarts_offset
    }

    pub fn valid(&self) -> bool {
        self.valid
    }

    pub fn key(&self) -> &[u8] {
        &self.key
    }

    pub fn value(&self) -> &[u8] {
        &self.data[self.value_start..self.value_end]
    }

    pub fn num_restarts(&self) -> u32 {
        self.num_restarts
    }

    /// Take the block buffer for reuse, leaving the cursor empty
    pub fn take_buffer(&mut self) -> Vec<u8> {
        self.valid = false;
        self.restarts_offset = 0;
        self.offset = 0;
        std::mem::take(&mut self.data)
    }
}

// =============================================================================
// Block Builder
// =============================================================================

/// Builds one block from keys added in order
#[derive(Debug)]
pub struct BlockBuilder {
    buffer: Vec<u8>,
    restarts: Vec<u32>,
    restart_interval: usize,
    /// Entries since the last restart point
    counter: usize,
    last_key: Vec<u8>,
    entries: usize,
}

impl BlockBuilder {
    pub fn new(restart_interval: usize) -> Self {
        Self {
            buffer: Vec::new(),
            restarts: vec![0],
            restart_interval: restart_interval.max(1),
            counter: 0,
            last_key: Vec::new(),
            entries: 0,
        }
    }

    pub fn add(&mut self, key: &[u8], value: &[u8]) {
        let shared = if self.counter < self.restart_interval {
            self.last_key
                .iter()
                .zip(key)
                .take_while(|(a, b)| a == b)
                .count()
        } else {
            self.restarts.push(self.buffer.len() as u32);
            self.counter = 0;
            0
        };

        put_varint32(&mut self.buffer, shared as u32);
        put_varint32(&mut self.buffer, (key.len() - shared) as u32);
        put_varint32(&mut self.buffer, value.len() as u32);
        self.buffer.extend_from_slice(&key[shared..]);
        self.buffer.extend_from_slice(value);

        self.last_key.clear();
        self.last_key.extend_from_slice(key);
        self.counter += 1;
        self.entries += 1;
    }

    /// Append the restart array and return the block, leaving the builder empty
    pub fn finish(&mut self) -> Vec<u8> {
        let mut block = std::mem::take(&mut self.buffer);
        for restart in &self.restarts {
            block.put_u32_le(*restart);
        }
        block.put_u32_le(self.restarts.len() as u32);

        self.restarts = vec![0];
        self.counter = 0;
        self.last_key.clear();
        self.entries = 0;
        block
    }

    /// Bytes the block would occupy if finished now
    pub fn estimated_size(&self) -> usize {
        self.buffer.len() + 4 * self.restarts.len() + 4
    }

    pub fn is_empty(&self) -> bool {
        self.entries == 0
    }

    pub fn last_key(&self) -> &[u8] {
        &self.last_key
    }
}
