//! MVCC encodings shared by the write path and the redo path
//!
//! ## User meta (main engine)
//! ```text
//! ┌──────────────────┬───────────────────┐
//! │ start_ts (8, LE) │ commit_ts (8, LE) │
//! └──────────────────┴───────────────────┘
//! ```
//! ## Lock user meta (lock index entries inside a WriteBatch)
//! A single marker byte: `LOCK_USER_META_NONE` or `LOCK_USER_META_DELETE`.

use bytes::{Buf, BufMut};
use serde::{Deserialize, Serialize};

use crate::error::{Result, StoreError};

pub const LOCK_USER_META_NONE_BYTE: u8 = 0;
pub const LOCK_USER_META_DELETE_BYTE: u8 = 2;

pub const LOCK_USER_META_NONE: [u8; 1] = [LOCK_USER_META_NONE_BYTE];
pub const LOCK_USER_META_DELETE: [u8; 1] = [LOCK_USER_META_DELETE_BYTE];

pub const DB_USER_META_LEN: usize = 16;

/// Start and commit timestamps attached to a main engine entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DbUserMeta {
    pub start_ts: u64,
    pub commit_ts: u64,
}

impl DbUserMeta {
    pub fn new(start_ts: u64, commit_ts: u64) -> Self {
        Self { start_ts, commit_ts }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(DB_USER_META_LEN);
        buf.put_u64_le(self.start_ts);
        buf.put_u64_le(self.commit_ts);
        buf
    }

    pub fn decode(mut bytes: &[u8]) -> Result<Self> {
        if bytes.len() != DB_USER_META_LEN {
            return Err(StoreError::Corruption(format!(
                "user meta must be {} bytes, got {}",
                DB_USER_META_LEN,
                bytes.len()
            )));
        }
        let start_ts = bytes.get_u64_le();
        let commit_ts = bytes.get_u64_le();
        Ok(Self { start_ts, commit_ts })
    }
}

/// Key recording the status (rollback, op-lock) of the write at `start_ts`
///
/// `key + BE(!start_ts)` with the first byte bumped by one, which moves the
/// record out of the key space of ordinary data.
pub fn encode_extra_txn_status_key(key: &[u8], start_ts: u64) -> Vec<u8> {
    let mut buf = Vec::with_capacity(key.len() + 8);
    buf.extend_from_slice(key);
    buf.put_u64(!start_ts);
    buf[0] = buf[0].wrapping_add(1);
    buf
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LockOp {
    Put,
    Del,
    /// Lock-only: nothing to write on commit except the op-lock record
    Lock,
    /// Pessimistic lock taken before prewrite
    Pessimistic,
}

/// A pending transactional lock as stored in the lock index
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lock {
    pub start_ts: u64,
    pub primary: Vec<u8>,
    pub ttl: u64,
    pub op: LockOp,
    pub value: Vec<u8>,
}

impl Lock {
    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        Ok(bincode::deserialize(bytes)?)
    }
}
