//! WAL record definitions
//!
//! Defines the structure of a single WAL record and its wire encoding.

use bytes::{Buf, BufMut};
use serde::{Deserialize, Serialize};

use crate::error::{Result, StoreError};

/// Header size: LSN (8) + CRC (4) + Len (4) = 16 bytes
pub const HEADER_SIZE: usize = 16;

/// Operations that can be logged
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operation {
    /// Write a value (and user meta) at a version
    Put {
        key: Vec<u8>,
        version: u64,
        value: Vec<u8>,
        user_meta: Vec<u8>,
    },

    /// Write a tombstone at a version
    Delete {
        key: Vec<u8>,
        version: u64,
        user_meta: Vec<u8>,
    },
}

impl Operation {
    pub fn key(&self) -> &[u8] {
        match self {
            Operation::Put { key, .. } | Operation::Delete { key, .. } => key,
        }
    }

    pub fn version(&self) -> u64 {
        match self {
            Operation::Put { version, .. } | Operation::Delete { version, .. } => *version,
        }
    }
}

/// One WAL record: every operation of one atomic update
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalRecord {
    /// Log Sequence Number - monotonically increasing
    pub lsn: u64,

    /// Operations, in the order they were staged
    pub operations: Vec<Operation>,
}

impl WalRecord {
    pub fn new(lsn: u64, operations: Vec<Operation>) -> Self {
        Self { lsn, operations }
    }

    /// Encode header + payload
    pub fn serialize(&self) -> Result<Vec<u8>> {
        Self::encode(self.lsn, &self.operations)
    }

    /// Encode a record without taking ownership of its operations
    pub fn encode(lsn: u64, operations: &[Operation]) -> Result<Vec<u8>> {
        let payload = bincode::serialize(operations)?;
        let mut buf = Vec::with_capacity(HEADER_SIZE + payload.len());
        buf.put_u64_le(lsn);
        buf.put_u32_le(crc32fast::hash(&payload));
        buf.put_u32_le(payload.len() as u32);
        buf.extend_from_slice(&payload);
        Ok(buf)
    }

    /// Decode a header into (lsn, crc, payload_len)
    pub fn decode_header(mut header: &[u8]) -> (u64, u32, usize) {
        let lsn = header.get_u64_le();
        let crc = header.get_u32_le();
        let len = header.get_u32_le() as usize;
        (lsn, crc, len)
    }

    /// Verify and decode a payload read after a header
    pub fn deserialize(lsn: u64, crc: u32, payload: &[u8]) -> Result<Self> {
        let actual = crc32fast::hash(payload);
        if actual != crc {
            return Err(StoreError::WalCorruption(format!(
                "crc mismatch at lsn {}: stored {:#010x}, computed {:#010x}",
                lsn, crc, actual
            )));
        }
        let operations = bincode::deserialize(payload)?;
        Ok(Self { lsn, operations })
    }
}
