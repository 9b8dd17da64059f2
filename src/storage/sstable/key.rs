//! Internal keys
//!
//! Every key stored in a table is `user_key ‖ trailer`, where the trailer is
//! a u64 LE packing `sequence << 8 | value_type`.

use std::cmp::Ordering;
use std::fmt;

use bytes::{Buf, BufMut};

use crate::error::{Result, StoreError};

/// Size of the packed sequence/type trailer
pub const INTERNAL_KEY_TRAILER_LEN: usize = 8;

/// Largest sequence number that fits in the trailer
pub const MAX_SEQUENCE_NUMBER: u64 = (1 << 56) - 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueType {
    Deletion,
    Value,
    Merge,
    SingleDeletion,
    RangeDeletion,
    BlobIndex,
    Other(u8),
}

impl ValueType {
    pub fn from_u8(tag: u8) -> Self {
        match tag {
            0x0 => ValueType::Deletion,
            0x1 => ValueType::Value,
            0x2 => ValueType::Merge,
            0x7 => ValueType::SingleDeletion,
            0xf => ValueType::RangeDeletion,
            0x11 => ValueType::BlobIndex,
            other => ValueType::Other(other),
        }
    }

    pub fn as_u8(self) -> u8 {
        match self {
            ValueType::Deletion => 0x0,
            ValueType::Value => 0x1,
            ValueType::Merge => 0x2,
            ValueType::SingleDeletion => 0x7,
            ValueType::RangeDeletion => 0xf,
            ValueType::BlobIndex => 0x11,
            ValueType::Other(tag) => tag,
        }
    }
}

/// Decoded table key
#[derive(Clone, PartialEq, Eq)]
pub struct InternalKey {
    pub user_key: Vec<u8>,
    pub sequence: u64,
    pub value_type: ValueType,
}

impl InternalKey {
    pub fn new(user_key: impl Into<Vec<u8>>, sequence: u64, value_type: ValueType) -> Self {
        Self {
            user_key: user_key.into(),
            sequence,
            value_type,
        }
    }

    pub fn decode(encoded: &[u8]) -> Result<Self> {
        if encoded.len() < INTERNAL_KEY_TRAILER_LEN {
            return Err(StoreError::Corruption(format!(
                "internal key of {} bytes has no trailer",
                encoded.len()
            )));
        }
        let split = encoded.len() - INTERNAL_KEY_TRAILER_LEN;
        let mut trailer = &encoded[split..];
        let packed = trailer.get_u64_le();
        Ok(Self {
            user_key: encoded[..split].to_vec(),
            sequence: packed >> 8,
            value_type: ValueType::from_u8((packed & 0xff) as u8),
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.user_key.len() + INTERNAL_KEY_TRAILER_LEN);
        buf.extend_from_slice(&self.user_key);
        buf.put_u64_le(self.trailer());
        buf
    }

    fn trailer(&self) -> u64 {
        ((self.sequence & MAX_SEQUENCE_NUMBER) << 8) | self.value_type.as_u8() as u64
    }
}

/// User key ascending, then newer sequence first
impl Ord for InternalKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.user_key
            .cmp(&other.user_key)
            .then_with(|| other.trailer().cmp(&self.trailer()))
    }
}

impl PartialOrd for InternalKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Debug for InternalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}@{}:{:?}",
            String::from_utf8_lossy(&self.user_key),
            self.sequence,
            self.value_type
        )
    }
}
