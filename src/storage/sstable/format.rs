//! Block-based table format primitives
//!
//! Varints, block handles, the footer, block trailers and the masked CRC32C
//! used by RocksDB-compatible SST files. Every constant here is part of the
//! file format and must match other readers and writers bit for bit.

use bytes::{Buf, BufMut};
use crc::{Crc, CRC_32_ISCSI};

use crate::error::{Result, StoreError};

/// Magic number of block-based tables, stored as two u32 LE halves
pub const BLOCK_BASED_TABLE_MAGIC_NUMBER: u64 = 0x88e2_41b7_85f4_cff7;

/// A varint64 takes at most 10 bytes, a handle is two of them
pub const MAX_BLOCK_HANDLE_ENCODED_LENGTH: usize = 20;

/// checksum (1) + two handles padded (40) + format version (4) + magic (8)
pub const FOOTER_ENCODED_LENGTH: usize = 1 + 2 * MAX_BLOCK_HANDLE_ENCODED_LENGTH + 4 + 8;

/// compression type (1) + checksum (4)
pub const BLOCK_TRAILER_SIZE: usize = 5;

/// Highest table format version whose index blocks hold full block handles
pub const MAX_SUPPORTED_FORMAT_VERSION: u32 = 3;

const MASK_DELTA: u32 = 0xa282_ead8;

const CASTAGNOLI: Crc<u32> = Crc::<u32>::new(&CRC_32_ISCSI);

// =============================================================================
// Algorithm Tags
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChecksumType {
    NoChecksum,
    Crc32c,
    XxHash,
    XxHash64,
    Xxh3,
    Unknown(u8),
}

impl ChecksumType {
    pub fn from_u8(tag: u8) -> Self {
        match tag {
            0 => ChecksumType::NoChecksum,
            1 => ChecksumType::Crc32c,
            2 => ChecksumType::XxHash,
            3 => ChecksumType::XxHash64,
            4 => ChecksumType::Xxh3,
            other => ChecksumType::Unknown(other),
        }
    }

    pub fn as_u8(self) -> u8 {
        match self {
            ChecksumType::NoChecksum => 0,
            ChecksumType::Crc32c => 1,
            ChecksumType::XxHash => 2,
            ChecksumType::XxHash64 => 3,
            ChecksumType::Xxh3 => 4,
            ChecksumType::Unknown(tag) => tag,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionType {
    None,
    Snappy,
    Zlib,
    Bzip2,
    Lz4,
    Lz4hc,
    Xpress,
    Zstd,
}

impl CompressionType {
    pub fn from_u8(tag: u8) -> Result<Self> {
        Ok(match tag {
            0x0 => CompressionType::None,
            0x1 => CompressionType::Snappy,
            0x2 => CompressionType::Zlib,
            0x3 => CompressionType::Bzip2,
            0x4 => CompressionType::Lz4,
            0x5 => CompressionType::Lz4hc,
            0x6 => CompressionType::Xpress,
            0x7 => CompressionType::Zstd,
            other => {
                return Err(StoreError::Corruption(format!(
                    "unknown compression type {:#04x}",
                    other
                )))
            }
        })
    }

    pub fn as_u8(self) -> u8 {
        match self {
            CompressionType::None => 0x0,
            CompressionType::Snappy => 0x1,
            CompressionType::Zlib => 0x2,
            CompressionType::Bzip2 => 0x3,
            CompressionType::Lz4 => 0x4,
            CompressionType::Lz4hc => 0x5,
            CompressionType::Xpress => 0x6,
            CompressionType::Zstd => 0x7,
        }
    }
}

// =============================================================================
// Varints
// =============================================================================

/// Decode a varint64; returns the value and the bytes consumed
pub fn decode_varint64(buf: &[u8]) -> Option<(u64, usize)> {
    let mut result = 0u64;
    for (i, &byte) in buf.iter().enumerate().take(10) {
        result |= ((byte & 0x7f) as u64) << (7 * i);
        if byte & 0x80 == 0 {
            return Some((result, i + 1));
        }
    }
    None
}

pub fn decode_varint32(buf: &[u8]) -> Option<(u32, usize)> {
    let (value, n) = decode_varint64(&buf[..buf.len().min(5)])?;
    u32::try_from(value).ok().map(|v| (v, n))
}

pub fn put_varint64(dst: &mut Vec<u8>, mut value: u64) {
    while value >= 0x80 {
        dst.put_u8((value as u8) | 0x80);
        value >>= 7;
    }
    dst.put_u8(value as u8);
}

pub fn put_varint32(dst: &mut Vec<u8>, value: u32) {
    put_varint64(dst, value as u64);
}

// =============================================================================
// Block Handle
// =============================================================================

/// Location of a block: file offset and payload size (trailer excluded)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BlockHandle {
    pub offset: u64,
    pub size: u64,
}

impl BlockHandle {
    /// Decode a handle; returns it and the bytes consumed
    pub fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        let bad = || StoreError::Corruption("bad block handle".into());
        let (offset, n1) = decode_varint64(buf).ok_or_else(bad)?;
        let (size, n2) = decode_varint64(&buf[n1..]).ok_or_else(bad)?;
        Ok((BlockHandle { offset, size }, n1 + n2))
    }

    pub fn encode_to(&self, dst: &mut Vec<u8>) {
        put_varint64(dst, self.offset);
        put_varint64(dst, self.size);
    }
}

// =============================================================================
// Footer
// =============================================================================

/// Fixed-length trailer at the end of every table file
///
/// ```text
/// ┌──────────┬───────────────┬──────────────┬─────────┬─────────┬──────────┬──────────┐
/// │ cksum(1) │ metaindex hdl │ index handle │ padding │ ver (4) │ magic lo │ magic hi │
/// └──────────┴───────────────┴──────────────┴─────────┴─────────┴──────────┴──────────┘
///  ◄──────────────────── 41 bytes ─────────────────────►
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Footer {
    pub checksum_type: ChecksumType,
    pub metaindex_handle: BlockHandle,
    pub index_handle: BlockHandle,
    pub format_version: u32,
}

impl Footer {
    /// Decode a footer; the magic halves are checked before anything else
    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() != FOOTER_ENCODED_LENGTH {
            return Err(StoreError::Corruption(format!(
                "footer must be {} bytes, got {}",
                FOOTER_ENCODED_LENGTH,
                buf.len()
            )));
        }
        if !check_magic_number(buf) {
            return Err(StoreError::MagicMismatch);
        }

        let checksum_type = ChecksumType::from_u8(buf[0]);
        // Skip the metaindex handle, the index handle follows it.
        let (metaindex_handle, n) = BlockHandle::decode(&buf[1..])?;
        let (index_handle, _) = BlockHandle::decode(&buf[1 + n..])?;
        let mut tail = &buf[FOOTER_ENCODED_LENGTH - 12..];
        let format_version = tail.get_u32_le();

        Ok(Footer {
            checksum_type,
            metaindex_handle,
            index_handle,
            format_version,
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(FOOTER_ENCODED_LENGTH);
        buf.put_u8(self.checksum_type.as_u8());
        self.metaindex_handle.encode_to(&mut buf);
        self.index_handle.encode_to(&mut buf);
        buf.resize(1 + 2 * MAX_BLOCK_HANDLE_ENCODED_LENGTH, 0);
        buf.put_u32_le(self.format_version);
        buf.put_u32_le((BLOCK_BASED_TABLE_MAGIC_NUMBER & 0xffff_ffff) as u32);
        buf.put_u32_le((BLOCK_BASED_TABLE_MAGIC_NUMBER >> 32) as u32);
        buf
    }
}

fn check_magic_number(footer: &[u8]) -> bool {
    let mut tail = &footer[FOOTER_ENCODED_LENGTH - 8..];
    let lo = tail.get_u32_le();
    let hi = tail.get_u32_le();
    lo == (BLOCK_BASED_TABLE_MAGIC_NUMBER & 0xffff_ffff) as u32
        && hi == (BLOCK_BASED_TABLE_MAGIC_NUMBER >> 32) as u32
}

// =============================================================================
// Checksums
// =============================================================================

pub fn crc32c(parts: &[&[u8]]) -> u32 {
    let mut digest = CASTAGNOLI.digest();
    for part in parts {
        digest.update(part);
    }
    digest.finalize()
}

pub fn mask_crc32(crc: u32) -> u32 {
    ((crc >> 15) | (crc << 17)).wrapping_add(MASK_DELTA)
}

pub fn unmask_crc32(masked: u32) -> u32 {
    let rot = masked.wrapping_sub(MASK_DELTA);
    (rot >> 17) | (rot << 15)
}

// =============================================================================
// Block Contents
// =============================================================================

/// Verify the trailer of `raw` (payload + trailer) and decompress into `dst`
///
/// `dst` is cleared and reused; its allocation survives across blocks.
pub fn decode_block_contents(checksum_type: ChecksumType, raw: &[u8], mut dst: Vec<u8>) -> Result<Vec<u8>> {
    if raw.len() < BLOCK_TRAILER_SIZE {
        return Err(StoreError::Corruption("block shorter than its trailer".into()));
    }
    let trailer_pos = raw.len() - BLOCK_TRAILER_SIZE;
    let payload = &raw[..trailer_pos];
    let compression_tag = raw[trailer_pos];

    match checksum_type {
        ChecksumType::NoChecksum => {}
        ChecksumType::Crc32c => {
            let actual = crc32c(&[&raw[..trailer_pos + 1]]);
            let mut stored = &raw[trailer_pos + 1..];
            let expected = unmask_crc32(stored.get_u32_le());
            if actual != expected {
                return Err(StoreError::ChecksumMismatch);
            }
        }
        other => {
            return Err(StoreError::UnsupportedAlgorithm(format!(
                "checksum type {:?}",
                other
            )))
        }
    }

    dst.clear();
    match CompressionType::from_u8(compression_tag)? {
        CompressionType::None => dst.extend_from_slice(payload),
        CompressionType::Snappy => {
            let len = snap::raw::decompress_len(payload)
                .map_err(|e| StoreError::Corruption(format!("snappy header: {}", e)))?;
            dst.resize(len, 0);
            let written = snap::raw::Decoder::new()
                .decompress(payload, &mut dst)
                .map_err(|e| StoreError::Corruption(format!("snappy payload: {}", e)))?;
            dst.truncate(written);
        }
        other => {
            return Err(StoreError::UnsupportedAlgorithm(format!(
                "compression type {:?}",
                other
            )))
        }
    }
    Ok(dst)
}
