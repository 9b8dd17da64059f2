//! Table Builder
//!
//! Writes sorted internal keys into a block-based table file that
//! `SstFileIterator` (and any other reader of the format) can scan.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::error::{Result, StoreError};

use super::block::BlockBuilder;
use super::format::{
    crc32c, mask_crc32, BlockHandle, ChecksumType, CompressionType, Footer,
};
use super::key::InternalKey;

/// Format version written to the footer
const WRITE_FORMAT_VERSION: u32 = 2;

#[derive(Debug, Clone)]
pub struct TableOptions {
    /// Target uncompressed size of a data block
    pub block_size: usize,
    pub block_restart_interval: usize,
    /// `None` or `Snappy`
    pub compression: CompressionType,
    pub checksum: ChecksumType,
}

impl Default for TableOptions {
    fn default() -> Self {
        Self {
            block_size: 4 * 1024,
            block_restart_interval: 16,
            compression: CompressionType::None,
            checksum: ChecksumType::Crc32c,
        }
    }
}

/// Summary of a finished table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableProperties {
    pub path: PathBuf,
    pub entry_count: u64,
    pub data_blocks: u64,
    pub file_size: u64,
}

/// Builder for block-based tables
pub struct TableBuilder {
    path: PathBuf,
    writer: BufWriter<File>,
    options: TableOptions,
    /// Bytes written so far
    offset: u64,
    data_block: BlockBuilder,
    index_block: BlockBuilder,
    last_key: Option<InternalKey>,
    entry_count: u64,
    data_blocks: u64,
}

impl TableBuilder {
    pub fn new(path: &Path, options: TableOptions) -> Result<Self> {
        match options.compression {
            CompressionType::None | CompressionType::Snappy => {}
            other => {
                return Err(StoreError::UnsupportedAlgorithm(format!(
                    "compression type {:?}",
                    other
                )))
            }
        }
        match options.checksum {
            ChecksumType::NoChecksum | ChecksumType::Crc32c => {}
            other => {
                return Err(StoreError::UnsupportedAlgorithm(format!(
                    "checksum type {:?}",
                    other
                )))
            }
        }

        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)?;

        Ok(Self {
            path: path.to_path_buf(),
            writer: BufWriter::new(file),
            data_block: BlockBuilder::new(options.block_restart_interval),
            index_block: BlockBuilder::new(1),
            options,
            offset: 0,
            last_key: None,
            entry_count: 0,
            data_blocks: 0,
        })
    }

    /// Add an entry; keys must arrive in strictly increasing order
    pub fn add(&mut self, key: &InternalKey, value: &[u8]) -> Result<()> {
        if let Some(last) = &self.last_key {
            if key <= last {
                return Err(StoreError::InvalidRange(format!(
                    "key {:?} added after {:?}",
                    key, last
                )));
            }
        }

        self.data_block.add(&key.encode(), value);
        self.last_key = Some(key.clone());
        self.entry_count += 1;

        if self.data_block.estimated_size() >= self.options.block_size {
            self.flush_data_block()?;
        }
        Ok(())
    }

    fn flush_data_block(&mut self) -> Result<()> {
        if self.data_block.is_empty() {
            return Ok(());
        }
        // Index entry key: last key of the block
        let index_key = self.data_block.last_key().to_vec();
        let contents = self.data_block.finish();
        let handle = self.write_block(&contents, self.options.compression)?;

        let mut encoded = Vec::new();
        handle.encode_to(&mut encoded);
        self.index_block.add(&index_key, &encoded);
        self.data_blocks += 1;
        Ok(())
    }

    /// Write payload + trailer; returns the handle of the payload
    fn write_block(&mut self, contents: &[u8], compression: CompressionType) -> Result<BlockHandle> {
        let compressed;
        let (payload, tag) = match compression {
            CompressionType::Snappy => {
                compressed = snap::raw::Encoder::new()
                    .compress_vec(contents)
                    .map_err(|e| StoreError::Corruption(format!("snappy: {}", e)))?;
                // Not worth it below 12.5% savings
                if compressed.len() < contents.len() - contents.len() / 8 {
                    (compressed.as_slice(), CompressionType::Snappy)
                } else {
                    (contents, CompressionType::None)
                }
            }
            _ => (contents, CompressionType::None),
        };

        let tag = tag.as_u8();
        let checksum = match self.options.checksum {
            ChecksumType::Crc32c => mask_crc32(crc32c(&[payload, &[tag]])),
            _ => 0,
        };

        self.writer.write_all(payload)?;
        self.writer.write_all(&[tag])?;
        self.writer.write_all(&checksum.to_le_bytes())?;

        let handle = BlockHandle {
            offset: self.offset,
            size: payload.len() as u64,
        };
        self.offset += payload.len() as u64 + 5;
        Ok(handle)
    }

    /// Flush the last data block, write index, metaindex and footer
    pub fn finish(mut self) -> Result<TableProperties> {
        self.flush_data_block()?;

        let metaindex = BlockBuilder::new(1).finish();
        let metaindex_handle = self.write_block(&metaindex, CompressionType::None)?;
        let index = self.index_block.finish();
        let index_handle = self.write_block(&index, CompressionType::None)?;

        let footer = Footer {
            checksum_type: self.options.checksum,
            metaindex_handle,
            index_handle,
            format_version: WRITE_FORMAT_VERSION,
        };
        let footer = footer.encode();
        self.writer.write_all(&footer)?;
        self.writer.flush()?;
        self.writer.get_ref().sync_all()?;
        let file_size = self.offset + footer.len() as u64;

        tracing::debug!(
            path = %self.path.display(),
            entries = self.entry_count,
            blocks = self.data_blocks,
            "SST file written"
        );

        Ok(TableProperties {
            path: self.path,
            entry_count: self.entry_count,
            data_blocks: self.data_blocks,
            file_size,
        })
    }
}
