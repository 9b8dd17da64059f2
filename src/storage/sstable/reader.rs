//! SST File Iterator
//!
//! Sequential scan over a block-based table: walk the index block, load each
//! data block it points at, and yield every entry in file order.
//!
//! ```text
//! open():        read footer ─► verify magic ─► load index block
//! seek_to_first: rewind index ─► load first data block ─► first entry
//! next():        next entry, or next data block when the current one is done
//! ```
//!
//! The iterator follows the engine's cursor convention: position with
//! `seek_to_first`, inspect with `valid`/`key`/`value`, advance with `next`.
//! Running off the end makes it invalid with no error; a failure makes it
//! invalid with `err()` set, and the error sticks.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use crate::error::{Result, StoreError};

use super::block::BlockIter;
use super::format::{
    decode_block_contents, BlockHandle, ChecksumType, Footer, BLOCK_TRAILER_SIZE,
    FOOTER_ENCODED_LENGTH, MAX_SUPPORTED_FORMAT_VERSION,
};
use super::key::InternalKey;

/// Outcome of advancing to the next data block
enum BlockLoad {
    Loaded,
    Exhausted,
}

/// Forward iterator over every entry of one SST file
pub struct SstFileIterator {
    file: File,
    file_size: u64,
    footer: Footer,
    index_iter: BlockIter,
    data_iter: BlockIter,
    /// Raw block bytes (payload + trailer), reused across reads
    read_buf: Vec<u8>,
    current_key: Option<InternalKey>,
    invalid: bool,
    err: Option<StoreError>,
}

impl SstFileIterator {
    /// Open a table file and load its index block
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        let it = Self::from_file(file)?;
        tracing::debug!(
            path = %path.display(),
            format_version = it.footer.format_version,
            "SST file opened"
        );
        Ok(it)
    }

    pub fn from_file(mut file: File) -> Result<Self> {
        let file_size = file.metadata()?.len();
        if file_size < FOOTER_ENCODED_LENGTH as u64 {
            return Err(StoreError::Corruption(format!(
                "file of {} bytes is shorter than a footer",
                file_size
            )));
        }

        file.seek(SeekFrom::Start(file_size - FOOTER_ENCODED_LENGTH as u64))?;
        let mut footer_buf = [0u8; FOOTER_ENCODED_LENGTH];
        file.read_exact(&mut footer_buf)?;
        let footer = Footer::decode(&footer_buf)?;

        if footer.format_version > MAX_SUPPORTED_FORMAT_VERSION {
            return Err(StoreError::UnsupportedAlgorithm(format!(
                "table format version {}",
                footer.format_version
            )));
        }

        let mut read_buf = Vec::new();
        let index_data = read_block(
            &mut file,
            file_size,
            footer.checksum_type,
            footer.index_handle,
            &mut read_buf,
            Vec::new(),
        )?;
        let index_iter = BlockIter::new(index_data)?;

        Ok(Self {
            file,
            file_size,
            footer,
            index_iter,
            data_iter: BlockIter::default(),
            read_buf,
            current_key: None,
            invalid: true,
            err: None,
        })
    }

    pub fn footer(&self) -> &Footer {
        &self.footer
    }

    /// Position on the first entry of the file
    pub fn seek_to_first(&mut self) {
        if self.err.is_some() {
            return;
        }
        self.index_iter.rewind();
        self.data_iter = BlockIter::default();
        self.invalid = false;
        self.next();
    }

    /// Advance to the next entry, crossing into the next data block if needed
    pub fn next(&mut self) {
        if self.invalid {
            return;
        }
        if let Err(e) = self.step() {
            tracing::warn!(error = %e, "SST iteration failed");
            self.current_key = None;
            self.invalid = true;
            self.err = Some(e);
        }
    }

    fn step(&mut self) -> Result<()> {
        // Loop skips data blocks without entries.
        while self.data_iter.at_end() {
            match self.load_next_data_block()? {
                BlockLoad::Loaded => {}
                BlockLoad::Exhausted => {
                    self.current_key = None;
                    self.invalid = true;
                    return Ok(());
                }
            }
        }
        self.data_iter.next()?;
        self.current_key = Some(InternalKey::decode(self.data_iter.key())?);
        Ok(())
    }

    fn load_next_data_block(&mut self) -> Result<BlockLoad> {
        if self.index_iter.at_end() {
            return Ok(BlockLoad::Exhausted);
        }
        self.index_iter.next()?;
        let (handle, _) = BlockHandle::decode(self.index_iter.value())?;

        let reuse = self.data_iter.take_buffer();
        let data = read_block(
            &mut self.file,
            self.file_size,
            self.footer.checksum_type,
            handle,
            &mut self.read_buf,
            reuse,
        )?;
        self.data_iter.reset(data)?;
        Ok(BlockLoad::Loaded)
    }

    pub fn valid(&self) -> bool {
        !self.invalid && self.current_key.is_some()
    }

    pub fn err(&self) -> Option<&StoreError> {
        self.err.as_ref()
    }

    /// Current key; only meaningful while `valid()`
    pub fn key(&self) -> Option<&InternalKey> {
        self.current_key.as_ref()
    }

    /// Current value; empty when not `valid()`
    pub fn value(&self) -> &[u8] {
        if self.valid() {
            self.data_iter.value()
        } else {
            &[]
        }
    }

    /// Iterate every entry from the start of the file
    pub fn entries(&mut self) -> Entries<'_> {
        self.seek_to_first();
        Entries {
            iter: self,
            started: false,
            done: false,
        }
    }
}

/// `Iterator` view over an `SstFileIterator`
///
/// Yields at most one `Err`, after which iteration stops.
pub struct Entries<'a> {
    iter: &'a mut SstFileIterator,
    started: bool,
    done: bool,
}

impl<'a> Iterator for Entries<'a> {
    type Item = Result<(InternalKey, Vec<u8>)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        if self.started {
            self.iter.next();
        }
        self.started = true;

        if let Some(err) = self.iter.err() {
            self.done = true;
            return Some(Err(clone_error(err)));
        }
        match self.iter.key() {
            Some(key) if self.iter.valid() => Some(Ok((key.clone(), self.iter.value().to_vec()))),
            _ => {
                self.done = true;
                None
            }
        }
    }
}

/// Read `handle`'s payload plus trailer, verify, and decompress into `dst`
///
/// Handles come from the footer and index block, which carry no checksum of
/// their own, so they are bounded by the file size before any allocation.
fn read_block(
    file: &mut File,
    file_size: u64,
    checksum_type: ChecksumType,
    handle: BlockHandle,
    read_buf: &mut Vec<u8>,
    dst: Vec<u8>,
) -> Result<Vec<u8>> {
    let end = handle
        .size
        .checked_add(BLOCK_TRAILER_SIZE as u64)
        .and_then(|n| handle.offset.checked_add(n));
    if end.map_or(true, |end| end > file_size) {
        return Err(StoreError::Corruption(format!(
            "block handle (offset {}, size {}) exceeds file of {} bytes",
            handle.offset, handle.size, file_size
        )));
    }
    let len = usize::try_from(handle.size)
        .ok()
        .and_then(|n| n.checked_add(BLOCK_TRAILER_SIZE))
        .ok_or_else(|| StoreError::Corruption(format!("block size {} overflows", handle.size)))?;
    read_buf.resize(len, 0);
    file.seek(SeekFrom::Start(handle.offset))?;
    file.read_exact(read_buf)?;
    decode_block_contents(checksum_type, read_buf, dst)
}

/// Errors are not `Clone`; rebuild an equivalent one for the adaptor
fn clone_error(err: &StoreError) -> StoreError {
    match err {
        StoreError::ChecksumMismatch => StoreError::ChecksumMismatch,
        StoreError::MagicMismatch => StoreError::MagicMismatch,
        StoreError::UnsupportedAlgorithm(s) => StoreError::UnsupportedAlgorithm(s.clone()),
        other => StoreError::Corruption(other.to_string()),
    }
}
