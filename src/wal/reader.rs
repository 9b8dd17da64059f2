//! WAL Reader
//!
//! Handles reading records from one WAL segment.

use std::fs::File;
use std::io::{BufReader, ErrorKind, Read};
use std::path::Path;

use crate::error::{Result, StoreError};

use super::{WalRecord, HEADER_SIZE};

/// Reads records from a WAL segment file
pub struct WalReader {
    reader: BufReader<File>,
    /// Offset of the next unread record
    position: u64,
    file_len: u64,
}

impl WalReader {
    /// Open a WAL segment for reading
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        let file_len = file.metadata()?.len();
        Ok(Self {
            reader: BufReader::new(file),
            position: 0,
            file_len,
        })
    }

    /// Read the next record
    ///
    /// Returns `Ok(None)` at a clean end of segment. A short header, a short
    /// payload or a CRC mismatch is `WalCorruption`; `position()` then still
    /// points at the start of the bad record.
    pub fn next_record(&mut self) -> Result<Option<WalRecord>> {
        if self.position == self.file_len {
            return Ok(None);
        }

        let mut header = [0u8; HEADER_SIZE];
        self.read_exact_or_torn(&mut header, "header")?;
        let (lsn, crc, len) = WalRecord::decode_header(&header);

        if self.position + (HEADER_SIZE + len) as u64 > self.file_len {
            return Err(StoreError::WalCorruption(format!(
                "torn payload at offset {} (lsn {})",
                self.position, lsn
            )));
        }
        let mut payload = vec![0u8; len];
        self.read_exact_or_torn(&mut payload, "payload")?;

        let record = WalRecord::deserialize(lsn, crc, &payload)?;
        self.position += (HEADER_SIZE + len) as u64;
        Ok(Some(record))
    }

    fn read_exact_or_torn(&mut self, buf: &mut [u8], what: &str) -> Result<()> {
        match self.reader.read_exact(buf) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => Err(StoreError::WalCorruption(
                format!("torn {} at offset {}", what, self.position),
            )),
            Err(e) => Err(e.into()),
        }
    }

    /// Offset of the next unread record
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Iterate over all records until the end or the first error
    pub fn records(self) -> WalIterator {
        WalIterator {
            reader: self,
            done: false,
        }
    }
}

/// Iterator over WAL records
pub struct WalIterator {
    reader: WalReader,
    done: bool,
}

impl Iterator for WalIterator {
    type Item = Result<WalRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.reader.next_record() {
            Ok(Some(record)) => Some(Ok(record)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}
