//! WAL Writer
//!
//! Handles appending records to the active WAL segment.

use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::config::WalSyncStrategy;
use crate::error::{Result, StoreError};

use super::{list_segments, segment_path, Operation, WalRecord};

/// Writes records to the WAL, rotating segments at `segment_size`
pub struct WalWriter {
    /// Directory holding the segments
    dir: PathBuf,
    /// Active segment number
    segment: u32,
    /// Buffered writer over the active segment
    writer: BufWriter<File>,
    /// Bytes already in the active segment
    segment_offset: u64,
    /// Rotation threshold
    segment_size: u64,
    /// LSN of the last appended record
    current_lsn: u64,
    sync_strategy: WalSyncStrategy,
    /// Records appended since the last fsync
    unsynced: usize,
    /// Set when the segment could not be brought back to a record boundary;
    /// every later append is refused
    failed: Option<String>,
}

impl WalWriter {
    /// Open the WAL in `dir`, appending to the newest segment
    ///
    /// `last_lsn` is the LSN of the last record recovered from the directory;
    /// run `WalRecovery::recover` first so the active segment has no torn tail.
    pub fn open(
        dir: &Path,
        sync_strategy: WalSyncStrategy,
        segment_size: u64,
        last_lsn: u64,
    ) -> Result<Self> {
        fs::create_dir_all(dir)?;
        let segment = list_segments(dir)?.last().map(|(n, _)| *n).unwrap_or(1);
        let (writer, segment_offset) = Self::open_segment(dir, segment)?;

        Ok(Self {
            dir: dir.to_path_buf(),
            segment,
            writer,
            segment_offset,
            segment_size,
            current_lsn: last_lsn,
            sync_strategy,
            unsynced: 0,
            failed: None,
        })
    }

    fn open_segment(dir: &Path, number: u32) -> Result<(BufWriter<File>, u64)> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(segment_path(dir, number))?;
        let len = file.metadata()?.len();
        Ok((BufWriter::new(file), len))
    }

    /// Append one record holding `operations`; returns its LSN
    ///
    /// A record that fails to write is cut from the segment before the error
    /// is returned, so later records never land behind a torn one.
    pub fn append(&mut self, operations: &[Operation]) -> Result<u64> {
        self.check_usable()?;
        let lsn = self.current_lsn + 1;
        let bytes = WalRecord::encode(lsn, operations)?;

        if self.segment_offset > 0 && self.segment_offset + bytes.len() as u64 > self.segment_size {
            self.rotate()?;
        }

        if let Err(e) = self.write_record(&bytes) {
            self.discard_partial_record();
            return Err(e);
        }
        self.segment_offset += bytes.len() as u64;
        self.current_lsn = lsn;

        self.unsynced += 1;
        let should_sync = match self.sync_strategy {
            WalSyncStrategy::EveryWrite => true,
            WalSyncStrategy::EveryNEntries { count } => self.unsynced >= count,
        };
        if should_sync {
            self.sync()?;
        }
        Ok(lsn)
    }

    fn write_record(&mut self, bytes: &[u8]) -> Result<()> {
        self.writer.write_all(bytes)?;
        self.writer.flush()?;
        Ok(())
    }

    /// Cut the active segment back to `segment_offset`, or fail the writer
    pub(crate) fn discard_partial_record(&mut self) {
        if let Err(e) = self.truncate_to_offset() {
            tracing::error!(
                dir = %self.dir.display(),
                segment = self.segment,
                error = %e,
                "cannot remove partial WAL record"
            );
            self.failed = Some(format!("partial record left in segment {}: {}", self.segment, e));
        }
    }

    fn truncate_to_offset(&mut self) -> Result<()> {
        let (fresh, _) = Self::open_segment(&self.dir, self.segment)?;
        let torn = std::mem::replace(&mut self.writer, fresh);
        // Drop buffered bytes instead of flushing them
        drop(torn.into_parts());
        let file = self.writer.get_ref();
        file.set_len(self.segment_offset)?;
        file.sync_data()?;
        Ok(())
    }

    fn check_usable(&self) -> Result<()> {
        match &self.failed {
            Some(reason) => Err(StoreError::Engine(format!("WAL writer failed: {}", reason))),
            None => Ok(()),
        }
    }

    /// Force sync to disk
    ///
    /// A failed fsync leaves the durability of written records unknown, so the
    /// writer refuses further appends.
    pub fn sync(&mut self) -> Result<()> {
        self.check_usable()?;
        let result = self
            .writer
            .flush()
            .and_then(|_| self.writer.get_ref().sync_data());
        if let Err(e) = result {
            self.failed = Some(format!("sync of segment {} failed: {}", self.segment, e));
            return Err(e.into());
        }
        self.unsynced = 0;
        Ok(())
    }

    /// Seal the active segment and start the next one
    fn rotate(&mut self) -> Result<()> {
        self.sync()?;
        let next = self.segment + 1;
        let (writer, offset) = Self::open_segment(&self.dir, next)?;
        self.segment = next;
        self.writer = writer;
        self.segment_offset = offset;
        tracing::debug!(dir = %self.dir.display(), segment = self.segment, "WAL rotated");
        Ok(())
    }

    /// Write `batches` into a fresh segment, then remove every older segment
    ///
    /// Used by compaction: the new segment is a checkpoint of the live state.
    /// Old segments are removed only after the checkpoint is synced.
    pub fn rewrite(&mut self, batches: Vec<Vec<Operation>>) -> Result<()> {
        self.rotate()?;
        let checkpoint = self.segment;
        for operations in batches {
            if operations.is_empty() {
                continue;
            }
            self.append(&operations)?;
        }
        self.sync()?;

        for (number, path) in list_segments(&self.dir)? {
            if number < checkpoint {
                fs::remove_file(&path)?;
            }
        }
        Ok(())
    }

    /// Get the LSN of the last appended record
    pub fn current_lsn(&self) -> u64 {
        self.current_lsn
    }

    /// Watermark: `segment << 32 | offset within segment`
    pub fn write_offset(&self) -> u64 {
        ((self.segment as u64) << 32) | (self.segment_offset & 0xffff_ffff)
    }

    /// Active segment number
    pub fn segment(&self) -> u32 {
        self.segment
    }
}
