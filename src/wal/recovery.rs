//! WAL Recovery
//!
//! Handles crash recovery by replaying the WAL segments of one directory.

use std::fs::{self, OpenOptions};
use std::path::Path;

use crate::error::{Result, StoreError};

use super::{list_segments, WalReader, WalRecord};

/// Handles WAL recovery after crash
pub struct WalRecovery;

/// Result of a recovery operation
#[derive(Debug, Default)]
pub struct RecoveryResult {
    /// Number of records successfully recovered
    pub records_recovered: u64,

    /// Number of bad records found (replay stops at the first one)
    pub records_corrupted: u64,

    /// Last valid LSN
    pub last_lsn: u64,

    /// Whether the WAL was truncated (torn or corrupt tail removed)
    pub was_truncated: bool,

    /// Number of segments scanned
    pub segments: usize,
}

impl WalRecovery {
    /// Recover records from the WAL segments in `dir`
    ///
    /// This will:
    /// 1. Read all valid records, segment by segment
    /// 2. Stop at the first torn or corrupt record
    /// 3. Truncate that segment at the bad record and drop later segments
    /// 4. Return all valid records in order
    pub fn recover(dir: &Path) -> Result<(Vec<WalRecord>, RecoveryResult)> {
        Self::scan(dir, true)
    }

    /// Verify integrity of the WAL without modifying it
    pub fn verify(dir: &Path) -> Result<RecoveryResult> {
        Self::scan(dir, false).map(|(_, result)| result)
    }

    fn scan(dir: &Path, repair: bool) -> Result<(Vec<WalRecord>, RecoveryResult)> {
        let segments = list_segments(dir)?;
        let mut result = RecoveryResult {
            segments: segments.len(),
            ..Default::default()
        };
        let mut records = Vec::new();

        for (i, (number, path)) in segments.iter().enumerate() {
            let mut reader = WalReader::open(path)?;
            loop {
                match reader.next_record() {
                    Ok(Some(record)) => {
                        result.last_lsn = record.lsn;
                        result.records_recovered += 1;
                        if repair {
                            records.push(record);
                        }
                    }
                    Ok(None) => break,
                    Err(StoreError::WalCorruption(reason)) => {
                        result.records_corrupted += 1;
                        tracing::warn!(
                            segment = number,
                            offset = reader.position(),
                            %reason,
                            "WAL replay stopped at bad record"
                        );
                        if repair {
                            Self::truncate_from(path, reader.position())?;
                            for (_, later) in &segments[i + 1..] {
                                fs::remove_file(later)?;
                            }
                            result.was_truncated = true;
                        }
                        return Ok((records, result));
                    }
                    Err(e) => return Err(e),
                }
            }
        }

        Ok((records, result))
    }

    fn truncate_from(path: &Path, offset: u64) -> Result<()> {
        let file = OpenOptions::new().write(true).open(path)?;
        file.set_len(offset)?;
        file.sync_all()?;
        Ok(())
    }
}
