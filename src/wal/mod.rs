//! Write-Ahead Log (WAL) Module
//!
//! Provides durability for the main engine and the log engine.
//!
//! ## Responsibilities
//! - Append one record per atomic store update
//! - CRC32 checksums for corruption detection
//! - Log Sequence Numbers (LSN) for ordering
//! - Segment rotation; the segment number is the high half of the watermark
//! - Crash recovery and replay
//!
//! ## File Format
//! ```text
//! {dir}/00000001.wal, {dir}/00000002.wal, ...
//! ┌─────────────────────────────────────────┐
//! │ Record 1                                │
//! │ ┌─────────┬─────────┬────────┬────────┐ │
//! │ │ LSN (8) │ CRC (4) │Len (4) │ Data   │ │
//! │ └─────────┴─────────┴────────┴────────┘ │
//! ├─────────────────────────────────────────┤
//! │ Record 2 ...                            │
//! └─────────────────────────────────────────┘
//! ```
//! `Data` is the bincode encoding of the record's operations.

mod entry;
mod reader;
mod recovery;
mod writer;

use std::fs;
use std::path::{Path, PathBuf};

pub use entry::{Operation, WalRecord, HEADER_SIZE};
pub use reader::{WalIterator, WalReader};
pub use recovery::{RecoveryResult, WalRecovery};
pub use writer::WalWriter;

use crate::error::Result;

const SEGMENT_EXTENSION: &str = "wal";

/// File name of segment `number` inside `dir`
pub fn segment_path(dir: &Path, number: u32) -> PathBuf {
    dir.join(format!("{:08}.{}", number, SEGMENT_EXTENSION))
}

/// List WAL segments in `dir`, sorted by segment number
pub fn list_segments(dir: &Path) -> Result<Vec<(u32, PathBuf)>> {
    let mut segments = Vec::new();
    if !dir.exists() {
        return Ok(segments);
    }
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if !path.is_file() || path.extension().and_then(|e| e.to_str()) != Some(SEGMENT_EXTENSION) {
            continue;
        }
        let number = path
            .file_stem()
            .and_then(|s| s.to_str())
            .and_then(|s| s.parse::<u32>().ok());
        if let Some(number) = number {
            segments.push((number, path));
        }
    }
    segments.sort_by_key(|(number, _)| *number);
    Ok(segments)
}
