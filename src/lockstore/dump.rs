//! Lock index dump files
//!
//! ```text
//! ┌────────────────────┬──────────────────┬──────────────────┬────────────────────┐
//! │ payload_len (8 LE) │ crc32 (4 LE)     │ payload (bincode)│ watermark (8 LE)   │
//! └────────────────────┴──────────────────┴──────────────────┴────────────────────┘
//! ```
//! The payload is every (key, lock) pair in key order. The trailer holds the
//! log engine watermark the dump was taken at, so a reader can tell which part
//! of the log the dump already covers.

use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use bytes::{Buf, BufMut};

use crate::error::{Result, StoreError};

use super::table::LockStore;

const DUMP_HEADER_LEN: usize = 12;

/// Size of the watermark trailer
pub const DUMP_TRAILER_LEN: usize = 8;

impl LockStore {
    /// Write every entry plus `watermark` to `path`
    ///
    /// The file is written beside `path` and renamed over it once synced, so a
    /// crash leaves either the old dump or the new one.
    pub fn dump_to_file(&self, path: &Path, watermark: u64) -> Result<usize> {
        let entries = self.snapshot_all();
        let payload = bincode::serialize(&entries)?;

        let tmp = tmp_path(path);
        {
            let file = OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(&tmp)?;
            let mut writer = BufWriter::new(file);

            let mut header = Vec::with_capacity(DUMP_HEADER_LEN);
            header.put_u64_le(payload.len() as u64);
            header.put_u32_le(crc32fast::hash(&payload));
            writer.write_all(&header)?;
            writer.write_all(&payload)?;
            writer.write_all(&watermark.to_le_bytes())?;
            writer.flush()?;
            writer.get_ref().sync_all()?;
        }
        fs::rename(&tmp, path)?;

        tracing::info!(
            path = %path.display(),
            entries = entries.len(),
            watermark,
            "lock index dumped"
        );
        Ok(entries.len())
    }

    /// Load a dump written by `dump_to_file`; `None` when the file is absent
    pub fn load_from_file(path: &Path) -> Result<Option<(LockStore, u64)>> {
        let mut file = match File::open(path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let mut buf = Vec::new();
        file.read_to_end(&mut buf)?;

        if buf.len() < DUMP_HEADER_LEN + DUMP_TRAILER_LEN {
            return Err(StoreError::Corruption(format!(
                "lock dump {} is {} bytes",
                path.display(),
                buf.len()
            )));
        }
        let mut header = &buf[..DUMP_HEADER_LEN];
        let declared_len = header.get_u64_le();
        let crc = header.get_u32_le();
        // Compared against what is on disk, never added to, since it is untrusted
        let payload_len = buf.len() - DUMP_HEADER_LEN - DUMP_TRAILER_LEN;
        if declared_len != payload_len as u64 {
            return Err(StoreError::Corruption(format!(
                "lock dump {} declares {} payload bytes in a {} byte file",
                path.display(),
                declared_len,
                buf.len()
            )));
        }

        let payload = &buf[DUMP_HEADER_LEN..DUMP_HEADER_LEN + payload_len];
        if crc32fast::hash(payload) != crc {
            return Err(StoreError::Corruption(format!(
                "lock dump {} failed its checksum",
                path.display()
            )));
        }
        let entries: Vec<(Vec<u8>, Vec<u8>)> = bincode::deserialize(payload)?;
        let mut trailer = &buf[buf.len() - DUMP_TRAILER_LEN..];
        let watermark = trailer.get_u64_le();

        tracing::info!(
            path = %path.display(),
            entries = entries.len(),
            watermark,
            "lock index loaded"
        );
        Ok(Some((LockStore::from_map(entries.into_iter().collect()), watermark)))
    }
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".tmp");
    PathBuf::from(name)
}
