//! SST Module
//!
//! Reader and writer for RocksDB block-based table files.
//!
//! ## File Format
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │ Data Block 1 │ trailer: compression (1) | crc32c (4)    │
//! │ Data Block 2 │ trailer                                  │
//! │ ...                                                     │
//! ├─────────────────────────────────────────────────────────┤
//! │ Metaindex Block │ trailer                               │
//! ├─────────────────────────────────────────────────────────┤
//! │ Index Block │ trailer                                   │
//! │   [last internal key of block N] -> BlockHandle         │
//! ├─────────────────────────────────────────────────────────┤
//! │ Footer (53 bytes)                                       │
//! │   checksum type | metaindex handle | index handle |     │
//! │   padding | format version | magic                      │
//! └─────────────────────────────────────────────────────────┘
//! ```
//!
//! Data and index blocks share one layout (see `block`). Keys in data blocks
//! are internal keys: user key followed by an 8-byte sequence/type trailer.

mod block;
mod builder;
mod format;
mod key;
mod reader;

pub use block::{BlockBuilder, BlockIter};
pub use builder::{TableBuilder, TableOptions, TableProperties};
pub use format::{
    crc32c, mask_crc32, unmask_crc32, BlockHandle, ChecksumType, CompressionType, Footer,
    BLOCK_BASED_TABLE_MAGIC_NUMBER, BLOCK_TRAILER_SIZE, FOOTER_ENCODED_LENGTH,
};
pub use key::{InternalKey, ValueType};
pub use reader::{Entries, SstFileIterator};
