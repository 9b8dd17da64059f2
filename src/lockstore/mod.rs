//! Lock Index Module
//!
//! In-memory ordered index of pending transactional locks, keyed by user key.
//!
//! ## Responsibilities
//! - Point put/delete through one exclusive writer held for a whole batch
//! - Point get and ordered range reads under shared access
//! - Range copies for region snapshots
//! - Dump to a file (with a log watermark) and load it back at open
//!
//! ## Data Structure Choice
//! A `BTreeMap` behind a `parking_lot::RwLock`:
//! - Ordered keys, so a region's locks are one contiguous range
//! - The write guard doubles as the mutation lock of a batch; the lock index
//!   is only mutated while it is held

mod dump;
mod table;

pub use dump::DUMP_TRAILER_LEN;
pub use table::{LockStore, LockWriter};
