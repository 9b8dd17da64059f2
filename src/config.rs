//! Configuration for regionstore
//!
//! Centralized configuration with sensible defaults.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::{Result, StoreError};

/// Main configuration for an `Engines` instance
#[derive(Debug, Clone)]
pub struct Config {
    // -------------------------------------------------------------------------
    // Storage Configuration
    // -------------------------------------------------------------------------
    /// Root directory for all data files
    /// Internal structure:
    ///   {data_dir}/
    ///     ├── kv/                (main engine WAL segments, lock store dump)
    ///     └── raft/              (log engine WAL segments)
    pub data_dir: PathBuf,

    // -------------------------------------------------------------------------
    // WAL Configuration
    // -------------------------------------------------------------------------
    /// Sync strategy: how often to fsync WAL
    pub wal_sync_strategy: WalSyncStrategy,

    /// Segment size in bytes before the WAL rotates to a new file
    pub wal_segment_size: u64,

    // -------------------------------------------------------------------------
    // Range Delete Configuration
    // -------------------------------------------------------------------------
    /// Number of keys deleted per write batch
    pub delete_range_batch_size: usize,

    // -------------------------------------------------------------------------
    // Lock Store Dump Configuration
    // -------------------------------------------------------------------------
    /// File name of the lock store dump, relative to the kv directory
    pub lock_store_file_name: String,

    /// How often the dumper checks the log engine watermark
    pub dump_interval: Duration,

    /// Minimum advance of the log segment number between two dumps
    pub dump_file_num_diff: u64,

    /// Time to wait after deciding to dump, so in-flight entries get applied
    pub dump_settle_delay: Duration,
}

/// WAL sync strategy
#[derive(Debug, Clone, Copy)]
pub enum WalSyncStrategy {
    /// fsync after every write (safest, slowest)
    EveryWrite,

    /// fsync after N uncommitted entries (balanced durability/performance)
    EveryNEntries { count: usize },
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./regionstore_data"),
            wal_sync_strategy: WalSyncStrategy::EveryNEntries { count: 100 },
            wal_segment_size: 64 * 1024 * 1024, // 64 MB
            delete_range_batch_size: 4096,
            lock_store_file_name: "lockstore.dump".to_string(),
            dump_interval: Duration::from_secs(10),
            dump_file_num_diff: 2,
            dump_settle_delay: Duration::from_secs(5),
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Directory holding the main engine
    pub fn kv_path(&self) -> PathBuf {
        self.data_dir.join("kv")
    }

    /// Directory holding the log engine
    pub fn raft_path(&self) -> PathBuf {
        self.data_dir.join("raft")
    }

    /// Reject settings no engine can run with
    pub fn validate(&self) -> Result<()> {
        if self.wal_segment_size == 0 {
            return Err(StoreError::Config("wal_segment_size must be positive".into()));
        }
        if let WalSyncStrategy::EveryNEntries { count: 0 } = self.wal_sync_strategy {
            return Err(StoreError::Config("EveryNEntries count must be positive".into()));
        }
        if self.delete_range_batch_size == 0 {
            return Err(StoreError::Config("delete_range_batch_size must be positive".into()));
        }
        if self.lock_store_file_name.is_empty() {
            return Err(StoreError::Config("lock_store_file_name is empty".into()));
        }
        if self.dump_file_num_diff == 0 {
            return Err(StoreError::Config("dump_file_num_diff must be positive".into()));
        }
        Ok(())
    }
}

/// Builder for Config
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Set the data directory (root for all storage)
    pub fn data_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.data_dir = path.into();
        self
    }

    /// Set the WAL sync strategy
    pub fn wal_sync_strategy(mut self, strategy: WalSyncStrategy) -> Self {
        self.config.wal_sync_strategy = strategy;
        self
    }

    /// Set the WAL segment size (in bytes)
    pub fn wal_segment_size(mut self, size: u64) -> Self {
        self.config.wal_segment_size = size;
        self
    }

    /// Set the range delete batch size (in keys)
    pub fn delete_range_batch_size(mut self, size: usize) -> Self {
        self.config.delete_range_batch_size = size;
        self
    }

    /// Set the lock store dump file name
    pub fn lock_store_file_name(mut self, name: impl Into<String>) -> Self {
        self.config.lock_store_file_name = name.into();
        self
    }

    /// Set the dumper check interval
    pub fn dump_interval(mut self, interval: Duration) -> Self {
        self.config.dump_interval = interval;
        self
    }

    /// Set the segment number delta that triggers a dump
    pub fn dump_file_num_diff(mut self, diff: u64) -> Self {
        self.config.dump_file_num_diff = diff;
        self
    }

    /// Set the settle delay before a dump is written
    pub fn dump_settle_delay(mut self, delay: Duration) -> Self {
        self.config.dump_settle_delay = delay;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}
