//! Periodic lock index dumper
//!
//! Background thread that writes the lock index to disk once the log engine
//! has moved on by enough WAL segments. A dump bounds how much log the next
//! open has to replay to rebuild the lock index.
//!
//! ```text
//! every `interval`:
//!   watermark = raft_write_offset()
//!   if segment(watermark) - last_segment >= file_num_diff:
//!       wait `settle_delay` (let applies catch up with the log)
//!       dump lock index + watermark
//!       last_segment = segment(watermark)
//! ```
//! A failed dump is logged and retried on a later tick.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam::channel::{self, select, RecvTimeoutError, Sender};

use crate::config::Config;
use crate::engine::Engines;
use crate::error::{Result, StoreError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DumperOptions {
    pub interval: Duration,
    /// Segments the log must advance before the next dump
    pub file_num_diff: u64,
    pub settle_delay: Duration,
}

impl DumperOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            interval: config.dump_interval,
            file_num_diff: config.dump_file_num_diff,
            settle_delay: config.dump_settle_delay,
        }
    }
}

/// Handle to the running dumper thread
pub struct LockStoreDumper {
    stop_tx: Sender<()>,
    handle: Option<JoinHandle<()>>,
}

impl LockStoreDumper {
    pub fn start(engines: Arc<Engines>, options: DumperOptions) -> Result<Self> {
        let (stop_tx, stop_rx) = channel::bounded::<()>(1);

        let handle = thread::Builder::new()
            .name("lock-store-dumper".into())
            .spawn(move || {
                let ticker = channel::tick(options.interval);
                let mut last_segment = engines.raft_write_offset() >> 32;
                tracing::debug!(last_segment, "lock store dumper started");

                loop {
                    select! {
                        recv(ticker) -> _ => {
                            let watermark = engines.raft_write_offset();
                            let segment = watermark >> 32;
                            if segment.saturating_sub(last_segment) < options.file_num_diff {
                                continue;
                            }
                            // Stop requests still win during the settle delay.
                            match stop_rx.recv_timeout(options.settle_delay) {
                                Err(RecvTimeoutError::Timeout) => {}
                                _ => return,
                            }
                            match engines.dump_lock_store_at(watermark) {
                                Ok(_) => last_segment = segment,
                                Err(e) => tracing::error!(error = %e, "dump lock store failed"),
                            }
                        }
                        recv(stop_rx) -> _ => return,
                    }
                }
            })
            .map_err(|e| StoreError::Engine(format!("failed to spawn dumper thread: {}", e)))?;

        Ok(Self {
            stop_tx,
            handle: Some(handle),
        })
    }

    /// Signal the thread and wait for it to exit
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        let _ = self.stop_tx.try_send(());
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::error!("lock store dumper panicked");
            }
        }
    }
}

impl Drop for LockStoreDumper {
    fn drop(&mut self) {
        self.shutdown();
    }
}
