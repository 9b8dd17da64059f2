//! Error types for regionstore
//!
//! Provides a unified error type for all operations.

use thiserror::Error;

/// Result type alias using StoreError
pub type Result<T> = std::result::Result<T, StoreError>;

/// Unified error type for regionstore operations
#[derive(Debug, Error)]
pub enum StoreError {
    // -------------------------------------------------------------------------
    // I/O Errors
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // -------------------------------------------------------------------------
    // SST Format Errors
    // -------------------------------------------------------------------------
    /// Block payload failed checksum verification. The file is corrupt.
    #[error("Checksum mismatch")]
    ChecksumMismatch,

    /// Footer magic does not match the block-based table magic.
    #[error("Magic number mismatch")]
    MagicMismatch,

    /// Declared checksum or compression algorithm has no implementation.
    #[error("Unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),

    #[error("Corruption: {0}")]
    Corruption(String),

    // -------------------------------------------------------------------------
    // WAL Errors
    // -------------------------------------------------------------------------
    #[error("WAL corruption detected: {0}")]
    WalCorruption(String),

    // -------------------------------------------------------------------------
    // Engine Errors
    // -------------------------------------------------------------------------
    /// Region epoch changed while a snapshot was being built. Retry.
    #[error("region {region_id} changed during snapshot: epoch version {expected} -> {actual}")]
    RegionChanged {
        region_id: u64,
        expected: u64,
        actual: u64,
    },

    /// Underlying store failed during a transactional commit.
    #[error("Engine failure: {0}")]
    Engine(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid range: {0}")]
    InvalidRange(String),

    // -------------------------------------------------------------------------
    // Serialization Errors
    // -------------------------------------------------------------------------
    #[error("Serialization error: {0}")]
    Serialization(String),

    // -------------------------------------------------------------------------
    // Configuration Errors
    // -------------------------------------------------------------------------
    #[error("Configuration error: {0}")]
    Config(String),
}

impl StoreError {
    /// Whether the caller may retry the same operation from scratch.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::RegionChanged { .. })
    }
}

impl From<bincode::Error> for StoreError {
    fn from(e: bincode::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}
