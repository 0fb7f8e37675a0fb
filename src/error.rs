//! Error types for TandemKV
//!
//! Provides a unified error type for all operations.

use thiserror::Error;

use crate::wal::SequenceId;

/// Result type alias using TandemError
pub type Result<T> = std::result::Result<T, TandemError>;

/// Unified error type for TandemKV operations
#[derive(Debug, Error)]
pub enum TandemError {
    // -------------------------------------------------------------------------
    // I/O Errors
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // -------------------------------------------------------------------------
    // WAL Errors
    // -------------------------------------------------------------------------
    #[error("WAL corruption detected: {0}")]
    WalCorruption(String),

    #[error("WAL write failed: {0}")]
    WalWrite(String),

    #[error("insufficient WAL history: requested {requested}, oldest retained segment {oldest}")]
    InsufficientHistory {
        requested: SequenceId,
        oldest: SequenceId,
    },

    #[error("requested WAL position {requested} is newer than tail {tail}")]
    AheadOfTail {
        requested: SequenceId,
        tail: SequenceId,
    },

    // -------------------------------------------------------------------------
    // Storage Errors
    // -------------------------------------------------------------------------
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("key uses the reserved internal prefix")]
    ReservedKey,

    // -------------------------------------------------------------------------
    // Serialization Errors
    // -------------------------------------------------------------------------
    #[error("Serialization error: {0}")]
    Serialization(String),

    // -------------------------------------------------------------------------
    // Network Errors
    // -------------------------------------------------------------------------
    #[error("Network error: {0}")]
    Network(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    // -------------------------------------------------------------------------
    // Replication Errors
    // -------------------------------------------------------------------------
    #[error("Replication error: {0}")]
    Replication(String),

    #[error("shipping failed to {} peer(s): {}", failures.len(), failures.join("; "))]
    ShipFailed { failures: Vec<String> },

    #[error("node is not primary")]
    NotPrimary,

    #[error("not registered: {0}")]
    NotRegistered(String),

    // -------------------------------------------------------------------------
    // Configuration Errors
    // -------------------------------------------------------------------------
    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<bincode::Error> for TandemError {
    fn from(err: bincode::Error) -> Self {
        TandemError::Serialization(err.to_string())
    }
}
