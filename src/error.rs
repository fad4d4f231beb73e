//! Error types for latticekv
//!
//! Provides a unified error type for all operations. Display strings of the
//! client-facing variants double as the `ERROR: <message>` text sent over
//! the wire, so they are lowercase and stable.

use thiserror::Error;

/// Result type alias using LatticeError
pub type Result<T> = std::result::Result<T, LatticeError>;

/// Unified error type for latticekv operations
#[derive(Debug, Error)]
pub enum LatticeError {
    // -------------------------------------------------------------------------
    // I/O Errors
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // -------------------------------------------------------------------------
    // Engine Errors
    // -------------------------------------------------------------------------
    #[error("key not found")]
    KeyNotFound,

    // -------------------------------------------------------------------------
    // WAL Errors
    // -------------------------------------------------------------------------
    #[error("WAL write failed: {0}")]
    WalWrite(String),

    #[error("WAL recovery failed: {0}")]
    WalRecovery(String),

    // -------------------------------------------------------------------------
    // Replication Errors
    // -------------------------------------------------------------------------
    #[error("write operations not allowed on slave replica")]
    WriteOnReplica,

    #[error("replication requires WAL to be enabled")]
    ReplicationRequiresWal,

    // -------------------------------------------------------------------------
    // Protocol / Network Errors
    // -------------------------------------------------------------------------
    #[error("invalid command: {0}")]
    InvalidCommand(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("network error: {0}")]
    Network(String),

    // -------------------------------------------------------------------------
    // Configuration / Serialization Errors
    // -------------------------------------------------------------------------
    #[error("configuration error: {0}")]
    Config(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for LatticeError {
    fn from(err: serde_json::Error) -> Self {
        LatticeError::Serialization(err.to_string())
    }
}
