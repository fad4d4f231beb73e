//! # latticekv
//!
//! An in-memory, partitioned key-value store with:
//! - Write-Ahead Logging (WAL) for single-node durability
//! - Batched, segmented, fsync-disciplined log writes
//! - Primary/replica replication of whole WAL segments
//! - Line-oriented TCP client protocol (SET / GET / DEL)
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      TCP Server                              │
//! │                  (Multiple Clients)                          │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │  SET / GET / DEL
//! ┌─────────────────────▼───────────────────────────────────────┐
//! │                  Storage Façade                              │
//! │        (WAL first, engine second; role enforcement)          │
//! └─────────┬─────────────────────┬─────────────────┬───────────┘
//!           │                     │                 │
//!           ▼                     ▼                 ▼
//!    ┌─────────────┐       ┌─────────────┐   ┌──────────────┐
//!    │     WAL     │──────▶│ Replication │   │    Engine    │
//!    │ (segments)  │ ship  │ (pull sync) │   │ (partitions) │
//!    └─────────────┘       └─────────────┘   └──────────────┘
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod config;
pub mod error;

pub mod engine;
pub mod network;
pub mod protocol;
pub mod replication;
pub mod storage;
pub mod wal;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use config::Config;
pub use engine::Engine;
pub use error::{LatticeError, Result};
pub use storage::{Storage, StorageOptions};

// =============================================================================
// Version Info
// =============================================================================

/// Current version of latticekv
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
