//! Partitioned In-Memory Engine
//!
//! The authoritative key→value map, split into a fixed number of partitions
//! so that operations on unrelated keys never serialize against each other.
//!
//! ## Concurrency
//! - Each partition owns its own `parking_lot::RwLock<HashMap>`.
//! - Writers to the same partition serialize; readers proceed concurrently.
//! - There is no global lock.

use std::collections::HashMap;

use parking_lot::RwLock;

use crate::error::{LatticeError, Result};

/// Number of partitions in the hash table
const PARTITION_COUNT: usize = 16;

/// One partition of the hash table
#[derive(Default)]
struct Partition {
    data: RwLock<HashMap<String, String>>,
}

/// In-memory engine with fine-grained partition locking
pub struct Engine {
    partitions: [Partition; PARTITION_COUNT],
}

impl Engine {
    /// Create a new empty engine
    pub fn new() -> Self {
        Engine {
            partitions: std::array::from_fn(|_| Partition::default()),
        }
    }

    /// Store a key-value pair, overwriting any previous value
    pub fn set(&self, key: &str, value: &str) -> Result<()> {
        let partition = self.partition_for(key);

        let mut data = partition.data.write();
        data.insert(key.to_string(), value.to_string());
        Ok(())
    }

    /// Get the value for a key
    ///
    /// Returns `KeyNotFound` if the key is absent.
    pub fn get(&self, key: &str) -> Result<String> {
        let partition = self.partition_for(key);

        let data = partition.data.read();
        data.get(key).cloned().ok_or(LatticeError::KeyNotFound)
    }

    /// Remove a key
    ///
    /// Returns `KeyNotFound` if the key is absent.
    pub fn delete(&self, key: &str) -> Result<()> {
        let partition = self.partition_for(key);

        let mut data = partition.data.write();
        match data.remove(key) {
            Some(_) => Ok(()),
            None => Err(LatticeError::KeyNotFound),
        }
    }

    /// Total number of keys across all partitions (for tests/diagnostics)
    pub fn len(&self) -> usize {
        self.partitions.iter().map(|p| p.data.read().len()).sum()
    }

    /// Check whether the engine holds no keys
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Resolve the partition owning a key
    fn partition_for(&self, key: &str) -> &Partition {
        &self.partitions[partition_index(key)]
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

/// Compute the partition index for a key
///
/// Polynomial rolling hash over the key bytes with multiplier 31. Wrapping
/// arithmetic keeps the digest deterministic; the index only needs to be
/// stable within a single process.
fn partition_index(key: &str) -> usize {
    let mut hash: u64 = 0;
    for byte in key.bytes() {
        hash = hash.wrapping_mul(31).wrapping_add(u64::from(byte));
    }
    (hash % PARTITION_COUNT as u64) as usize
}
