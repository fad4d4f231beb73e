//! Storage Façade
//!
//! The role-aware front of the store. Owns the engine, the WAL and the
//! replication role, and serializes the write ordering contract:
//! WAL first (durable ack), engine second.
//!
//! ## Boot order
//! 1. Build the empty engine.
//! 2. If the WAL is enabled: open it, replay every recovered record into the
//!    engine, and let its flusher run.
//! 3. If replication is enabled (requires the WAL): start the primary or
//!    replica role and record which side of the pair this node plays.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::engine::Engine;
use crate::error::{LatticeError, Result};
use crate::replication::{
    ApplyRecords, Primary, Replica, ReplicaType, ReplicationConfig, Role,
};
use crate::wal::{Operation, Wal, WalConfig, WalRecord};

/// Options for building a storage instance
#[derive(Default)]
pub struct StorageOptions {
    /// WAL configuration; `None` disables durability
    pub wal: Option<WalConfig>,

    /// Replication configuration; `None` runs single-node
    pub replication: Option<ReplicationConfig>,
}

/// The storage façade: engine + WAL + replication role
pub struct Storage {
    engine: Arc<Engine>,
    wal: Option<Arc<Wal>>,
    replication: Mutex<Option<Role>>,
    is_master: bool,
}

impl Storage {
    /// Build and start a storage instance
    pub fn open(options: StorageOptions) -> Result<Self> {
        let engine = Arc::new(Engine::new());

        let wal = match &options.wal {
            Some(config) => {
                let wal = Wal::open(config.clone())?;

                let records = wal.recover()?;
                if !records.is_empty() {
                    tracing::info!(records = records.len(), "replaying WAL into engine");
                }
                apply_records(&engine, &records);

                Some(Arc::new(wal))
            }
            None => None,
        };

        let mut is_master = true;
        let replication = match &options.replication {
            Some(config) => {
                // Replication ships WAL segments; it cannot run without them
                let (Some(wal), Some(wal_config)) = (&wal, &options.wal) else {
                    return Err(LatticeError::ReplicationRequiresWal);
                };

                let role = start_role(config, wal_config, wal, &engine)?;
                is_master = role.is_master();
                Some(role)
            }
            None => None,
        };

        Ok(Storage {
            engine,
            wal,
            replication: Mutex::new(replication),
            is_master,
        })
    }

    /// Store a key-value pair (primary only)
    ///
    /// With the WAL enabled the engine is touched only after the record's
    /// batch is durable; a failed append leaves the engine unchanged.
    pub fn set(&self, key: &str, value: &str) -> Result<()> {
        if !self.is_master {
            return Err(LatticeError::WriteOnReplica);
        }

        if let Some(wal) = &self.wal {
            if let Err(e) = wal.append_set(key, value).wait() {
                tracing::error!(key, error = %e, "failed to write SET to WAL");
                return Err(e);
            }
        }

        self.engine.set(key, value)?;
        tracing::debug!(key, value_length = value.len(), "value set");
        Ok(())
    }

    /// Get the value for a key; always served from the local engine
    pub fn get(&self, key: &str) -> Result<String> {
        match self.engine.get(key) {
            Ok(value) => {
                tracing::debug!(key, "value retrieved");
                Ok(value)
            }
            Err(LatticeError::KeyNotFound) => {
                tracing::debug!(key, "key not found");
                Err(LatticeError::KeyNotFound)
            }
            Err(e) => Err(e),
        }
    }

    /// Remove a key (primary only)
    pub fn delete(&self, key: &str) -> Result<()> {
        if !self.is_master {
            return Err(LatticeError::WriteOnReplica);
        }

        if let Some(wal) = &self.wal {
            if let Err(e) = wal.append_delete(key).wait() {
                tracing::error!(key, error = %e, "failed to write DEL to WAL");
                return Err(e);
            }
        }

        self.engine.delete(key)?;
        tracing::debug!(key, "key deleted");
        Ok(())
    }

    /// Whether this node accepts writes
    pub fn is_master(&self) -> bool {
        self.is_master
    }

    /// Close the WAL (flushing the pending batch) and the replication role
    ///
    /// Idempotent.
    pub fn close(&self) {
        if let Some(wal) = &self.wal {
            wal.close();
        }

        if let Some(mut role) = self.replication.lock().take() {
            role.close();
        }
    }
}

impl Drop for Storage {
    fn drop(&mut self) {
        self.close();
    }
}

/// Start the replication role requested by the config
fn start_role(
    config: &ReplicationConfig,
    wal_config: &WalConfig,
    wal: &Arc<Wal>,
    engine: &Arc<Engine>,
) -> Result<Role> {
    match config.replica_type {
        ReplicaType::Master => {
            let primary = Primary::start(
                &config.master_address,
                wal.directory().to_path_buf(),
                config.max_connections,
            )?;
            Ok(Role::Primary(primary))
        }
        ReplicaType::Slave => {
            let engine = Arc::clone(engine);
            let apply: ApplyRecords = Box::new(move |records| apply_records(&engine, records));

            let replica = Replica::start(
                config.master_address.clone(),
                wal.directory().to_path_buf(),
                config.sync_interval,
                wal_config.max_segment_size,
                apply,
            )?;
            Ok(Role::Replica(replica))
        }
    }
}

/// Replay WAL records into the engine
///
/// Shared by boot recovery and the replica's segment apply. A DEL of a
/// missing key is tolerated (replays are idempotent); any other per-record
/// failure is logged and the rest of the batch still applies.
fn apply_records(engine: &Engine, records: &[WalRecord]) {
    for record in records {
        let result = match record.operation {
            Operation::Set => engine.set(&record.args[0], &record.args[1]),
            Operation::Del => match engine.delete(&record.args[0]) {
                Err(LatticeError::KeyNotFound) => Ok(()),
                other => other,
            },
        };

        if let Err(e) = result {
            tracing::error!(
                lsn = record.lsn,
                operation = record.operation.as_str(),
                key = record.key(),
                error = %e,
                "failed to apply WAL record"
            );
        }
    }
}
