//! Replication Module
//!
//! Pull-based primary/replica replication of whole WAL segments.
//!
//! ## Responsibilities
//! - Primary: serve segment-fetch requests from replicas over TCP
//! - Replica: poll the primary, persist received segments, replay them
//! - Shared: the request/response codec and next-segment selection
//!
//! The primary ships segments as opaque byte blobs; the replica writes them
//! into its own WAL directory and decodes them with the standard WAL reader,
//! so replica state is always reconstructible the same way as local state.

mod primary;
mod protocol;
mod replica;

use std::time::Duration;

pub use primary::Primary;
pub use protocol::{read_message, write_message, SyncRequest, SyncResponse};
pub use replica::{ApplyRecords, Replica};

/// Which side of the replication pair a node plays
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplicaType {
    Master,
    Slave,
}

/// Runtime replication configuration
#[derive(Debug, Clone)]
pub struct ReplicationConfig {
    pub replica_type: ReplicaType,

    /// Address the master listens on and the slave connects to
    pub master_address: String,

    /// How often the slave polls the master
    pub sync_interval: Duration,

    /// Admission cap for concurrent replica connections on the master
    pub max_connections: usize,
}

/// A started replication role, owned by the storage façade
pub enum Role {
    Primary(Primary),
    Replica(Replica),
}

impl Role {
    /// Whether this node accepts writes
    pub fn is_master(&self) -> bool {
        matches!(self, Role::Primary(_))
    }

    /// Stop the role's background task
    pub fn close(&mut self) {
        match self {
            Role::Primary(primary) => primary.close(),
            Role::Replica(replica) => replica.close(),
        }
    }
}
