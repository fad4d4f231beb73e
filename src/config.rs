//! Configuration for latticekv
//!
//! Loads the YAML configuration file used by the server binary and converts
//! the file-level sections into the runtime configs consumed by the WAL and
//! replication subsystems.
//!
//! Every section and every key is optional: missing keys take defaults and
//! unknown keys are ignored, so old config files keep working.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::{LatticeError, Result};
use crate::replication::{ReplicaType, ReplicationConfig};
use crate::wal::WalConfig;

/// Default client-facing listen address
pub const DEFAULT_ADDRESS: &str = "127.0.0.1:3223";

/// Default replication listen/connect address
pub const DEFAULT_MASTER_ADDRESS: &str = "127.0.0.1:3232";

/// Default per-message buffer size (4 KiB)
pub const DEFAULT_MESSAGE_SIZE: usize = 4 << 10;

/// Main configuration, mirroring the YAML file layout
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub engine: EngineSection,
    pub network: NetworkSection,
    pub logging: LoggingSection,
    pub wal: WalSection,
    pub replication: ReplicationSection,
}

/// `engine:` section
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineSection {
    /// Engine implementation; only `in_memory` is supported
    #[serde(rename = "type")]
    pub engine_type: String,
}

/// `network:` section
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NetworkSection {
    /// Listen address (host:port)
    pub address: String,

    /// Max concurrent client connections
    pub max_connections: usize,

    /// Per-message buffer size, e.g. "4KB"
    pub max_message_size: String,

    /// Read/write deadline for idle connections
    #[serde(with = "humantime_serde")]
    pub idle_timeout: Duration,
}

/// `logging:` section
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    /// Log level: trace, debug, info, warn, error
    pub level: String,

    /// Log sink: "stdout", "stderr", or a file path
    pub output: String,
}

/// `wal:` section
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WalSection {
    pub enabled: bool,

    /// Records per batch before an immediate flush
    pub flushing_batch_size: usize,

    /// Max time a pending batch waits for the flusher, e.g. "10ms"
    #[serde(with = "humantime_serde")]
    pub flushing_batch_timeout: Duration,

    /// Segment rotation threshold, e.g. "10MB"
    pub max_segment_size: String,

    /// Directory for WAL segments
    pub data_directory: PathBuf,
}

/// `replication:` section
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReplicationSection {
    pub enabled: bool,

    /// "master" or "slave"
    pub replica_type: String,

    /// Address the master listens on / the slave connects to
    pub master_address: String,

    /// How often the slave polls the master
    #[serde(with = "humantime_serde")]
    pub sync_interval: Duration,
}

// =============================================================================
// Defaults
// =============================================================================

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            engine_type: "in_memory".to_string(),
        }
    }
}

impl Default for NetworkSection {
    fn default() -> Self {
        Self {
            address: DEFAULT_ADDRESS.to_string(),
            max_connections: 100,
            max_message_size: "4KB".to_string(),
            idle_timeout: Duration::from_secs(5 * 60),
        }
    }
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            output: "stdout".to_string(),
        }
    }
}

impl Default for WalSection {
    fn default() -> Self {
        Self {
            enabled: false,
            flushing_batch_size: 100,
            flushing_batch_timeout: Duration::from_millis(10),
            max_segment_size: "10MB".to_string(),
            data_directory: PathBuf::from("./lattice/wal"),
        }
    }
}

impl Default for ReplicationSection {
    fn default() -> Self {
        Self {
            enabled: false,
            replica_type: "master".to_string(),
            master_address: DEFAULT_MASTER_ADDRESS.to_string(),
            sync_interval: Duration::from_secs(1),
        }
    }
}

// =============================================================================
// Loading and conversion
// =============================================================================

impl Config {
    /// Load configuration from a YAML file
    pub fn load(path: &Path) -> Result<Self> {
        let data = fs::read_to_string(path)?;
        serde_yaml::from_str(&data)
            .map_err(|e| LatticeError::Config(format!("failed to parse {}: {}", path.display(), e)))
    }

    /// Validate cross-section constraints
    pub fn validate(&self) -> Result<()> {
        if self.engine.engine_type != "in_memory" {
            return Err(LatticeError::Config(format!(
                "unsupported engine type: {}",
                self.engine.engine_type
            )));
        }
        if self.replication.enabled && !self.wal.enabled {
            return Err(LatticeError::ReplicationRequiresWal);
        }
        Ok(())
    }

    /// Runtime WAL config, or `None` when the WAL is disabled
    ///
    /// Out-of-range values fall back to the documented defaults
    /// (batch 100, timeout 10 ms, segment size 10 MiB).
    pub fn wal_config(&self) -> Result<Option<WalConfig>> {
        if !self.wal.enabled {
            return Ok(None);
        }

        let mut batch_size = self.wal.flushing_batch_size;
        if batch_size == 0 {
            batch_size = 100;
        }

        let mut batch_timeout = self.wal.flushing_batch_timeout;
        if batch_timeout.is_zero() {
            batch_timeout = Duration::from_millis(10);
        }

        let mut max_segment_size = parse_size(&self.wal.max_segment_size)?;
        if max_segment_size == 0 {
            max_segment_size = 10 << 20;
        }

        Ok(Some(WalConfig {
            flushing_batch_size: batch_size,
            flushing_batch_timeout: batch_timeout,
            max_segment_size,
            data_directory: self.wal.data_directory.clone(),
        }))
    }

    /// Runtime replication config, or `None` when replication is disabled
    pub fn replication_config(&self) -> Option<ReplicationConfig> {
        if !self.replication.enabled {
            return None;
        }

        // Anything that is not explicitly a slave runs as master
        let replica_type = match self.replication.replica_type.as_str() {
            "slave" => ReplicaType::Slave,
            _ => ReplicaType::Master,
        };

        let mut sync_interval = self.replication.sync_interval;
        if sync_interval.is_zero() {
            sync_interval = Duration::from_secs(1);
        }

        Some(ReplicationConfig {
            replica_type,
            master_address: self.replication.master_address.clone(),
            sync_interval,
            max_connections: self.network.max_connections,
        })
    }

    /// Per-message buffer size in bytes for the client protocol
    pub fn message_buffer_size(&self) -> usize {
        match parse_size(&self.network.max_message_size) {
            Ok(0) | Err(_) => DEFAULT_MESSAGE_SIZE,
            Ok(size) => size as usize,
        }
    }
}

/// Parse a human-readable byte size: "100", "4KB", "10MB", "1GB"
pub fn parse_size(input: &str) -> Result<u64> {
    let input = input.trim();
    if input.is_empty() {
        return Ok(0);
    }

    let split = input
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(input.len());
    let (digits, suffix) = input.split_at(split);

    let value: u64 = digits
        .parse()
        .map_err(|_| LatticeError::Config(format!("invalid size: {}", input)))?;

    let multiplier: u64 = match suffix.trim().to_ascii_uppercase().as_str() {
        "" | "B" => 1,
        "KB" => 1 << 10,
        "MB" => 1 << 20,
        "GB" => 1 << 30,
        other => {
            return Err(LatticeError::Config(format!(
                "invalid size suffix: {}",
                other
            )))
        }
    };

    Ok(value * multiplier)
}
