//! Replication wire protocol
//!
//! One sync cycle is a single request/response exchange over a dedicated TCP
//! connection. Each message is the JSON encoding of its struct behind a u32
//! big-endian length prefix, so whole segments ship reliably regardless of
//! read buffer sizes.
//!
//! ```text
//! ┌──────────┬──────────────────────────────┐
//! │ Len (4)  │         JSON body            │
//! └──────────┴──────────────────────────────┘
//! ```

use std::io::{Read, Write};

use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::error::{LatticeError, Result};

/// Length prefix size in bytes
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Upper bound for request messages (requests only carry a segment name)
pub const MAX_REQUEST_SIZE: u64 = 64 << 10;

/// Headroom added on top of `max_segment_size` when capping responses
pub const RESPONSE_OVERHEAD: u64 = 64 << 10;

/// Request from replica to primary
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncRequest {
    /// Name of the last segment the replica holds; empty means "nothing yet"
    pub last_segment_name: String,
}

/// Response from primary to replica
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncResponse {
    /// Whether the primary handled the request
    pub succeed: bool,

    /// Failure description when `succeed` is false
    #[serde(default)]
    pub error: String,

    /// Name of the shipped segment; empty means the replica is up to date
    #[serde(default)]
    pub segment_name: String,

    /// Full content of the shipped segment, base64 inside the JSON body
    #[serde(default, with = "base64_bytes")]
    pub segment_data: Vec<u8>,
}

impl SyncResponse {
    /// The replica already holds every segment
    pub fn up_to_date() -> Self {
        Self {
            succeed: true,
            ..Default::default()
        }
    }

    /// Ship one whole segment
    pub fn segment(name: String, data: Vec<u8>) -> Self {
        Self {
            succeed: true,
            segment_name: name,
            segment_data: data,
            ..Default::default()
        }
    }

    /// The primary failed to handle the request
    pub fn failure(message: String) -> Self {
        Self {
            succeed: false,
            error: message,
            ..Default::default()
        }
    }
}

/// Write one length-prefixed message
pub fn write_message<W: Write, T: Serialize>(writer: &mut W, message: &T) -> Result<()> {
    let body = serde_json::to_vec(message)?;
    if body.len() > u32::MAX as usize {
        return Err(LatticeError::Protocol(format!(
            "message too large to frame: {} bytes",
            body.len()
        )));
    }

    writer.write_all(&(body.len() as u32).to_be_bytes())?;
    writer.write_all(&body)?;
    writer.flush()?;
    Ok(())
}

/// Segment bytes as a base64 string, keeping the JSON body compact enough
/// that a size cap proportional to the segment bound holds
mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        STANDARD.encode(bytes).serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}

/// Read one length-prefixed message, rejecting bodies above `max_size`
pub fn read_message<R: Read, T: DeserializeOwned>(reader: &mut R, max_size: u64) -> Result<T> {
    let mut prefix = [0u8; LENGTH_PREFIX_SIZE];
    reader.read_exact(&mut prefix)?;

    let body_len = u64::from(u32::from_be_bytes(prefix));
    if body_len > max_size {
        return Err(LatticeError::Protocol(format!(
            "message too large: {} bytes (max {})",
            body_len, max_size
        )));
    }

    let mut body = vec![0u8; body_len as usize];
    reader.read_exact(&mut body)?;

    serde_json::from_slice(&body)
        .map_err(|e| LatticeError::Protocol(format!("failed to decode message: {}", e)))
}
