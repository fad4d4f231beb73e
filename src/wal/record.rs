//! WAL record definitions and frame encoding
//!
//! A record is one logged mutation; a frame is one batch of records encoded
//! as a JSON array terminated by a newline. The frame is the atomic unit of
//! WAL durability: it is written with a single write call and never crosses
//! a segment boundary.

use serde::{Deserialize, Serialize};

use crate::error::{LatticeError, Result};

/// Operations that can be logged
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operation {
    #[serde(rename = "SET")]
    Set,

    #[serde(rename = "DEL")]
    Del,
}

impl Operation {
    /// Wire/display name of the operation
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Set => "SET",
            Operation::Del => "DEL",
        }
    }

    /// Number of arguments the operation carries
    fn arity(&self) -> usize {
        match self {
            Operation::Set => 2,
            Operation::Del => 1,
        }
    }
}

/// A single entry in the WAL
///
/// `args` holds `[key, value]` for SET and `[key]` for DEL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalRecord {
    /// Log Sequence Number - monotonically increasing
    pub lsn: u64,

    /// The operation that was logged
    pub operation: Operation,

    /// Operation arguments
    pub args: Vec<String>,
}

impl WalRecord {
    pub fn new(lsn: u64, operation: Operation, args: Vec<String>) -> Self {
        Self {
            lsn,
            operation,
            args,
        }
    }

    /// Check the argument-count invariant (2 for SET, 1 for DEL)
    pub fn validate(&self) -> Result<()> {
        if self.args.len() != self.operation.arity() {
            return Err(LatticeError::WalRecovery(format!(
                "{} record with {} arguments at LSN {}",
                self.operation.as_str(),
                self.args.len(),
                self.lsn
            )));
        }
        Ok(())
    }

    /// The key the record operates on
    pub fn key(&self) -> &str {
        &self.args[0]
    }
}

/// Encode one batch of records as a frame: JSON array plus `\n` terminator
pub fn encode_frame(records: &[WalRecord]) -> Result<Vec<u8>> {
    let mut frame = serde_json::to_vec(records)?;
    frame.push(b'\n');
    Ok(frame)
}

/// Decode one frame (a single line, without requiring the terminator)
pub fn decode_frame(line: &str) -> Result<Vec<WalRecord>> {
    let records: Vec<WalRecord> = serde_json::from_str(line)?;
    for record in &records {
        record.validate()?;
    }
    Ok(records)
}
