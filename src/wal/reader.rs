//! WAL Reader
//!
//! Decodes frames back out of segment files. Used for crash recovery at
//! boot and by the replica to apply freshly received segments.

use std::fs;
use std::path::Path;

use crate::error::{LatticeError, Result};

use super::record::{self, WalRecord};
use super::segment;

/// Read every record from a single segment file, in frame order
///
/// Every line must decode as a complete frame.
pub fn read_segment(path: &Path) -> Result<Vec<WalRecord>> {
    read_segment_inner(path, false)
}

/// Read every record from every segment in `dir`, in segment order
///
/// Segment order is numeric filename order, which equals creation order, so
/// the returned records are in ascending LSN order.
///
/// A torn trailing frame — an unterminated, undecodable final line of the
/// final segment, as left behind by a crash between write and fsync — is
/// dropped with a warning. Any other decode failure is a recovery error.
pub fn recover(dir: &Path) -> Result<Vec<WalRecord>> {
    let segments = segment::list_segments(dir)?;
    let mut records = Vec::new();

    for (position, name) in segments.iter().enumerate() {
        let last_segment = position == segments.len() - 1;
        records.extend(read_segment_inner(&dir.join(name), last_segment)?);
    }

    Ok(records)
}

fn read_segment_inner(path: &Path, tolerate_torn_tail: bool) -> Result<Vec<WalRecord>> {
    let content = fs::read_to_string(path).map_err(|e| {
        LatticeError::WalRecovery(format!("failed to read {}: {}", path.display(), e))
    })?;

    let terminated = content.ends_with('\n');
    let lines: Vec<&str> = content.lines().filter(|line| !line.is_empty()).collect();

    let mut records = Vec::new();
    for (position, line) in lines.iter().enumerate() {
        match record::decode_frame(line) {
            Ok(frame) => records.extend(frame),
            Err(e) => {
                let torn_tail = tolerate_torn_tail && position == lines.len() - 1 && !terminated;
                if torn_tail {
                    tracing::warn!(
                        segment = %path.display(),
                        "dropping torn trailing frame"
                    );
                    break;
                }
                return Err(LatticeError::WalRecovery(format!(
                    "failed to decode frame {} of {}: {}",
                    position,
                    path.display(),
                    e
                )));
            }
        }
    }

    Ok(records)
}
