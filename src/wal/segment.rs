//! WAL segment naming and listing
//!
//! Segments are files named `wal_<N>.log` inside the WAL data directory.
//! Listing order must agree with creation order, so the listing parses `<N>`
//! and sorts numerically rather than lexicographically (`wal_10.log` would
//! otherwise sort before `wal_2.log`).

use std::fs;
use std::path::Path;

use crate::error::Result;

/// Segment filename prefix
pub const SEGMENT_PREFIX: &str = "wal_";

/// Segment filename extension
pub const SEGMENT_EXTENSION: &str = ".log";

/// Build the filename for segment `index`: `wal_<index>.log`
pub fn segment_file_name(index: u64) -> String {
    format!("{}{}{}", SEGMENT_PREFIX, index, SEGMENT_EXTENSION)
}

/// Parse the segment index out of a filename
///
/// `"wal_42.log"` → `Some(42)`; anything else → `None`.
pub fn parse_segment_index(name: &str) -> Option<u64> {
    name.strip_prefix(SEGMENT_PREFIX)?
        .strip_suffix(SEGMENT_EXTENSION)?
        .parse()
        .ok()
}

/// List segment filenames in a directory, ordered by segment index
///
/// Files that do not match `wal_<N>.log` are skipped.
pub fn list_segments(dir: &Path) -> Result<Vec<String>> {
    let mut segments: Vec<(u64, String)> = Vec::new();

    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }

        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };

        if let Some(index) = parse_segment_index(name) {
            segments.push((index, name.to_string()));
        }
    }

    segments.sort_by_key(|(index, _)| *index);
    Ok(segments.into_iter().map(|(_, name)| name).collect())
}

/// The newest segment in a directory, if any
pub fn latest_segment(dir: &Path) -> Result<Option<String>> {
    Ok(list_segments(dir)?.pop())
}

/// Index for the next segment to create: one past the newest existing one
///
/// Derived from the highest index rather than the file count, so the new
/// name sorts after every existing segment even if the sequence has gaps.
pub(crate) fn next_index(segments: &[String]) -> u64 {
    segments
        .last()
        .and_then(|name| parse_segment_index(name))
        .map(|index| index + 1)
        .unwrap_or(0)
}
