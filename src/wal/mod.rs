//! Write-Ahead Log (WAL) Module
//!
//! Durability anchor of the store and the unit of replication.
//!
//! ## Responsibilities
//! - Assign Log Sequence Numbers (LSN) in append order
//! - Batch records and flush them as single frames (write + fsync)
//! - Rotate segments before a frame would overflow `max_segment_size`
//! - Replay every segment in order for crash recovery
//!
//! ## On-disk layout
//! ```text
//! data_directory/
//! ├── wal_0.log      sealed segment (immutable)
//! ├── wal_1.log      sealed segment (immutable)
//! └── wal_2.log      active segment (append-only)
//! ```
//!
//! Each segment is a sequence of frames; each frame is a JSON array of
//! records terminated by `\n`, written in a single write call. Frames never
//! straddle segment boundaries.

mod reader;
mod record;
mod segment;
mod writer;

pub use reader::{read_segment, recover};
pub use record::{Operation, WalRecord};
pub use segment::{latest_segment, list_segments, parse_segment_index, segment_file_name};
pub use writer::{Wal, WalConfig, WriteFuture};
