//! The WAL itself: LSN assignment, batching, and the flusher task
//!
//! ## Write path
//! 1. `append` assigns the next LSN under the pending mutex and buffers the
//!    record; a batch that reaches `flushing_batch_size` is handed to the
//!    flusher immediately, otherwise the flusher's ticker drains it.
//! 2. The flusher (exactly one thread per WAL) encodes the batch as a single
//!    frame, rotates the segment if the frame would overflow it, writes the
//!    frame with one write call and fsyncs.
//! 3. Only after a successful fsync are the batch's futures resolved; on any
//!    I/O error every future in the batch resolves with that error and the
//!    flusher keeps serving later batches.
//!
//! The flusher is the sole owner of the active file descriptor and the
//! segment counter. No lock is held across disk I/O.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam::channel::{bounded, tick, unbounded, Receiver, Sender};
use parking_lot::Mutex;

use crate::error::{LatticeError, Result};

use super::reader;
use super::record::{self, Operation, WalRecord};
use super::segment;

/// Runtime WAL configuration (already normalized by the config layer)
#[derive(Debug, Clone)]
pub struct WalConfig {
    /// Records per batch before an immediate hand-off to the flusher
    pub flushing_batch_size: usize,

    /// Max time a pending batch waits before the ticker drains it
    pub flushing_batch_timeout: Duration,

    /// Segment rotation threshold in bytes
    pub max_segment_size: u64,

    /// Directory holding `wal_<N>.log` segments
    pub data_directory: PathBuf,
}

/// Single-shot handle that resolves once the batch carrying the record has
/// been written and fsynced to the active segment
pub struct WriteFuture {
    done: Receiver<Result<()>>,
}

impl WriteFuture {
    /// Block until the record is durable (or the write failed)
    pub fn wait(self) -> Result<()> {
        match self.done.recv() {
            Ok(result) => result,
            Err(_) => Err(LatticeError::WalWrite(
                "flusher exited before acknowledging the batch".to_string(),
            )),
        }
    }
}

/// A record queued for the flusher, with its acknowledgement channel
struct WriteRequest {
    record: WalRecord,
    done: Sender<Result<()>>,
}

/// State shared between appenders and the flusher
struct Pending {
    batch: Vec<WriteRequest>,
    next_lsn: u64,
}

/// The write-ahead log
///
/// Created over a data directory: existing segments are scanned to restore
/// the LSN counter; writes go to a brand-new segment, never into an old one
/// (rotated segments are immutable). Closed by draining the pending batch,
/// fsyncing and joining the flusher.
pub struct Wal {
    data_directory: PathBuf,
    flushing_batch_size: usize,
    pending: Arc<Mutex<Pending>>,
    hand_off: Sender<Vec<WriteRequest>>,
    shutdown: Sender<()>,
    flusher: Mutex<Option<JoinHandle<()>>>,
}

impl Wal {
    /// Open the WAL over `config.data_directory` and start the flusher
    ///
    /// Creates the directory if needed and scans existing segments for
    /// `next_lsn = max(seen LSN) + 1`. The active segment is opened lazily
    /// at the first flush, named one past the newest existing segment: a
    /// restart never appends to an old segment, and a node that never
    /// writes (a replica) never leaves an empty segment behind.
    pub fn open(config: WalConfig) -> Result<Self> {
        fs::create_dir_all(&config.data_directory)?;

        let segments = segment::list_segments(&config.data_directory)?;

        let mut next_lsn = 0;
        if !segments.is_empty() {
            for record in reader::recover(&config.data_directory)? {
                next_lsn = next_lsn.max(record.lsn + 1);
            }
        }

        tracing::info!(
            directory = %config.data_directory.display(),
            segments = segments.len(),
            next_lsn,
            "WAL opened"
        );

        let pending = Arc::new(Mutex::new(Pending {
            batch: Vec::new(),
            next_lsn,
        }));

        let (hand_off_tx, hand_off_rx) = unbounded();
        let (shutdown_tx, shutdown_rx) = bounded(1);

        let flusher = Flusher {
            data_directory: config.data_directory.clone(),
            max_segment_size: config.max_segment_size,
            file: None,
            current_size: 0,
            next_segment_index: segment::next_index(&segments),
            pending: Arc::clone(&pending),
            hand_off: hand_off_rx,
            shutdown: shutdown_rx,
            ticker: tick(config.flushing_batch_timeout),
        };

        let handle = thread::Builder::new()
            .name("latticekv-wal-flusher".to_string())
            .spawn(move || flusher.run())
            .map_err(|e| LatticeError::WalWrite(format!("failed to spawn flusher: {}", e)))?;

        Ok(Wal {
            data_directory: config.data_directory,
            flushing_batch_size: config.flushing_batch_size,
            pending,
            hand_off: hand_off_tx,
            shutdown: shutdown_tx,
            flusher: Mutex::new(Some(handle)),
        })
    }

    /// Append an operation to the log
    ///
    /// Assigns the next LSN and returns a future that resolves once the
    /// batch carrying this record is durable.
    pub fn append(&self, operation: Operation, args: Vec<String>) -> WriteFuture {
        let (done_tx, done_rx) = bounded(1);

        let full_batch = {
            let mut pending = self.pending.lock();
            let record = WalRecord::new(pending.next_lsn, operation, args);
            pending.next_lsn += 1;
            pending.batch.push(WriteRequest {
                record,
                done: done_tx,
            });

            if pending.batch.len() >= self.flushing_batch_size {
                Some(std::mem::take(&mut pending.batch))
            } else {
                None
            }
        };

        // Hand off outside the mutex; the channel is unbounded so this
        // never blocks an appender.
        if let Some(batch) = full_batch {
            let _ = self.hand_off.send(batch);
        }

        WriteFuture { done: done_rx }
    }

    /// Append a SET operation
    pub fn append_set(&self, key: &str, value: &str) -> WriteFuture {
        self.append(Operation::Set, vec![key.to_string(), value.to_string()])
    }

    /// Append a DEL operation
    pub fn append_delete(&self, key: &str) -> WriteFuture {
        self.append(Operation::Del, vec![key.to_string()])
    }

    /// Read back every record from every segment, in LSN order
    pub fn recover(&self) -> Result<Vec<WalRecord>> {
        reader::recover(&self.data_directory)
    }

    /// The WAL data directory (the replication roles only ever hold this
    /// path, never the WAL itself)
    pub fn directory(&self) -> &Path {
        &self.data_directory
    }

    /// Flush the pending batch, fsync, and stop the flusher
    ///
    /// Idempotent; blocks until the flusher has drained and exited.
    pub fn close(&self) {
        let Some(handle) = self.flusher.lock().take() else {
            return;
        };

        let _ = self.shutdown.send(());
        if handle.join().is_err() {
            tracing::error!("WAL flusher panicked");
        }
    }
}

impl Drop for Wal {
    fn drop(&mut self) {
        self.close();
    }
}

fn open_segment(path: &Path) -> Result<File> {
    Ok(OpenOptions::new().create(true).append(true).open(path)?)
}

// =============================================================================
// Flusher
// =============================================================================

/// The single writer task; owns the active segment file and the segment
/// counter for rotation
struct Flusher {
    data_directory: PathBuf,
    max_segment_size: u64,
    /// Active segment; `None` until the first flush
    file: Option<File>,
    current_size: u64,
    next_segment_index: u64,
    pending: Arc<Mutex<Pending>>,
    hand_off: Receiver<Vec<WriteRequest>>,
    shutdown: Receiver<()>,
    ticker: Receiver<Instant>,
}

impl Flusher {
    fn run(mut self) {
        let hand_off = self.hand_off.clone();
        let ticker = self.ticker.clone();
        let shutdown = self.shutdown.clone();

        loop {
            crossbeam::select! {
                recv(hand_off) -> batch => {
                    if let Ok(batch) = batch {
                        self.write_batch(batch);
                    }
                }
                recv(ticker) -> _ => {
                    self.drain();
                }
                recv(shutdown) -> _ => {
                    // Close path: flush everything unconditionally
                    self.drain();
                    tracing::debug!("WAL flusher stopped");
                    return;
                }
            }
        }
    }

    /// Write queued hand-offs first, then the pending batch
    ///
    /// Hand-offs entered the channel in LSN order and always carry older
    /// records than the pending batch, so this preserves on-disk LSN order.
    fn drain(&mut self) {
        while let Ok(batch) = self.hand_off.try_recv() {
            self.write_batch(batch);
        }

        let batch = std::mem::take(&mut self.pending.lock().batch);
        self.write_batch(batch);
    }

    /// Write one batch as one frame: rotate if needed, write, fsync, resolve
    fn write_batch(&mut self, batch: Vec<WriteRequest>) {
        if batch.is_empty() {
            return;
        }

        let records: Vec<WalRecord> = batch.iter().map(|request| request.record.clone()).collect();
        let frame = match record::encode_frame(&records) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::error!(error = %e, "failed to encode WAL batch");
                fail_batch(batch, &e);
                return;
            }
        };

        if let Err(e) = self.prepare_segment(frame.len() as u64) {
            tracing::error!(error = %e, "failed to open WAL segment");
            fail_batch(batch, &e);
            return;
        }
        let file = match self.file.as_mut() {
            Some(file) => file,
            None => {
                fail_batch(batch, &LatticeError::WalWrite("no active segment".to_string()));
                return;
            }
        };

        if let Err(e) = file.write_all(&frame) {
            tracing::error!(error = %e, "failed to write WAL batch");
            fail_batch(batch, &LatticeError::Io(e));
            return;
        }

        if let Err(e) = file.sync_all() {
            tracing::error!(error = %e, "failed to fsync WAL segment");
            fail_batch(batch, &LatticeError::Io(e));
            return;
        }

        self.current_size += frame.len() as u64;

        for request in batch {
            let _ = request.done.send(Ok(()));
        }
    }

    /// Make sure a segment with room for the frame is open
    ///
    /// Opens the first segment lazily and seals/rotates the active one when
    /// the frame would overflow it. An empty active segment is never
    /// rotated: a frame larger than `max_segment_size` still has to land in
    /// exactly one segment.
    fn prepare_segment(&mut self, frame_len: u64) -> Result<()> {
        let needs_new_segment = match self.file {
            None => true,
            Some(_) => {
                self.current_size > 0 && self.current_size + frame_len > self.max_segment_size
            }
        };
        if !needs_new_segment {
            return Ok(());
        }

        let path = self
            .data_directory
            .join(segment::segment_file_name(self.next_segment_index));
        let file = open_segment(&path)?;
        self.current_size = file.metadata()?.len();
        // The previous file descriptor closes when the assignment drops it
        self.file = Some(file);
        self.next_segment_index += 1;

        tracing::debug!(segment = %path.display(), "opened WAL segment");
        Ok(())
    }
}

/// Resolve every future in the batch with the same error
fn fail_batch(batch: Vec<WriteRequest>, error: &LatticeError) {
    let message = error.to_string();
    for request in batch {
        let _ = request.done.send(Err(LatticeError::WalWrite(message.clone())));
    }
}
