//! Replica (slave) replication role
//!
//! Periodically pulls the next WAL segment from the primary, persists it into
//! the local WAL directory, and replays its records into the engine through a
//! callback. Transient failures are logged and retried next tick.

use std::fs;
use std::net::TcpStream;
use std::path::PathBuf;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam::channel::{bounded, tick, Receiver, RecvTimeoutError, Sender};

use crate::error::{LatticeError, Result};
use crate::wal::{self, WalRecord};

use super::protocol::{self, SyncRequest, SyncResponse};

/// Deadline for a single request/response exchange with the primary
const IO_TIMEOUT: Duration = Duration::from_secs(30);

/// How long `close` waits for the sync loop before giving up on the join
const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

/// Callback applying replicated records to the engine
///
/// Record-level apply errors are the callback's business to log; they never
/// abort the segment.
pub type ApplyRecords = Box<dyn Fn(&[WalRecord]) + Send>;

/// The replica role: a single cooperative sync loop
pub struct Replica {
    shutdown: Sender<()>,
    finished: Receiver<()>,
    sync_handle: Option<JoinHandle<()>>,
}

impl Replica {
    /// Start the sync loop
    ///
    /// `last_segment` starts at the newest file already present in
    /// `wal_directory`, so a restarted replica does not re-fetch history.
    pub fn start(
        master_address: String,
        wal_directory: PathBuf,
        sync_interval: Duration,
        max_segment_size: u64,
        apply: ApplyRecords,
    ) -> Result<Self> {
        let last_segment = wal::latest_segment(&wal_directory)?.unwrap_or_default();
        if !last_segment.is_empty() {
            tracing::info!(segment = %last_segment, "resuming replication from local segment");
        }

        let (shutdown_tx, shutdown_rx) = bounded(1);
        let (finished_tx, finished_rx) = bounded(1);

        let sync_loop = SyncLoop {
            master_address,
            wal_directory,
            sync_interval,
            // Segments ride base64-encoded (4/3 expansion), and an oversized
            // frame can push a segment past its bound; 2x leaves room for both
            max_response_size: max_segment_size * 2 + protocol::RESPONSE_OVERHEAD,
            last_segment,
            apply,
            shutdown: shutdown_rx,
            _finished: finished_tx,
        };

        let sync_handle = thread::Builder::new()
            .name("latticekv-repl-replica".to_string())
            .spawn(move || sync_loop.run())
            .map_err(|e| LatticeError::Network(format!("failed to spawn sync loop: {}", e)))?;

        Ok(Replica {
            shutdown: shutdown_tx,
            finished: finished_rx,
            sync_handle: Some(sync_handle),
        })
    }

    /// Cancel the sync loop and wait (bounded) for it to finish
    pub fn close(&mut self) {
        let _ = self.shutdown.send(());

        // The loop drops its end of `finished` on exit
        match self.finished.recv_timeout(CLOSE_TIMEOUT) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                if let Some(handle) = self.sync_handle.take() {
                    if handle.join().is_err() {
                        tracing::error!("replica sync loop panicked");
                    }
                }
                tracing::info!("replication replica closed");
            }
            Err(RecvTimeoutError::Timeout) => {
                // Leave the handle behind; the thread is detached on drop
                tracing::warn!("timed out waiting for replica sync loop to stop");
            }
        }
    }
}

struct SyncLoop {
    master_address: String,
    wal_directory: PathBuf,
    sync_interval: Duration,
    max_response_size: u64,
    last_segment: String,
    apply: ApplyRecords,
    shutdown: Receiver<()>,
    _finished: Sender<()>,
}

impl SyncLoop {
    fn run(mut self) {
        tracing::info!(
            master = %self.master_address,
            interval = ?self.sync_interval,
            "replica sync loop started"
        );

        // First sync fires immediately, then on every tick
        if let Err(e) = self.sync() {
            tracing::warn!(error = %e, "initial sync failed, will retry");
        }

        let ticker = tick(self.sync_interval);
        let shutdown = self.shutdown.clone();
        loop {
            crossbeam::select! {
                recv(shutdown) -> _ => {
                    tracing::debug!("replica sync loop stopped");
                    return;
                }
                recv(ticker) -> _ => {
                    if let Err(e) = self.sync() {
                        tracing::warn!(error = %e, "sync failed, will retry");
                    }
                }
            }
        }
    }

    /// One sync cycle: fresh connection, one request, one response
    fn sync(&mut self) -> Result<()> {
        let mut stream = TcpStream::connect(&self.master_address)
            .map_err(|e| LatticeError::Network(format!("failed to connect to master: {}", e)))?;
        stream.set_read_timeout(Some(IO_TIMEOUT))?;
        stream.set_write_timeout(Some(IO_TIMEOUT))?;

        let request = SyncRequest {
            last_segment_name: self.last_segment.clone(),
        };
        protocol::write_message(&mut stream, &request)?;

        let response: SyncResponse = protocol::read_message(&mut stream, self.max_response_size)?;

        if !response.succeed {
            return Err(LatticeError::Protocol(format!(
                "master reported sync failure: {}",
                response.error
            )));
        }

        if response.segment_name.is_empty() {
            tracing::debug!("no new WAL segments from master");
            return Ok(());
        }

        self.adopt_segment(response)
    }

    /// Persist a received segment and replay it into the engine
    fn adopt_segment(&mut self, response: SyncResponse) -> Result<()> {
        // Only plain segment names may touch the WAL directory
        if !is_valid_segment_name(&response.segment_name) {
            return Err(LatticeError::Protocol(format!(
                "master sent invalid segment name: {}",
                response.segment_name
            )));
        }

        let path = self.wal_directory.join(&response.segment_name);
        fs::write(&path, &response.segment_data)?;
        self.last_segment = response.segment_name.clone();

        let records = wal::read_segment(&path)?;
        tracing::info!(
            segment = %response.segment_name,
            records = records.len(),
            "applying replicated WAL segment"
        );

        (self.apply)(&records);
        Ok(())
    }
}

/// A segment name is acceptable only if it parses as a plain `wal_<N>.log`
fn is_valid_segment_name(name: &str) -> bool {
    !name.contains(['/', '\\']) && wal::parse_segment_index(name).is_some()
}
