//! Primary (master) replication role
//!
//! Listens on the replication address and serves segment-fetch requests from
//! replicas: one request per connection, whole segments per response. Holds
//! only the WAL directory path, never the WAL itself.

use std::io;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam::channel::{bounded, Receiver, Sender};

use crate::error::{LatticeError, Result};
use crate::wal;

use super::protocol::{self, SyncRequest, SyncResponse, MAX_REQUEST_SIZE};

/// Deadline for a single request/response exchange with a replica
const IO_TIMEOUT: Duration = Duration::from_secs(30);

/// How long the accept loop sleeps when no connection is pending
const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// The primary role: accept loop plus per-connection handlers
pub struct Primary {
    local_addr: SocketAddr,
    shutdown: Arc<AtomicBool>,
    accept_handle: Option<JoinHandle<()>>,
}

impl Primary {
    /// Bind the replication listener and start the accept loop
    pub fn start(address: &str, wal_directory: PathBuf, max_connections: usize) -> Result<Self> {
        let listener = TcpListener::bind(address).map_err(|e| {
            LatticeError::Network(format!("failed to bind replication listener {}: {}", address, e))
        })?;
        listener.set_nonblocking(true)?;
        let local_addr = listener.local_addr()?;

        tracing::info!(
            address,
            wal_directory = %wal_directory.display(),
            "replication primary listening"
        );

        let shutdown = Arc::new(AtomicBool::new(false));
        // Bounded channel as the admission semaphore: a slot is held for the
        // lifetime of each connection handler
        let (slot_tx, slot_rx) = bounded::<()>(max_connections.max(1));

        let accept = AcceptLoop {
            listener,
            wal_directory,
            shutdown: Arc::clone(&shutdown),
            slot_tx,
            slot_rx,
        };

        let accept_handle = thread::Builder::new()
            .name("latticekv-repl-primary".to_string())
            .spawn(move || accept.run())
            .map_err(|e| LatticeError::Network(format!("failed to spawn accept loop: {}", e)))?;

        Ok(Primary {
            local_addr,
            shutdown,
            accept_handle: Some(accept_handle),
        })
    }

    /// The address the listener is actually bound to
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop accepting and join the accept loop
    pub fn close(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        if let Some(handle) = self.accept_handle.take() {
            if handle.join().is_err() {
                tracing::error!("replication accept loop panicked");
            }
        }
        tracing::info!("replication primary closed");
    }
}

struct AcceptLoop {
    listener: TcpListener,
    wal_directory: PathBuf,
    shutdown: Arc<AtomicBool>,
    slot_tx: Sender<()>,
    slot_rx: Receiver<()>,
}

impl AcceptLoop {
    fn run(self) {
        while !self.shutdown.load(Ordering::Relaxed) {
            match self.listener.accept() {
                Ok((stream, addr)) => {
                    // Admission check before spawning the handler
                    if self.slot_tx.try_send(()).is_err() {
                        tracing::warn!(%addr, "replication connection limit reached, rejecting");
                        drop(stream);
                        continue;
                    }

                    tracing::debug!(%addr, "replica connected");

                    let wal_directory = self.wal_directory.clone();
                    let slot_rx = self.slot_rx.clone();
                    let spawned = thread::Builder::new()
                        .name("latticekv-repl-handler".to_string())
                        .spawn(move || {
                            if let Err(e) = handle_connection(stream, &wal_directory) {
                                tracing::warn!(%addr, error = %e, "replication request failed");
                            }
                            let _ = slot_rx.try_recv(); // release the slot
                        });

                    if let Err(e) = spawned {
                        tracing::error!(error = %e, "failed to spawn replication handler");
                        let _ = self.slot_rx.try_recv();
                    }
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                    thread::sleep(ACCEPT_POLL_INTERVAL);
                }
                Err(e) => {
                    if !self.shutdown.load(Ordering::Relaxed) {
                        tracing::error!(error = %e, "replication accept error");
                    }
                }
            }
        }

        tracing::debug!("replication accept loop stopped");
    }
}

/// Serve exactly one request on a fresh connection
fn handle_connection(mut stream: TcpStream, wal_directory: &Path) -> Result<()> {
    // The listener is non-blocking; the exchange itself must not be
    stream.set_nonblocking(false)?;
    stream.set_read_timeout(Some(IO_TIMEOUT))?;
    stream.set_write_timeout(Some(IO_TIMEOUT))?;

    let response = match protocol::read_message::<_, SyncRequest>(&mut stream, MAX_REQUEST_SIZE) {
        Ok(request) => synchronize(wal_directory, &request),
        Err(e) => {
            tracing::warn!(error = %e, "failed to decode replication request");
            SyncResponse::failure("invalid request format".to_string())
        }
    };

    protocol::write_message(&mut stream, &response)
}

/// Pick the next segment for a replica and load its bytes
fn synchronize(wal_directory: &Path, request: &SyncRequest) -> SyncResponse {
    let segments = match wal::list_segments(wal_directory) {
        Ok(segments) => segments,
        Err(e) => {
            tracing::error!(error = %e, "failed to list WAL segments");
            return SyncResponse::failure(e.to_string());
        }
    };

    let Some(name) = next_segment(&segments, &request.last_segment_name) else {
        tracing::debug!(
            last_segment = %request.last_segment_name,
            "replica is up to date"
        );
        return SyncResponse::up_to_date();
    };

    match std::fs::read(wal_directory.join(&name)) {
        Ok(data) => {
            tracing::info!(segment = %name, size = data.len(), "shipping WAL segment to replica");
            SyncResponse::segment(name, data)
        }
        Err(e) => {
            tracing::error!(segment = %name, error = %e, "failed to read WAL segment");
            SyncResponse::failure(e.to_string())
        }
    }
}

/// Select the segment a replica should fetch next
///
/// - No segments, or `last` is the newest segment → `None` (up to date)
/// - `last` is empty → the first segment
/// - `last` found elsewhere → its successor
/// - `last` unknown (stale replica) → the first segment, so the replica
///   restarts from the beginning; safe only because applies are idempotent
fn next_segment(segments: &[String], last: &str) -> Option<String> {
    if segments.is_empty() {
        return None;
    }
    if last.is_empty() {
        return Some(segments[0].clone());
    }

    match segments.iter().position(|name| name == last) {
        Some(position) if position + 1 < segments.len() => Some(segments[position + 1].clone()),
        Some(_) => None,
        None => Some(segments[0].clone()),
    }
}
