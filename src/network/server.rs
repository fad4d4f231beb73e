//! TCP Server
//!
//! Accepts client connections and dispatches them to worker threads.
//!
//! ## Architecture
//! - Main thread accepts connections (non-blocking, so it can observe the
//!   shutdown flag)
//! - Worker thread pool handles client I/O
//! - Shared storage façade reference for all workers

use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam::channel::{bounded, Receiver, Sender};

use crate::error::{LatticeError, Result};
use crate::storage::Storage;

use super::Connection;

/// Message sent to worker threads
enum WorkerMessage {
    /// New client connection to handle
    NewConnection(TcpStream),
    /// Signal to shutdown
    Shutdown,
}

/// Runtime server options
#[derive(Debug, Clone)]
pub struct ServerOptions {
    /// Listen address (host:port)
    pub address: String,

    /// Max concurrent client connections
    pub max_connections: usize,

    /// Per-request buffer size in bytes
    pub max_message_size: usize,

    /// Read/write deadline for idle connections
    pub idle_timeout: Duration,
}

/// Handle for requesting shutdown from another thread (e.g. a signal handler)
#[derive(Clone)]
pub struct ShutdownHandle(Arc<AtomicBool>);

impl ShutdownHandle {
    /// Ask the server to stop accepting and drain its workers
    pub fn shutdown(&self) {
        self.0.store(true, Ordering::Relaxed);
    }
}

/// TCP server for the client protocol
pub struct Server {
    options: ServerOptions,

    /// Shared storage façade
    storage: Arc<Storage>,

    /// TCP listener (created on bind)
    listener: Option<TcpListener>,

    /// Channel to send work to workers
    work_sender: Option<Sender<WorkerMessage>>,

    /// Worker thread handles
    workers: Vec<JoinHandle<()>>,

    /// Shutdown flag
    shutdown: Arc<AtomicBool>,

    /// Active connection count
    active_connections: Arc<AtomicUsize>,
}

impl Server {
    /// Create a new server with the given options and storage
    pub fn new(options: ServerOptions, storage: Arc<Storage>) -> Self {
        Self {
            options,
            storage,
            listener: None,
            work_sender: None,
            workers: Vec::new(),
            shutdown: Arc::new(AtomicBool::new(false)),
            active_connections: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Bind the listener and return the bound address
    ///
    /// Called implicitly by `run`; useful on its own when binding port 0.
    pub fn bind(&mut self) -> Result<SocketAddr> {
        if self.listener.is_none() {
            let listener = TcpListener::bind(&self.options.address).map_err(|e| {
                LatticeError::Network(format!(
                    "failed to bind to {}: {}",
                    self.options.address, e
                ))
            })?;

            // Non-blocking so the accept loop can check the shutdown flag
            listener.set_nonblocking(true)?;
            self.listener = Some(listener);
        }

        Ok(self.listener.as_ref().unwrap().local_addr()?)
    }

    /// Start the server (blocking)
    ///
    /// Binds, spawns the worker pool, accepts connections until shutdown is
    /// signaled, then drains the workers.
    pub fn run(&mut self) -> Result<()> {
        let addr = self.bind()?;
        tracing::info!(%addr, "server listening");

        let num_workers = num_cpus();
        let (sender, receiver) = bounded::<WorkerMessage>(self.options.max_connections.max(1));
        self.work_sender = Some(sender);

        tracing::info!(num_workers, "starting worker threads");

        for worker_id in 0..num_workers {
            let worker = Worker {
                id: worker_id,
                receiver: receiver.clone(),
                storage: Arc::clone(&self.storage),
                active_connections: Arc::clone(&self.active_connections),
                buffer_size: self.options.max_message_size,
                idle_timeout: self.options.idle_timeout,
            };
            let handle = thread::Builder::new()
                .name(format!("latticekv-worker-{}", worker_id))
                .spawn(move || worker.run())
                .map_err(|e| LatticeError::Network(format!("failed to spawn worker: {}", e)))?;

            self.workers.push(handle);
        }

        self.accept_loop();
        self.cleanup();

        Ok(())
    }

    /// Main accept loop
    fn accept_loop(&mut self) {
        let listener = self.listener.as_ref().unwrap();
        let sender = self.work_sender.as_ref().unwrap();

        while !self.shutdown.load(Ordering::Relaxed) {
            match listener.accept() {
                Ok((stream, addr)) => {
                    // Check connection limit
                    let current = self.active_connections.load(Ordering::Relaxed);
                    if current >= self.options.max_connections {
                        tracing::warn!(
                            current,
                            limit = self.options.max_connections,
                            %addr,
                            "connection limit reached, rejecting"
                        );
                        drop(stream);
                        continue;
                    }

                    tracing::debug!(%addr, "accepted connection");

                    if let Err(e) = sender.send(WorkerMessage::NewConnection(stream)) {
                        tracing::error!(error = %e, "failed to dispatch connection");
                    }
                }
                Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    // No pending connections
                    thread::sleep(Duration::from_millis(10));
                }
                Err(e) => {
                    if !self.shutdown.load(Ordering::Relaxed) {
                        tracing::error!(error = %e, "accept error");
                    }
                }
            }
        }
    }

    /// Cleanup workers and resources
    fn cleanup(&mut self) {
        tracing::info!("shutting down server...");

        if let Some(sender) = &self.work_sender {
            for _ in 0..self.workers.len() {
                let _ = sender.send(WorkerMessage::Shutdown);
            }
        }

        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                tracing::error!("worker thread panicked");
            }
        }

        tracing::info!("server shutdown complete");
    }

    /// Signal the server to shutdown gracefully
    pub fn shutdown(&self) {
        tracing::info!("shutdown signal received");
        self.shutdown.store(true, Ordering::Relaxed);
    }

    /// Clonable handle that triggers the same shutdown flag
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle(Arc::clone(&self.shutdown))
    }

    /// Check if the server is running
    pub fn is_running(&self) -> bool {
        !self.shutdown.load(Ordering::Relaxed)
    }

    /// Get the number of active connections
    pub fn active_connections(&self) -> usize {
        self.active_connections.load(Ordering::Relaxed)
    }

    /// Get the bound address (if bound)
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.listener.as_ref().and_then(|l| l.local_addr().ok())
    }
}

/// Worker thread that handles client connections
struct Worker {
    /// Worker ID for logging
    id: usize,

    /// Channel to receive work
    receiver: Receiver<WorkerMessage>,

    /// Shared storage reference
    storage: Arc<Storage>,

    /// Active connection counter
    active_connections: Arc<AtomicUsize>,

    /// Per-request buffer size
    buffer_size: usize,

    /// Idle deadline for reads and writes
    idle_timeout: Duration,
}

impl Worker {
    fn run(self) {
        tracing::debug!(worker = self.id, "worker started");

        loop {
            match self.receiver.recv() {
                Ok(WorkerMessage::NewConnection(stream)) => {
                    self.handle_connection(stream);
                }
                Ok(WorkerMessage::Shutdown) => {
                    tracing::debug!(worker = self.id, "worker received shutdown signal");
                    break;
                }
                Err(_) => {
                    // Channel closed
                    tracing::debug!(worker = self.id, "worker channel closed");
                    break;
                }
            }
        }

        tracing::debug!(worker = self.id, "worker stopped");
    }

    fn handle_connection(&self, stream: TcpStream) {
        self.active_connections.fetch_add(1, Ordering::Relaxed);

        // The listener is non-blocking; individual connections are not
        if let Err(e) = stream.set_nonblocking(false) {
            tracing::error!(error = %e, "failed to configure connection");
            self.active_connections.fetch_sub(1, Ordering::Relaxed);
            return;
        }

        let mut conn = match Connection::new(stream, Arc::clone(&self.storage), self.buffer_size) {
            Ok(conn) => conn,
            Err(e) => {
                tracing::error!(error = %e, "failed to create connection");
                self.active_connections.fetch_sub(1, Ordering::Relaxed);
                return;
            }
        };

        if let Err(e) = conn.set_timeouts(self.idle_timeout) {
            tracing::warn!(error = %e, "failed to set connection timeouts");
        }

        if let Err(e) = conn.handle() {
            tracing::debug!(peer = %conn.peer_addr(), error = %e, "connection ended with error");
        }

        self.active_connections.fetch_sub(1, Ordering::Relaxed);
    }
}

/// Get number of CPUs (for worker thread count)
fn num_cpus() -> usize {
    std::thread::available_parallelism()
        .map(|p| p.get())
        .unwrap_or(4)
}
