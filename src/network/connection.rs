//! Connection Handler
//!
//! Handles a single client connection: one request per read, one response
//! per write, until the client disconnects or a deadline expires.

use std::io::{Read, Write};
use std::net::TcpStream;
use std::sync::Arc;
use std::time::Duration;

use crate::error::Result;
use crate::protocol::Command;
use crate::storage::Storage;

/// Handles a single client connection
pub struct Connection {
    stream: TcpStream,
    storage: Arc<Storage>,
    buffer: Vec<u8>,
    peer: String,
}

impl Connection {
    /// Create a new connection handler
    pub fn new(stream: TcpStream, storage: Arc<Storage>, buffer_size: usize) -> Result<Self> {
        let peer = stream
            .peer_addr()
            .map(|addr| addr.to_string())
            .unwrap_or_else(|_| "unknown".to_string());

        Ok(Connection {
            stream,
            storage,
            buffer: vec![0u8; buffer_size],
            peer,
        })
    }

    /// Apply idle read/write deadlines
    pub fn set_timeouts(&self, idle_timeout: Duration) -> Result<()> {
        if !idle_timeout.is_zero() {
            self.stream.set_read_timeout(Some(idle_timeout))?;
            self.stream.set_write_timeout(Some(idle_timeout))?;
        }
        Ok(())
    }

    /// Handle the connection (blocking until closed)
    pub fn handle(&mut self) -> Result<()> {
        loop {
            let count = match self.stream.read(&mut self.buffer) {
                Ok(0) => return Ok(()), // client disconnected
                Ok(count) => count,
                Err(ref e)
                    if e.kind() == std::io::ErrorKind::WouldBlock
                        || e.kind() == std::io::ErrorKind::TimedOut =>
                {
                    tracing::debug!(peer = %self.peer, "idle deadline expired, closing connection");
                    return Ok(());
                }
                Err(e) => return Err(e.into()),
            };

            // A read that fills the whole buffer means the request may be
            // truncated; drop the connection rather than answer garbage
            if count == self.buffer.len() {
                tracing::warn!(
                    peer = %self.peer,
                    buffer_size = self.buffer.len(),
                    "request exceeds message buffer, closing connection"
                );
                return Ok(());
            }

            let input = String::from_utf8_lossy(&self.buffer[..count]);
            let response = dispatch(&self.storage, input.trim());

            self.stream.write_all(response.as_bytes())?;
        }
    }

    /// Peer address for logging
    pub fn peer_addr(&self) -> &str {
        &self.peer
    }
}

/// Parse one request line, run it against storage, and format the reply
pub fn dispatch(storage: &Storage, input: &str) -> String {
    let command = match Command::parse(input) {
        Ok(command) => command,
        Err(e) => return format!("ERROR: {}", e),
    };

    match command {
        Command::Set { key, value } => match storage.set(&key, &value) {
            Ok(()) => "OK".to_string(),
            Err(e) => format!("ERROR: {}", e),
        },
        Command::Get { key } => match storage.get(&key) {
            Ok(value) => value,
            Err(e) => format!("ERROR: {}", e),
        },
        Command::Del { key } => match storage.delete(&key) {
            Ok(()) => "OK".to_string(),
            Err(e) => format!("ERROR: {}", e),
        },
    }
}
