//! TCP Client
//!
//! Blocking client for the line-oriented protocol: one write and one read
//! per request over a single persistent connection. Used by the REPL binary
//! and the integration tests.

use std::io::{Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

use crate::config::DEFAULT_MESSAGE_SIZE;
use crate::error::{LatticeError, Result};

/// Client for the database server
pub struct Client {
    stream: TcpStream,
    buffer: Vec<u8>,
}

impl Client {
    /// Connect to a server with a connect/read/write timeout
    pub fn connect(address: &str, timeout: Duration) -> Result<Self> {
        Self::connect_with_buffer(address, timeout, DEFAULT_MESSAGE_SIZE)
    }

    /// Connect with an explicit response buffer size
    pub fn connect_with_buffer(
        address: &str,
        timeout: Duration,
        buffer_size: usize,
    ) -> Result<Self> {
        let addr = address
            .to_socket_addrs()
            .map_err(|e| LatticeError::Network(format!("invalid address {}: {}", address, e)))?
            .next()
            .ok_or_else(|| LatticeError::Network(format!("address resolves to nothing: {}", address)))?;

        let stream = TcpStream::connect_timeout(&addr, timeout)
            .map_err(|e| LatticeError::Network(format!("failed to connect to {}: {}", address, e)))?;

        stream.set_read_timeout(Some(timeout))?;
        stream.set_write_timeout(Some(timeout))?;
        // Requests are tiny; don't let Nagle delay them
        stream.set_nodelay(true)?;

        Ok(Client {
            stream,
            buffer: vec![0u8; buffer_size],
        })
    }

    /// Send one request and read one response
    pub fn send(&mut self, request: &str) -> Result<String> {
        self.stream.write_all(request.as_bytes())?;

        let count = self.stream.read(&mut self.buffer)?;
        if count == 0 {
            return Err(LatticeError::Network(
                "connection closed by server".to_string(),
            ));
        }
        if count == self.buffer.len() {
            return Err(LatticeError::Network(format!(
                "response exceeds buffer size of {} bytes",
                self.buffer.len()
            )));
        }

        Ok(String::from_utf8_lossy(&self.buffer[..count]).into_owned())
    }
}
