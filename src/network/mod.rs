//! Network Module
//!
//! The client-facing TCP layer: one request per read, one response per
//! write, below the configured message buffer size.
//!
//! ## Responsibilities
//! - Accept and admission-control client connections
//! - Run the worker pool that drives connections against the storage façade
//! - Provide the blocking client used by the REPL

mod client;
mod connection;
mod server;

pub use client::Client;
pub use connection::{dispatch, Connection};
pub use server::{Server, ServerOptions, ShutdownHandle};
