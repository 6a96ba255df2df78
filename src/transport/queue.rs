//! Core transport traits.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

/// A job handed out by [`QueueHandle::get`].
///
/// The id is transport-assigned and is what [`QueueHandle::task_done`]
/// acknowledges.
#[derive(Clone, PartialEq, Eq)]
pub struct Delivery {
    pub id: u64,
    pub body: Vec<u8>,
}

impl Delivery {
    pub fn new(id: u64, body: Vec<u8>) -> Self {
        Self { id, body }
    }
}

impl fmt::Debug for Delivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Delivery")
            .field("id", &self.id)
            .field("bytes", &self.body.len())
            .finish()
    }
}

/// Error raised by the queue service.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Socket-level failure.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// The server answered something the client could not parse.
    #[error("protocol error: {0}")]
    Protocol(String),
    /// The server refused the command.
    #[error("rejected by queue service: {0}")]
    Rejected(String),
    /// The connection was closed by the server.
    #[error("connection closed")]
    Closed,
}

/// A connection to a queue service.
///
/// Each call to `queue` returns a fresh handle; caching handles per queue
/// name is the job of [`crate::ConnectionRegistry`].
pub trait Transport: Send + Sync {
    /// Open a handle on the named queue.
    fn queue(&self, name: &str) -> Result<Box<dyn QueueHandle>, TransportError>;
}

/// An open handle on one named queue.
pub trait QueueHandle: Send + Sync {
    /// Enqueue a serialized envelope.
    fn put(&self, body: &[u8]) -> Result<(), TransportError>;

    /// Wait up to `timeout` for a job. `Ok(None)` means nothing arrived in time.
    fn get(&self, timeout: Duration) -> Result<Option<Delivery>, TransportError>;

    /// Mark a job as fully processed so the service may discard it.
    fn task_done(&self, delivery: &Delivery) -> Result<(), TransportError>;
}
