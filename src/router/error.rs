//! Error types for task handlers and dispatch.

use std::error::Error;

use thiserror::Error;

/// Error raised while dispatching an envelope to a handler.
///
/// Every variant is non-fatal to the consumer loop: the failure is logged and
/// the envelope is left unacknowledged.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// No handler registered for this endpoint on the queue.
    #[error("unknown endpoint {endpoint:?} on queue {queue:?}")]
    UnknownEndpoint { queue: String, endpoint: String },
    /// Envelope or argument decode failed.
    #[error("decode failed: {0}")]
    DecodeFailed(String),
    /// A required positional or named argument was not supplied.
    #[error("missing argument: {0}")]
    MissingArgument(String),
    /// The handler refused the task.
    #[error("rejected: {0}")]
    Rejected(String),
    /// The handler panicked; carries the panic message.
    #[error("handler panicked: {0}")]
    Panicked(String),
    /// Other error.
    #[error("handler error: {0}")]
    Other(Box<dyn Error + Send + Sync>),
}

impl HandlerError {
    /// Wrap any error raised inside a handler.
    pub fn other(err: impl Into<Box<dyn Error + Send + Sync>>) -> Self {
        HandlerError::Other(err.into())
    }
}

impl From<serde_json::Error> for HandlerError {
    fn from(err: serde_json::Error) -> Self {
        HandlerError::DecodeFailed(err.to_string())
    }
}
