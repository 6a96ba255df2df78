//! Crate-level error types.

use std::time::Duration;

use thiserror::Error;

use crate::router::HandlerError;
use crate::transport::TransportError;

/// Startup-time configuration problems. None of these are recovered from.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The connection URI does not match `scheme://host[:port]`.
    #[error("invalid connection URI: {0:?}")]
    InvalidUri(String),
    /// The URI scheme names no known transport family.
    #[error("unsupported transport scheme: {0:?}")]
    UnsupportedScheme(String),
    /// A queue has both a raw receiver and per-endpoint tasks.
    #[error("queue {queue:?} has both a receiver and task registrations")]
    MixedRegistration { queue: String },
    /// The endpoint could not be derived from the handler's name.
    #[error("cannot derive an endpoint name from {0}; register it with an explicit endpoint")]
    UnnamedHandler(String),
    /// A task was registered under an empty endpoint name.
    #[error("empty endpoint name registered on queue {queue:?}")]
    EmptyEndpoint { queue: String },
    /// The dequeue wait is zero or longer than the allowed maximum.
    #[error("poll timeout must be more than zero and at most one hour, got {0:?}")]
    InvalidPollTimeout(Duration),
    /// A proxy was requested for a task that was never registered.
    #[error("no task {endpoint:?} registered on queue {queue:?}")]
    UnknownTask { queue: String, endpoint: String },
    /// Settings could not be loaded.
    #[error("settings error: {0}")]
    Settings(#[from] ::config::ConfigError),
}

/// Any error surfaced by the runtime to its caller.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// Transport failure on send, subscribe, dequeue, or acknowledge.
    #[error(transparent)]
    Transport(#[from] TransportError),
    /// A before-first-task hook failed; the consumer loop never started.
    #[error("startup hook for queue {queue:?} failed: {source}")]
    Hook {
        queue: String,
        #[source]
        source: HandlerError,
    },
    /// Envelope could not be serialized for sending.
    #[error("failed to encode envelope: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, Error>;
