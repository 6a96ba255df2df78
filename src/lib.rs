//! Task dispatch over named queues.
//!
//! Producers enqueue `Envelope`s (`endpoint`, positional and named
//! arguments) on a queue; a worker process runs `Backend::run(queue)` to
//! drain it, routing each envelope to the handler registered for its
//! endpoint. Queue handles are cached per queue name, and the consumer loop
//! polls with a bounded wait so it can stop promptly on request.

pub mod backend;
#[cfg(feature = "cli")]
pub mod cli;
pub mod config;
mod envelope;
mod error;
mod registry;
pub mod router;
pub mod transport;

pub use backend::{
    Backend, BackendBuilder, DispatchScope, StopHandle, TaskProxy, WorkerStats, WorkerThread,
};
pub use config::Settings;
pub use envelope::Envelope;
pub use error::{ConfigError, Error, Result};
pub use registry::ConnectionRegistry;
pub use router::{Context, HandlerError, Router};
