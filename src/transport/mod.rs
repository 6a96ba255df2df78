//! The queue service the runtime enqueues to and drains from.
//!
//! The runtime only relies on three primitives per named queue:
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │ Transport::queue(name) -> QueueHandle                     │
//! │   put(body)            enqueue a serialized envelope      │
//! │   get(timeout)         bounded wait for the next job      │
//! │   task_done(delivery)  acknowledge, service may discard   │
//! └──────────────────────────────────────────────────────────┘
//!          │                              │
//!          ▼                              ▼
//! ┌────────────────────┐       ┌──────────────────────────┐
//! │ InMemoryTransport  │       │ BeanstalkTransport       │
//! │ (tests, memory://) │       │ (btq:// and beanstalk://) │
//! └────────────────────┘       └──────────────────────────┘
//! ```

mod beanstalk;
mod in_memory;
mod queue;
mod uri;

use std::sync::Arc;

pub use beanstalk::{BeanstalkOptions, BeanstalkQueue, BeanstalkTransport, DEFAULT_PRIORITY, DEFAULT_TTR};
pub use in_memory::{InMemoryQueue, InMemoryTransport};
pub use queue::{Delivery, QueueHandle, Transport, TransportError};
pub use uri::{ConnectionUri, Scheme, DEFAULT_PORT};

/// Build the transport a connection URI names.
///
/// No network traffic happens here; beanstalkd connections are opened when a
/// queue handle is first requested.
pub fn connect(uri: &ConnectionUri, options: BeanstalkOptions) -> Arc<dyn Transport> {
    match uri.scheme {
        Scheme::Beanstalk => Arc::new(BeanstalkTransport::new(uri.address(), options)),
        Scheme::Memory => Arc::new(InMemoryTransport::named(&uri.host)),
    }
}
