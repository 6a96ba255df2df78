//! Backend integration tests.
//!
//! Exercises the dispatch runtime end to end over the in-memory transport:
//! - Routing envelopes to the handler registered for their endpoint
//! - Before-first-task hooks and the consumer loop lifecycle
//! - Failure isolation and graceful shutdown
//! - Handle caching under concurrent senders

mod support;
mod dispatch;
mod lifecycle;
