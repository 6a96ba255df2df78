//! Endpoint routing within one queue's namespace.

use std::collections::HashMap;
use std::fmt;

use super::context::Context;
use super::error::HandlerError;
use crate::envelope::Envelope;

/// A boxed task handler.
pub type Handler = Box<dyn Fn(&Context<'_>) -> Result<(), HandlerError> + Send + Sync>;

/// Maps endpoint names to handlers for a single queue.
///
/// Registering an endpoint twice replaces the earlier handler.
///
/// ## Example
///
/// ```
/// use task_backend::{Envelope, Router};
///
/// let mut router = Router::new("jobs");
/// router.set("ping", |_ctx| Ok(()));
///
/// router.dispatch(&Envelope::new("ping")).unwrap();
/// assert!(router.dispatch(&Envelope::new("pong")).is_err());
/// ```
pub struct Router {
    queue: String,
    handlers: HashMap<String, Handler>,
}

impl Router {
    /// Create an empty router for `queue`.
    pub fn new(queue: impl Into<String>) -> Self {
        Self {
            queue: queue.into(),
            handlers: HashMap::new(),
        }
    }

    /// Insert or replace the handler for `endpoint`.
    pub fn set<F>(&mut self, endpoint: impl Into<String>, handler: F)
    where
        F: Fn(&Context<'_>) -> Result<(), HandlerError> + Send + Sync + 'static,
    {
        self.handlers.insert(endpoint.into(), Box::new(handler));
    }

    /// Invoke the handler registered for the envelope's endpoint.
    ///
    /// Fails with `HandlerError::UnknownEndpoint` without invoking anything
    /// when the endpoint was never registered.
    pub fn dispatch(&self, envelope: &Envelope) -> Result<(), HandlerError> {
        let handler = self.handlers.get(&envelope.endpoint).ok_or_else(|| {
            HandlerError::UnknownEndpoint {
                queue: self.queue.clone(),
                endpoint: envelope.endpoint.clone(),
            }
        })?;
        handler(&Context::new(&self.queue, envelope))
    }

    /// Whether `endpoint` has a handler.
    pub fn contains(&self, endpoint: &str) -> bool {
        self.handlers.contains_key(endpoint)
    }

    /// List registered endpoint names.
    pub fn endpoints(&self) -> Vec<&str> {
        self.handlers.keys().map(|s| s.as_str()).collect()
    }

    /// Queue this router serves.
    pub fn queue(&self) -> &str {
        &self.queue
    }
}

impl fmt::Debug for Router {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut endpoints = self.endpoints();
        endpoints.sort_unstable();
        f.debug_struct("Router")
            .field("queue", &self.queue)
            .field("endpoints", &endpoints)
            .finish()
    }
}
