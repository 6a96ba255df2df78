//! Lazily populated cache of queue handles, one per queue name.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use crate::transport::{QueueHandle, Transport, TransportError};

/// Thread-safe map from queue name to an open queue handle.
///
/// The lookup-or-create step runs under a single lock, so concurrent callers
/// asking for an unseen queue name get the same handle and the transport is
/// asked for exactly one. The lock is not held while the handle is used.
///
/// A handle whose connection broke during `put` is evicted, so the next call
/// opens a fresh one.
///
/// ## Example
///
/// ```
/// use std::sync::Arc;
/// use task_backend::ConnectionRegistry;
/// use task_backend::transport::InMemoryTransport;
///
/// let transport = InMemoryTransport::new();
/// let registry = ConnectionRegistry::new(Arc::new(transport.clone()));
///
/// let a = registry.handle("jobs").unwrap();
/// let b = registry.handle("jobs").unwrap();
/// assert!(Arc::ptr_eq(&a, &b));
/// assert_eq!(transport.handles_created("jobs"), 1);
/// ```
pub struct ConnectionRegistry {
    transport: Arc<dyn Transport>,
    handles: Mutex<HashMap<String, Arc<dyn QueueHandle>>>,
}

impl ConnectionRegistry {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            handles: Mutex::new(HashMap::new()),
        }
    }

    /// Return the cached handle for `queue`, opening it on first use.
    ///
    /// A failed open caches nothing; the next call retries.
    pub fn handle(&self, queue: &str) -> Result<Arc<dyn QueueHandle>, TransportError> {
        let mut handles = self.handles.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(handle) = handles.get(queue) {
            return Ok(Arc::clone(handle));
        }

        let handle: Arc<dyn QueueHandle> = Arc::from(self.transport.queue(queue)?);
        handles.insert(queue.to_string(), Arc::clone(&handle));
        tracing::debug!(queue, "cached new queue handle");
        Ok(handle)
    }

    /// Enqueue `body` on `queue` through its cached handle.
    ///
    /// Errors are returned to the caller. Connection-level failures also drop
    /// the handle from the cache; refusals by the service do not.
    pub fn put(&self, queue: &str, body: &[u8]) -> Result<(), TransportError> {
        let handle = self.handle(queue)?;
        let result = handle.put(body);
        if let Err(err) = &result {
            if breaks_connection(err) {
                self.evict(queue, &handle);
                tracing::warn!(queue, error = %err, "evicted broken queue handle");
            }
        }
        result
    }

    /// Forget `handle` unless another caller already replaced it.
    fn evict(&self, queue: &str, handle: &Arc<dyn QueueHandle>) {
        let mut handles = self.handles.lock().unwrap_or_else(PoisonError::into_inner);
        if handles
            .get(queue)
            .is_some_and(|cached| Arc::ptr_eq(cached, handle))
        {
            handles.remove(queue);
        }
    }

    /// The transport handles are opened from.
    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    /// Names of queues with a cached handle.
    pub fn queues(&self) -> Vec<String> {
        self.handles
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }
}

fn breaks_connection(err: &TransportError) -> bool {
    matches!(
        err,
        TransportError::Io(_) | TransportError::Closed | TransportError::Protocol(_)
    )
}

impl fmt::Debug for ConnectionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionRegistry")
            .field("queues", &self.queues())
            .finish()
    }
}
