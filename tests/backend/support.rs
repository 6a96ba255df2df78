//! Shared helpers for backend integration tests.

use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use task_backend::transport::{Delivery, InMemoryTransport, QueueHandle, Transport, TransportError};
use task_backend::{Backend, BackendBuilder};

/// Poll timeout used by test loops; short so idle loops notice a stop quickly.
pub const POLL: Duration = Duration::from_millis(25);

/// A builder over `transport` with a short poll and no signal handlers.
pub fn builder(transport: &InMemoryTransport) -> BackendBuilder {
    Backend::builder(Arc::new(transport.clone()))
        .poll_timeout(POLL)
        .handle_signals(false)
}

/// Block until `condition` holds, panicking after two seconds.
pub fn wait_until(what: &str, condition: impl Fn() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(2);
    while !condition() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        thread::sleep(Duration::from_millis(2));
    }
}

/// Ordered log of events observed by handlers and hooks.
#[derive(Clone, Default)]
pub struct Recorder(Arc<Mutex<Vec<String>>>);

impl Recorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, event: impl Into<String>) {
        self.0.lock().unwrap().push(event.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    pub fn len(&self) -> usize {
        self.0.lock().unwrap().len()
    }
}

/// A transport whose handles accept `put` but fail every `get`.
pub struct BrokenTransport;

struct BrokenQueue;

impl Transport for BrokenTransport {
    fn queue(&self, _name: &str) -> Result<Box<dyn QueueHandle>, TransportError> {
        Ok(Box::new(BrokenQueue))
    }
}

impl QueueHandle for BrokenQueue {
    fn put(&self, _body: &[u8]) -> Result<(), TransportError> {
        Ok(())
    }

    fn get(&self, _timeout: Duration) -> Result<Option<Delivery>, TransportError> {
        Err(TransportError::Closed)
    }

    fn task_done(&self, _delivery: &Delivery) -> Result<(), TransportError> {
        Ok(())
    }
}
