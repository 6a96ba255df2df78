//! Process-local queues with beanstalkd-style reservations.
//!
//! Backs `memory://` URIs and stands in for a queue server in tests. A job
//! taken by `get` stays reserved until `task_done`; `release` plays the part
//! of an expired time-to-run.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, OnceLock, PoisonError};
use std::time::{Duration, Instant};

use super::{Delivery, QueueHandle, Transport, TransportError};
use crate::envelope::Envelope;

/// Queue state shared by every clone. Queues spring into existence on first
/// use, and each job is handed to exactly one `get`.
///
/// ## Example
///
/// ```
/// use std::time::Duration;
/// use task_backend::transport::{InMemoryTransport, Transport};
///
/// let transport = InMemoryTransport::new();
/// let queue = transport.queue("jobs").unwrap();
///
/// queue.put(br#"{"endpoint":"ping"}"#).unwrap();
///
/// let job = queue.get(Duration::from_millis(10)).unwrap().unwrap();
/// queue.task_done(&job).unwrap();
/// assert_eq!(transport.acknowledged("jobs"), vec![job.id]);
/// ```
#[derive(Clone, Default)]
pub struct InMemoryTransport {
    shared: Arc<Shared>,
}

#[derive(Default)]
struct Shared {
    state: Mutex<State>,
    available: Condvar,
}

#[derive(Default)]
struct State {
    next_id: u64,
    queues: HashMap<String, QueueState>,
}

#[derive(Default)]
struct QueueState {
    ready: VecDeque<Delivery>,
    reserved: Vec<Delivery>,
    acknowledged: Vec<u64>,
    handles_created: usize,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl InMemoryTransport {
    /// Create an empty transport.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the process-wide transport registered under `namespace`,
    /// creating it on first use. `memory://<namespace>` URIs resolve here.
    pub fn named(namespace: &str) -> Self {
        static NAMESPACES: OnceLock<Mutex<HashMap<String, InMemoryTransport>>> = OnceLock::new();
        NAMESPACES
            .get_or_init(Default::default)
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(namespace.to_string())
            .or_default()
            .clone()
    }

    /// Bodies waiting to be handed out, in queue order.
    pub fn pending(&self, queue: &str) -> Vec<Vec<u8>> {
        self.shared
            .lock()
            .queues
            .get(queue)
            .map(|q| q.ready.iter().map(|d| d.body.clone()).collect())
            .unwrap_or_default()
    }

    /// Waiting bodies decoded as envelopes. Undecodable bodies are skipped.
    pub fn pending_envelopes(&self, queue: &str) -> Vec<Envelope> {
        self.pending(queue)
            .iter()
            .filter_map(|body| Envelope::decode(body).ok())
            .collect()
    }

    /// Number of jobs handed out but not yet acknowledged.
    pub fn reserved(&self, queue: &str) -> usize {
        self.shared
            .lock()
            .queues
            .get(queue)
            .map_or(0, |q| q.reserved.len())
    }

    /// Ids acknowledged through `task_done`, in acknowledgement order.
    pub fn acknowledged(&self, queue: &str) -> Vec<u64> {
        self.shared
            .lock()
            .queues
            .get(queue)
            .map(|q| q.acknowledged.clone())
            .unwrap_or_default()
    }

    /// How many handles have been opened on `queue`.
    pub fn handles_created(&self, queue: &str) -> usize {
        self.shared
            .lock()
            .queues
            .get(queue)
            .map_or(0, |q| q.handles_created)
    }

    /// Return every reserved job on `queue` to the front of the ready list.
    /// Returns how many jobs were released.
    pub fn release(&self, queue: &str) -> usize {
        let released = {
            let mut state = self.shared.lock();
            let Some(q) = state.queues.get_mut(queue) else {
                return 0;
            };
            let reserved = std::mem::take(&mut q.reserved);
            let count = reserved.len();
            for delivery in reserved.into_iter().rev() {
                q.ready.push_front(delivery);
            }
            count
        };
        if released > 0 {
            self.shared.available.notify_all();
        }
        released
    }

    /// Drop every job and counter on all queues.
    pub fn clear(&self) {
        self.shared.lock().queues.clear();
    }
}

impl Transport for InMemoryTransport {
    fn queue(&self, name: &str) -> Result<Box<dyn QueueHandle>, TransportError> {
        self.shared
            .lock()
            .queues
            .entry(name.to_string())
            .or_default()
            .handles_created += 1;

        Ok(Box::new(InMemoryQueue {
            name: name.to_string(),
            shared: Arc::clone(&self.shared),
        }))
    }
}

/// Handle on one named in-memory queue.
pub struct InMemoryQueue {
    name: String,
    shared: Arc<Shared>,
}

impl QueueHandle for InMemoryQueue {
    fn put(&self, body: &[u8]) -> Result<(), TransportError> {
        {
            let mut state = self.shared.lock();
            state.next_id += 1;
            let id = state.next_id;
            state
                .queues
                .entry(self.name.clone())
                .or_default()
                .ready
                .push_back(Delivery::new(id, body.to_vec()));
        }
        self.shared.available.notify_all();
        Ok(())
    }

    fn get(&self, timeout: Duration) -> Result<Option<Delivery>, TransportError> {
        // No deadline when it does not fit in an Instant: wait until a put.
        let deadline = Instant::now().checked_add(timeout);
        let mut state = self.shared.lock();

        loop {
            let queue = state.queues.entry(self.name.clone()).or_default();
            if let Some(delivery) = queue.ready.pop_front() {
                queue.reserved.push(delivery.clone());
                return Ok(Some(delivery));
            }

            state = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Ok(None);
                    }
                    self.shared
                        .available
                        .wait_timeout(state, deadline - now)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0
                }
                None => self
                    .shared
                    .available
                    .wait(state)
                    .unwrap_or_else(PoisonError::into_inner),
            };
        }
    }

    fn task_done(&self, delivery: &Delivery) -> Result<(), TransportError> {
        let mut state = self.shared.lock();
        let queue = state.queues.entry(self.name.clone()).or_default();
        let position = queue
            .reserved
            .iter()
            .position(|d| d.id == delivery.id)
            .ok_or_else(|| TransportError::Rejected(format!("job {} is not reserved", delivery.id)))?;
        queue.reserved.remove(position);
        queue.acknowledged.push(delivery.id);
        Ok(())
    }
}
