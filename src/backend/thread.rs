//! Background thread running a backend's consumer loop.

use std::panic;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use super::backend::{Backend, WorkerStats};
use super::shutdown::{RunId, StopHandle};
use crate::error::Result;

/// A background thread draining one queue through a `Backend`.
///
/// Spawn, let it work, then stop it and collect stats. The run is
/// registered before the thread starts, so a `stop()` issued right after
/// `spawn` is never lost.
///
/// Stopping a worker also stops loops started before it on the same
/// backend, but never one spawned later; run one queue per backend when
/// queues need to be stopped independently.
///
/// ## Example
///
/// ```ignore
/// let backend = Arc::new(builder.build()?);
/// let worker = WorkerThread::spawn(Arc::clone(&backend), "jobs");
///
/// // ... enqueue work ...
///
/// let stats = worker.stop()?;
/// println!("Handled {} tasks", stats.handled);
/// ```
pub struct WorkerThread {
    stop: StopHandle,
    run: RunId,
    handle: Option<JoinHandle<Result<WorkerStats>>>,
}

impl WorkerThread {
    /// Spawn a thread running `backend.run(queue)`.
    pub fn spawn(backend: Arc<Backend>, queue: impl Into<String>) -> Self {
        let queue = queue.into();
        let stop = backend.stop_handle();
        let run = stop.begin();

        let handle = thread::spawn(move || backend.run_registered(&queue, run));

        Self {
            stop,
            run,
            handle: Some(handle),
        }
    }

    /// Signal the loop to stop and wait for it to finish.
    /// Returns the loop statistics, or the error that ended it.
    pub fn stop(self) -> Result<WorkerStats> {
        self.stop.stop_through(self.run);
        self.join()
    }

    /// Wait for the loop to end on its own (a fatal error or an external
    /// stop request).
    pub fn join(mut self) -> Result<WorkerStats> {
        self.take_result()
    }

    /// Signal the loop to stop without waiting.
    pub fn signal_stop(&self) {
        self.stop.stop_through(self.run);
    }

    /// Whether the loop has exited.
    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(true, JoinHandle::is_finished)
    }

    fn take_result(&mut self) -> Result<WorkerStats> {
        match self.handle.take() {
            Some(handle) => handle.join().unwrap_or_else(|payload| panic::resume_unwind(payload)),
            None => Ok(WorkerStats::default()),
        }
    }
}

impl Drop for WorkerThread {
    fn drop(&mut self) {
        if self.handle.is_some() {
            self.stop.stop_through(self.run);
        }
        // Not joined: the loop exits after its current poll.
    }
}
