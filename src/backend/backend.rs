//! The backend facade: sending tasks and running the consumer loop.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use super::builder::BackendBuilder;
use super::proxy::TaskProxy;
use super::scope::DispatchScope;
use super::shutdown::{RunId, StopHandle};
use crate::envelope::Envelope;
use crate::error::{ConfigError, Error, Result};
use crate::registry::ConnectionRegistry;
use crate::router::{HandlerError, Router};
use crate::transport::{Delivery, Transport};

/// A raw callback receiving every envelope on its queue.
pub type Receiver = Box<dyn Fn(&Envelope) -> std::result::Result<(), HandlerError> + Send + Sync>;

/// A before-first-task hook.
pub type Hook = Box<dyn Fn() -> std::result::Result<(), HandlerError> + Send + Sync>;

/// What handles a queue's envelopes.
pub(crate) enum QueueHandler {
    Tasks(Router),
    Receiver(Receiver),
}

/// Statistics from one consumer loop run.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct WorkerStats {
    /// Envelopes dispatched successfully and acknowledged.
    pub handled: usize,
    /// Envelopes whose dispatch failed; left unacknowledged.
    pub failed: usize,
    /// Bounded-wait dequeue attempts.
    pub polls: usize,
}

/// Task dispatch runtime for one process.
///
/// Producers call `send` (or a `TaskProxy`) from any thread. A worker
/// process calls `run(queue)`, which blocks draining that queue until
/// `stop()` is called or a termination signal arrives.
pub struct Backend {
    registry: Arc<ConnectionRegistry>,
    queues: HashMap<String, QueueHandler>,
    hooks: HashMap<String, Vec<Hook>>,
    scope: Option<Box<dyn DispatchScope>>,
    poll_timeout: Duration,
    handle_signals: bool,
    stop: StopHandle,
    hooks_ran: Mutex<HashSet<String>>,
    signals_installed: AtomicBool,
}

impl Backend {
    pub(crate) fn new(
        transport: Arc<dyn Transport>,
        queues: HashMap<String, QueueHandler>,
        hooks: HashMap<String, Vec<Hook>>,
        scope: Option<Box<dyn DispatchScope>>,
        poll_timeout: Duration,
        handle_signals: bool,
    ) -> Self {
        Self {
            registry: Arc::new(ConnectionRegistry::new(transport)),
            queues,
            hooks,
            scope,
            poll_timeout,
            handle_signals,
            stop: StopHandle::new(),
            hooks_ran: Mutex::new(HashSet::new()),
            signals_installed: AtomicBool::new(false),
        }
    }

    /// Start registering tasks against `transport`.
    pub fn builder(transport: Arc<dyn Transport>) -> BackendBuilder {
        BackendBuilder::new(transport)
    }

    /// Serialize `envelope` and enqueue it on `queue`.
    ///
    /// Transport failures are returned to the caller unchanged; nothing is
    /// retried.
    pub fn send(&self, queue: &str, envelope: &Envelope) -> Result<()> {
        enqueue(&self.registry, queue, envelope)
    }

    /// Proxy for a registered task: calling it enqueues instead of executing.
    pub fn task(&self, queue: &str, endpoint: &str) -> std::result::Result<TaskProxy, ConfigError> {
        match self.queues.get(queue) {
            Some(QueueHandler::Tasks(router)) if router.contains(endpoint) => Ok(TaskProxy::new(
                Arc::clone(&self.registry),
                queue,
                endpoint,
            )),
            _ => Err(ConfigError::UnknownTask {
                queue: queue.to_string(),
                endpoint: endpoint.to_string(),
            }),
        }
    }

    /// Dispatch one envelope to whatever handles `queue`, synchronously.
    ///
    /// This is what the consumer loop does for every dequeued envelope,
    /// minus the dispatch scope and acknowledgement.
    pub fn dispatch(&self, queue: &str, envelope: &Envelope) -> std::result::Result<(), HandlerError> {
        match self.queues.get(queue) {
            Some(QueueHandler::Tasks(router)) => router.dispatch(envelope),
            Some(QueueHandler::Receiver(receiver)) => receiver(envelope),
            None => Err(HandlerError::UnknownEndpoint {
                queue: queue.to_string(),
                endpoint: envelope.endpoint.clone(),
            }),
        }
    }

    /// Drain `queue` until stopped.
    ///
    /// Runs the queue's before-first-task hooks (once per backend), opens a
    /// dedicated queue handle, installs signal handlers if enabled, then
    /// polls with a bounded wait. Successful dispatches are acknowledged;
    /// failed ones are logged and left for the transport to redeliver.
    ///
    /// Returns after `stop()` once the in-flight dispatch (if any) finishes.
    /// A `stop()` issued before this call does not affect it.
    /// Hook failures and transport errors end the run with an error.
    pub fn run(&self, queue: &str) -> Result<WorkerStats> {
        self.run_registered(queue, self.stop.begin())
    }

    /// The loop proper, for callers that registered the run themselves.
    pub(crate) fn run_registered(&self, queue: &str, run: RunId) -> Result<WorkerStats> {
        self.run_hooks(queue)?;

        tracing::info!(
            queue,
            poll_timeout_ms = self.poll_timeout.as_millis() as u64,
            "Starting backend"
        );

        let handle = self.registry.transport().queue(queue)?;
        self.install_signal_handlers();

        let mut stats = WorkerStats::default();
        while !self.stop.should_stop(run) {
            stats.polls += 1;

            let Some(delivery) = handle.get(self.poll_timeout)? else {
                continue;
            };

            match self.process(queue, &delivery) {
                Ok(()) => {
                    handle.task_done(&delivery)?;
                    tracing::debug!(queue, job = delivery.id, "task done");
                    stats.handled += 1;
                }
                Err(err) => {
                    tracing::error!(
                        queue,
                        job = delivery.id,
                        error = %err,
                        detail = ?err,
                        "Exception occurred while dispatching task"
                    );
                    stats.failed += 1;
                }
            }
        }

        tracing::info!(
            queue,
            handled = stats.handled,
            failed = stats.failed,
            polls = stats.polls,
            "Terminating backend"
        );
        Ok(stats)
    }

    /// Request every consumer loop started so far on this backend to exit.
    pub fn stop(&self) {
        self.stop.stop();
    }

    /// A cloneable handle for stopping the backend from elsewhere.
    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.is_stopped()
    }

    pub fn poll_timeout(&self) -> Duration {
        self.poll_timeout
    }

    /// Queues with a task router or receiver.
    pub fn queues(&self) -> Vec<&str> {
        self.queues.keys().map(|s| s.as_str()).collect()
    }

    /// The handle cache used by `send`.
    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    fn run_hooks(&self, queue: &str) -> Result<()> {
        let mut ran = self.hooks_ran.lock().unwrap_or_else(PoisonError::into_inner);
        if ran.contains(queue) {
            return Ok(());
        }

        for hook in self.hooks.get(queue).into_iter().flatten() {
            hook().map_err(|source| Error::Hook {
                queue: queue.to_string(),
                source,
            })?;
        }
        tracing::debug!(
            queue,
            hooks = self.hooks.get(queue).map_or(0, Vec::len),
            "ran before-first-task hooks"
        );
        ran.insert(queue.to_string());
        Ok(())
    }

    fn process(&self, queue: &str, delivery: &Delivery) -> std::result::Result<(), HandlerError> {
        let envelope = Envelope::decode(&delivery.body)?;
        let span = tracing::info_span!("dispatch", queue, endpoint = %envelope.endpoint, job = delivery.id);
        let _entered = span.enter();

        let mut dispatch = || self.dispatch_guarded(queue, &envelope);
        match &self.scope {
            Some(scope) => scope.around(queue, &envelope, &mut dispatch),
            None => dispatch(),
        }
    }

    /// Dispatch, turning a handler panic into an error so one bad task
    /// cannot take the loop down.
    fn dispatch_guarded(&self, queue: &str, envelope: &Envelope) -> std::result::Result<(), HandlerError> {
        panic::catch_unwind(AssertUnwindSafe(|| self.dispatch(queue, envelope)))
            .unwrap_or_else(|payload| Err(HandlerError::Panicked(panic_message(payload.as_ref()))))
    }

    fn install_signal_handlers(&self) {
        if !self.handle_signals || self.signals_installed.swap(true, Ordering::SeqCst) {
            return;
        }

        #[cfg(feature = "signals")]
        if let Err(err) = super::shutdown::install_signal_handlers(self.stop.clone()) {
            tracing::warn!(error = %err, "could not install signal handlers");
        }
    }
}

impl fmt::Debug for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut queues = self.queues();
        queues.sort_unstable();
        f.debug_struct("Backend")
            .field("queues", &queues)
            .field("poll_timeout", &self.poll_timeout)
            .field("stopped", &self.is_stopped())
            .finish()
    }
}

pub(crate) fn enqueue(registry: &ConnectionRegistry, queue: &str, envelope: &Envelope) -> Result<()> {
    let body = envelope.encode()?;
    registry.put(queue, &body)?;
    tracing::debug!(queue, endpoint = %envelope.endpoint, "enqueued task");
    Ok(())
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
