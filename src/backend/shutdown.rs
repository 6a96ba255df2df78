//! Cooperative shutdown.
//!
//! Every consumer loop is a numbered run. `stop()` marks every run started so
//! far as stopped; a run started afterwards is unaffected. The loop checks its
//! own number between bounded waits, so stopping is safe from any thread,
//! idempotent, and never undone by a later run starting.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Identifies one consumer loop run.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct RunId(u64);

#[derive(Debug, Default)]
struct Runs {
    started: AtomicU64,
    stopped_through: AtomicU64,
}

/// Shared stop control for a backend's consumer loops.
///
/// Reports stopped before the first run and whenever every run started so
/// far has been asked to stop.
#[derive(Clone, Debug)]
pub struct StopHandle {
    runs: Arc<Runs>,
}

impl StopHandle {
    pub(crate) fn new() -> Self {
        Self {
            runs: Arc::new(Runs::default()),
        }
    }

    /// Request shutdown of every run started so far. Calling it again has no
    /// further effect.
    pub fn stop(&self) {
        let started = self.runs.started.load(Ordering::SeqCst);
        self.runs.stopped_through.fetch_max(started, Ordering::SeqCst);
    }

    /// Whether every run started so far has been asked to stop.
    pub fn is_stopped(&self) -> bool {
        self.runs.stopped_through.load(Ordering::SeqCst) >= self.runs.started.load(Ordering::SeqCst)
    }

    /// Register a new run.
    pub(crate) fn begin(&self) -> RunId {
        RunId(self.runs.started.fetch_add(1, Ordering::SeqCst) + 1)
    }

    /// Stop `run` and every run started before it.
    pub(crate) fn stop_through(&self, run: RunId) {
        self.runs.stopped_through.fetch_max(run.0, Ordering::SeqCst);
    }

    pub(crate) fn should_stop(&self, run: RunId) -> bool {
        self.runs.stopped_through.load(Ordering::SeqCst) >= run.0
    }
}

/// Stop `handle` whenever the process receives SIGINT or SIGTERM.
///
/// Signals are received by a dedicated thread driving a single-threaded
/// tokio runtime; the OS-level handler only wakes that thread, and the
/// thread does nothing but set the flag.
#[cfg(feature = "signals")]
pub fn install_signal_handlers(handle: StopHandle) -> std::io::Result<()> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    #[cfg(unix)]
    let (mut interrupt, mut terminate) = {
        use tokio::signal::unix::{signal, SignalKind};
        let _guard = runtime.enter();
        (signal(SignalKind::interrupt())?, signal(SignalKind::terminate())?)
    };

    std::thread::Builder::new()
        .name("task-backend-signals".into())
        .spawn(move || {
            runtime.block_on(async move {
                #[cfg(unix)]
                loop {
                    let received = tokio::select! {
                        received = interrupt.recv() => received,
                        received = terminate.recv() => received,
                    };
                    if received.is_none() {
                        break;
                    }
                    handle.stop();
                };

                #[cfg(not(unix))]
                while tokio::signal::ctrl_c().await.is_ok() {
                    handle.stop();
                };
            })
        })?;

    Ok(())
}
