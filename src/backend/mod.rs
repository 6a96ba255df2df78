//! Registration, sending, and the consumer loop.
//!
//! ## Architecture
//!
//! ```text
//! producer process                          worker process
//! ────────────────                          ──────────────
//! TaskProxy::call / Backend::send           Backend::run("jobs")
//!        │                                    │ hooks (once, in order)
//!        ▼                                    │ open queue handle
//! ConnectionRegistry ── put ──► queue ◄─ get(timeout) ─┤
//!  (one handle per name)        service               │ decode Envelope
//!                                                     │ DispatchScope::around
//!                                                     │ Router / receiver
//!                                                     ├─ Ok  → task_done
//!                                                     └─ Err → log, leave reserved
//! ```
//!
//! ## Quick Start
//!
//! ```ignore
//! use task_backend::Backend;
//! use task_backend::transport::InMemoryTransport;
//!
//! let backend = Backend::builder(Arc::new(InMemoryTransport::new()))
//!     .before_first_task("jobs", || { warm_caches(); Ok(()) })
//!     .task("jobs", "resize", |ctx| {
//!         let image_id: u64 = ctx.kwarg("image_id")?;
//!         resize(image_id).map_err(HandlerError::other)
//!     })
//!     .build()?;
//!
//! // producer side
//! backend.task("jobs", "resize")?.call_with(&json!({ "image_id": 42 }))?;
//!
//! // worker side: blocks until SIGINT/SIGTERM or backend.stop()
//! let stats = backend.run("jobs")?;
//! ```

#[allow(clippy::module_inception)]
mod backend;
mod builder;
mod proxy;
mod scope;
mod shutdown;
mod thread;

pub use backend::{Backend, Hook, Receiver, WorkerStats};
pub use builder::{BackendBuilder, DEFAULT_POLL_TIMEOUT, MAX_POLL_TIMEOUT};
pub use proxy::TaskProxy;
pub use scope::DispatchScope;
#[cfg(feature = "signals")]
pub use shutdown::install_signal_handlers;
pub use shutdown::StopHandle;
pub use thread::WorkerThread;
