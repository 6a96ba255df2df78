//! Endpoint-to-handler mapping for a queue.
//!
//! Each queue registered with `task` registrations owns one `Router`. The
//! consumer loop hands every decoded envelope to it; the router looks up the
//! handler by endpoint name and calls it with a `Context` over the
//! envelope's arguments.
//!
//! ```text
//! Envelope { endpoint: "resize", args, kwargs }
//!        │
//!        ▼
//!   Router("jobs") ── "resize" ──► handler(&Context)
//!                  ── "crop"   ──► handler(&Context)
//! ```

mod context;
mod error;
#[allow(clippy::module_inception)]
mod router;

pub use context::Context;
pub use error::HandlerError;
pub use router::{Handler, Router};
