//! Execution scope entered around every dispatch.

use crate::envelope::Envelope;
use crate::router::HandlerError;

/// Wraps each dispatch performed by the consumer loop.
///
/// Use it to acquire per-task resources (a database session, a tenant
/// context, ...) and release them once the handler returns. `around` must
/// call `dispatch` exactly once and should return its result; whatever the
/// scope acquires is released when `around` returns, on success and on
/// failure alike.
///
/// ## Example
///
/// ```ignore
/// struct WithSession(Pool);
///
/// impl DispatchScope for WithSession {
///     fn around(
///         &self,
///         _queue: &str,
///         _envelope: &Envelope,
///         dispatch: &mut dyn FnMut() -> Result<(), HandlerError>,
///     ) -> Result<(), HandlerError> {
///         let _session = self.0.checkout();
///         dispatch()
///     }
/// }
/// ```
pub trait DispatchScope: Send + Sync {
    fn around(
        &self,
        queue: &str,
        envelope: &Envelope,
        dispatch: &mut dyn FnMut() -> Result<(), HandlerError>,
    ) -> Result<(), HandlerError>;
}
