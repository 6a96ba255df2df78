//! Context passed to task handlers.
//!
//! Handlers never see raw JSON splatted into a parameter list; they pull the
//! arguments they declare out of the context and convert them to typed values.

use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use super::error::HandlerError;
use crate::envelope::Envelope;

/// The call a handler is asked to perform.
///
/// ## Example
///
/// ```ignore
/// fn resize(ctx: &Context) -> Result<(), HandlerError> {
///     let image_id: u64 = ctx.kwarg("image_id")?;
///     let width: u32 = ctx.opt_kwarg("width")?.unwrap_or(640);
///     // ...
///     Ok(())
/// }
/// ```
pub struct Context<'a> {
    queue: &'a str,
    envelope: &'a Envelope,
}

impl<'a> Context<'a> {
    pub(crate) fn new(queue: &'a str, envelope: &'a Envelope) -> Self {
        Self { queue, envelope }
    }

    /// Name of the queue the task arrived on.
    pub fn queue(&self) -> &str {
        self.queue
    }

    /// Endpoint being handled.
    pub fn endpoint(&self) -> &str {
        &self.envelope.endpoint
    }

    /// Raw positional arguments.
    pub fn args(&self) -> &[Value] {
        &self.envelope.args
    }

    /// Raw named arguments.
    pub fn kwargs(&self) -> &Map<String, Value> {
        &self.envelope.kwargs
    }

    /// Convert the positional argument at `index`.
    pub fn arg<T: DeserializeOwned>(&self, index: usize) -> Result<T, HandlerError> {
        let value = self
            .envelope
            .args
            .get(index)
            .ok_or_else(|| HandlerError::MissingArgument(format!("args[{}]", index)))?;
        convert(value, || format!("args[{}]", index))
    }

    /// Convert a required named argument.
    pub fn kwarg<T: DeserializeOwned>(&self, name: &str) -> Result<T, HandlerError> {
        self.opt_kwarg(name)?
            .ok_or_else(|| HandlerError::MissingArgument(name.to_string()))
    }

    /// Convert an optional named argument. Absent and `null` both yield `None`.
    pub fn opt_kwarg<T: DeserializeOwned>(&self, name: &str) -> Result<Option<T>, HandlerError> {
        match self.envelope.kwargs.get(name) {
            None | Some(Value::Null) => Ok(None),
            Some(value) => convert(value, || name.to_string()).map(Some),
        }
    }

    /// Deserialize all named arguments into a typed struct.
    pub fn input<T: DeserializeOwned>(&self) -> Result<T, HandlerError> {
        serde_json::from_value(Value::Object(self.envelope.kwargs.clone()))
            .map_err(|e| HandlerError::DecodeFailed(e.to_string()))
    }
}

fn convert<T: DeserializeOwned>(
    value: &Value,
    name: impl FnOnce() -> String,
) -> Result<T, HandlerError> {
    T::deserialize(value).map_err(|e| HandlerError::DecodeFailed(format!("{}: {}", name(), e)))
}
