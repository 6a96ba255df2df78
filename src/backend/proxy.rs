//! Invoke-equals-enqueue proxies for registered tasks.

use std::sync::Arc;

use serde::Serialize;
use serde_json::{Map, Value};

use super::backend::enqueue;
use crate::envelope::Envelope;
use crate::error::Result;
use crate::registry::ConnectionRegistry;

/// Calling a proxy never runs the handler locally: it builds an envelope
/// for its endpoint and enqueues it on its queue.
///
/// Proxies are cheap to clone and can be handed to request handlers or
/// other threads.
///
/// ## Example
///
/// ```ignore
/// let resize = backend.task("jobs", "resize")?;
/// resize.call_with(&json!({ "image_id": 42 }))?;
/// ```
#[derive(Clone)]
pub struct TaskProxy {
    registry: Arc<ConnectionRegistry>,
    queue: String,
    endpoint: String,
}

impl TaskProxy {
    pub(crate) fn new(registry: Arc<ConnectionRegistry>, queue: &str, endpoint: &str) -> Self {
        Self {
            registry,
            queue: queue.to_string(),
            endpoint: endpoint.to_string(),
        }
    }

    pub fn queue(&self) -> &str {
        &self.queue
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Build the envelope a call with these arguments would enqueue.
    pub fn envelope(&self, args: Vec<Value>, kwargs: Map<String, Value>) -> Envelope {
        Envelope::with_arguments(&self.endpoint, args, kwargs)
    }

    /// Enqueue a call with positional and named arguments.
    pub fn call(&self, args: Vec<Value>, kwargs: Map<String, Value>) -> Result<()> {
        enqueue(&self.registry, &self.queue, &self.envelope(args, kwargs))
    }

    /// Enqueue a call whose named arguments are the fields of `input`.
    ///
    /// `input` must serialize to a JSON object.
    pub fn call_with<T: Serialize>(&self, input: &T) -> Result<()> {
        match serde_json::to_value(input)? {
            Value::Object(kwargs) => self.call(Vec::new(), kwargs),
            other => Err(<serde_json::Error as serde::ser::Error>::custom(format!(
                "task arguments must serialize to an object, got {}",
                kind(&other)
            ))
            .into()),
        }
    }
}

impl std::fmt::Debug for TaskProxy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskProxy")
            .field("queue", &self.queue)
            .field("endpoint", &self.endpoint)
            .finish()
    }
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
