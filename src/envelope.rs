//! The unit of work placed on a queue.
//!
//! An `Envelope` names the endpoint that should handle it and carries the
//! call arguments as self-describing JSON values: an ordered list of
//! positional values plus a map of named values.

use serde::{de, ser, Deserialize, Serialize};
use serde_json::{Map, Value};

const EMPTY_ENDPOINT: &str = "envelope endpoint is empty";

/// A serialized task invocation.
///
/// `args` and `kwargs` may be absent on the wire; absence decodes to empty.
/// The endpoint never is: an empty endpoint fails both `encode` and `decode`.
///
/// ## Example
///
/// ```
/// use task_backend::Envelope;
/// use serde_json::json;
///
/// let envelope = Envelope::new("resize").kwarg("image_id", json!(42));
///
/// let bytes = envelope.encode().unwrap();
/// let decoded = Envelope::decode(&bytes).unwrap();
/// assert_eq!(decoded.endpoint, "resize");
/// assert_eq!(decoded.kwargs["image_id"], json!(42));
/// ```
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Name of the handler within the target queue's router.
    pub endpoint: String,
    /// Positional arguments.
    #[serde(default)]
    pub args: Vec<Value>,
    /// Named arguments.
    #[serde(default)]
    pub kwargs: Map<String, Value>,
}

impl Envelope {
    /// Create an envelope with no arguments.
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            args: Vec::new(),
            kwargs: Map::new(),
        }
    }

    /// Create an envelope from already collected arguments.
    pub fn with_arguments(
        endpoint: impl Into<String>,
        args: Vec<Value>,
        kwargs: Map<String, Value>,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            args,
            kwargs,
        }
    }

    /// Append a positional argument.
    pub fn arg(mut self, value: impl Into<Value>) -> Self {
        self.args.push(value.into());
        self
    }

    /// Set a named argument, replacing any previous value under `name`.
    pub fn kwarg(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.kwargs.insert(name.into(), value.into());
        self
    }

    /// Serialize to the JSON wire format.
    pub fn encode(&self) -> Result<Vec<u8>, serde_json::Error> {
        if self.endpoint.is_empty() {
            return Err(ser::Error::custom(EMPTY_ENDPOINT));
        }
        serde_json::to_vec(self)
    }

    /// Parse the JSON wire format.
    pub fn decode(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        let envelope: Self = serde_json::from_slice(bytes)?;
        if envelope.endpoint.is_empty() {
            return Err(de::Error::custom(EMPTY_ENDPOINT));
        }
        Ok(envelope)
    }
}
