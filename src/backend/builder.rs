//! Registration of tasks, receivers, and startup hooks.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use super::backend::{Backend, Hook, QueueHandler, Receiver};
use super::scope::DispatchScope;
use crate::config::Settings;
use crate::envelope::Envelope;
use crate::error::ConfigError;
use crate::router::{Context, HandlerError, Router};
use crate::transport::{self, Transport};

/// Bounded wait used by the consumer loop when none is configured.
pub const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_secs(8);

/// Longest accepted dequeue wait.
pub const MAX_POLL_TIMEOUT: Duration = Duration::from_secs(3600);

/// Collects every registration before the backend starts serving.
///
/// Uses the builder pattern: each registration returns `self` for chaining,
/// and `build()` validates the whole set at once. After `build()` the
/// registration maps are read-only.
///
/// ## Example
///
/// ```
/// use task_backend::{Backend, HandlerError};
/// use task_backend::transport::InMemoryTransport;
/// use std::sync::Arc;
///
/// let backend = Backend::builder(Arc::new(InMemoryTransport::new()))
///     .before_first_task("jobs", || Ok(()))
///     .task("jobs", "resize", |ctx| {
///         let _image_id: u64 = ctx.kwarg("image_id")?;
///         Ok(())
///     })
///     .build()
///     .unwrap();
///
/// backend.task("jobs", "resize").unwrap().call_with(&serde_json::json!({ "image_id": 42 })).unwrap();
/// ```
pub struct BackendBuilder {
    transport: Arc<dyn Transport>,
    routers: HashMap<String, Router>,
    receivers: HashMap<String, Receiver>,
    hooks: HashMap<String, Vec<Hook>>,
    scope: Option<Box<dyn DispatchScope>>,
    poll_timeout: Duration,
    handle_signals: bool,
    errors: Vec<ConfigError>,
}

impl BackendBuilder {
    /// Start a builder over `transport`.
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            routers: HashMap::new(),
            receivers: HashMap::new(),
            hooks: HashMap::new(),
            scope: None,
            poll_timeout: DEFAULT_POLL_TIMEOUT,
            handle_signals: true,
            errors: Vec::new(),
        }
    }

    /// Start a builder from loaded settings: parses the connection URI,
    /// builds its transport, and applies the loop settings.
    pub fn from_settings(settings: &Settings) -> Result<Self, ConfigError> {
        settings.validate()?;
        let uri = settings.connection_uri()?;
        let transport = transport::connect(&uri, settings.beanstalk_options());
        Ok(Self::new(transport)
            .poll_timeout(settings.poll_timeout())
            .handle_signals(settings.handle_signals))
    }

    /// Register `handler` for `endpoint` on `queue`.
    ///
    /// Registering the same endpoint again replaces the earlier handler. An
    /// empty endpoint is reported by `build()` as `ConfigError::EmptyEndpoint`.
    pub fn task<F>(mut self, queue: &str, endpoint: &str, handler: F) -> Self
    where
        F: Fn(&Context<'_>) -> Result<(), HandlerError> + Send + Sync + 'static,
    {
        if endpoint.is_empty() {
            self.errors.push(ConfigError::EmptyEndpoint {
                queue: queue.to_string(),
            });
            return self;
        }
        self.routers
            .entry(queue.to_string())
            .or_insert_with(|| Router::new(queue))
            .set(endpoint, handler);
        self
    }

    /// Register a named function, using its name as the endpoint.
    ///
    /// Closures have no usable name; registering one here is reported by
    /// `build()` as `ConfigError::UnnamedHandler`.
    pub fn task_fn<F>(self, queue: &str, handler: F) -> Self
    where
        F: Fn(&Context<'_>) -> Result<(), HandlerError> + Send + Sync + 'static,
    {
        match handler_name::<F>() {
            Ok(endpoint) => self.task(queue, &endpoint, handler),
            Err(err) => {
                let mut builder = self;
                builder.errors.push(err);
                builder
            }
        }
    }

    /// Install a single callback that receives every envelope arriving on
    /// `queue`, bypassing endpoint routing.
    ///
    /// A second receiver for the same queue replaces the first. Combining a
    /// receiver with `task` registrations on one queue is rejected by `build()`.
    pub fn receiver<F>(mut self, queue: &str, handler: F) -> Self
    where
        F: Fn(&Envelope) -> Result<(), HandlerError> + Send + Sync + 'static,
    {
        self.receivers.insert(queue.to_string(), Box::new(handler));
        self
    }

    /// Append a hook run once, in registration order, before the consumer
    /// loop for `queue` starts.
    pub fn before_first_task<F>(mut self, queue: &str, hook: F) -> Self
    where
        F: Fn() -> Result<(), HandlerError> + Send + Sync + 'static,
    {
        self.hooks
            .entry(queue.to_string())
            .or_default()
            .push(Box::new(hook));
        self
    }

    /// Enter `scope` around every dispatch.
    pub fn scope<S: DispatchScope + 'static>(mut self, scope: S) -> Self {
        self.scope = Some(Box::new(scope));
        self
    }

    /// How long each dequeue waits before the stop flag is checked again.
    ///
    /// Must be non-zero and at most `MAX_POLL_TIMEOUT`; anything else is
    /// reported by `build()` as `ConfigError::InvalidPollTimeout`.
    pub fn poll_timeout(mut self, timeout: Duration) -> Self {
        if timeout.is_zero() || timeout > MAX_POLL_TIMEOUT {
            self.errors.push(ConfigError::InvalidPollTimeout(timeout));
        } else {
            self.poll_timeout = timeout;
        }
        self
    }

    /// Whether `run` installs SIGINT/SIGTERM handlers (requires the
    /// `signals` feature; ignored without it).
    pub fn handle_signals(mut self, enabled: bool) -> Self {
        self.handle_signals = enabled;
        self
    }

    /// Validate the registrations and produce the backend.
    pub fn build(self) -> Result<Backend, ConfigError> {
        if let Some(err) = self.errors.into_iter().next() {
            return Err(err);
        }

        let mut mixed: Vec<&String> = self
            .receivers
            .keys()
            .filter(|queue| self.routers.contains_key(*queue))
            .collect();
        mixed.sort();
        if let Some(queue) = mixed.first() {
            return Err(ConfigError::MixedRegistration {
                queue: queue.to_string(),
            });
        }

        let mut queues: HashMap<String, QueueHandler> = self
            .routers
            .into_iter()
            .map(|(queue, router)| (queue, QueueHandler::Tasks(router)))
            .collect();
        queues.extend(
            self.receivers
                .into_iter()
                .map(|(queue, receiver)| (queue, QueueHandler::Receiver(receiver))),
        );

        Ok(Backend::new(
            self.transport,
            queues,
            self.hooks,
            self.scope,
            self.poll_timeout,
            self.handle_signals,
        ))
    }

    /// Queues that currently have any registration.
    pub fn queues(&self) -> HashSet<&str> {
        self.routers
            .keys()
            .chain(self.receivers.keys())
            .chain(self.hooks.keys())
            .map(|s| s.as_str())
            .collect()
    }
}

/// Derive an endpoint from a function item's type name, e.g.
/// `my_app::tasks::resize` becomes `resize`.
fn handler_name<F>() -> Result<String, ConfigError> {
    let full = std::any::type_name::<F>();
    let name = full.rsplit("::").next().unwrap_or(full);
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_alphanumeric() || c == '_');
    if valid {
        Ok(name.to_string())
    } else {
        Err(ConfigError::UnnamedHandler(full.to_string()))
    }
}
