//! Runtime settings.
//!
//! Layered with the `config` crate, lowest precedence first:
//! built-in defaults, an optional settings file (`.toml`, `.yaml`, `.json`),
//! then `BACKEND_*` environment variables. `BACKEND_CONNECTION_URI` is the
//! one every deployment sets.

use std::path::Path;
use std::time::Duration;

use ::config::{Config, Environment, File};
use serde::Deserialize;

use crate::backend::MAX_POLL_TIMEOUT;
use crate::error::ConfigError;
use crate::transport::{BeanstalkOptions, ConnectionUri, DEFAULT_PRIORITY, DEFAULT_TTR};

/// Environment variable prefix.
pub const ENV_PREFIX: &str = "BACKEND";

pub const DEFAULT_CONNECTION_URI: &str = "btq://127.0.0.1:11300";

#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct Settings {
    /// `scheme://host[:port]` of the queue service.
    pub connection_uri: String,
    /// Bounded wait of each dequeue, in seconds.
    pub poll_timeout_secs: u64,
    /// Seconds a reserved job may run before the service releases it again.
    pub ttr_secs: u32,
    /// Priority given to enqueued jobs.
    pub priority: u32,
    /// Install SIGINT/SIGTERM handlers when a loop starts.
    pub handle_signals: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            connection_uri: DEFAULT_CONNECTION_URI.to_string(),
            poll_timeout_secs: 8,
            ttr_secs: DEFAULT_TTR,
            priority: DEFAULT_PRIORITY,
            handle_signals: true,
        }
    }
}

impl Settings {
    /// Load defaults, then `path` if given, then the process environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        Self::load_from(path, Environment::with_prefix(ENV_PREFIX))
    }

    /// Like `load`, with an explicit environment source.
    pub fn load_from(path: Option<&Path>, environment: Environment) -> Result<Self, ConfigError> {
        let defaults = Settings::default();
        let mut builder = Config::builder()
            .set_default("connection_uri", defaults.connection_uri)?
            .set_default("poll_timeout_secs", defaults.poll_timeout_secs as i64)?
            .set_default("ttr_secs", i64::from(defaults.ttr_secs))?
            .set_default("priority", i64::from(defaults.priority))?
            .set_default("handle_signals", defaults.handle_signals)?;

        if let Some(path) = path {
            builder = builder.add_source(File::from(path));
        }

        let settings: Settings = builder
            .add_source(environment.try_parsing(true))
            .build()?
            .try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Reject values the consumer loop cannot work with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let timeout = self.poll_timeout();
        if timeout.is_zero() || timeout > MAX_POLL_TIMEOUT {
            return Err(ConfigError::InvalidPollTimeout(timeout));
        }
        Ok(())
    }

    /// Parse `connection_uri`.
    pub fn connection_uri(&self) -> Result<ConnectionUri, ConfigError> {
        ConnectionUri::parse(&self.connection_uri)
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_secs(self.poll_timeout_secs)
    }

    pub fn beanstalk_options(&self) -> BeanstalkOptions {
        BeanstalkOptions {
            priority: self.priority,
            ttr: self.ttr_secs,
            ..BeanstalkOptions::default()
        }
    }
}
