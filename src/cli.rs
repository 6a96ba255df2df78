//! Command-line glue for worker processes.
//!
//! A worker binary parses `WorkerArgs`, loads `Settings`, registers its
//! tasks on a `BackendBuilder`, and hands the result to `run_worker`.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Args;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::backend::Backend;
use crate::config::Settings;
use crate::error::ConfigError;

/// Arguments every worker command accepts.
#[derive(Args, Debug, Clone)]
pub struct WorkerArgs {
    /// Queue to drain
    pub queue_name: String,

    /// Path to a settings file (toml, yaml or json)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Queue service URI, e.g. btq://127.0.0.1:11300
    #[arg(long, env = "BACKEND_CONNECTION_URI")]
    pub connection_uri: Option<String>,
}

impl WorkerArgs {
    /// Settings from file and environment, with `--connection-uri` on top.
    pub fn settings(&self) -> Result<Settings, ConfigError> {
        let mut settings = Settings::load(self.config.as_deref())?;
        if let Some(uri) = &self.connection_uri {
            settings.connection_uri = uri.clone();
        }
        Ok(settings)
    }
}

/// Install a fmt subscriber filtered by `RUST_LOG` (default `info`).
pub fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();
}

/// Run `backend`'s consumer loop on `queue` until it is stopped.
///
/// Success after a stop request; failure (logged) when a hook or the
/// transport ends the loop.
pub fn run_worker(backend: &Backend, queue: &str) -> ExitCode {
    match backend.run(queue) {
        Ok(_) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!(queue, error = %err, detail = ?err, "worker stopped on fatal error");
            ExitCode::FAILURE
        }
    }
}
