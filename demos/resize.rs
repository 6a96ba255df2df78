//! Image-resize worker demo.
//!
//! ```text
//! # terminal 1: drain the "jobs" queue
//! cargo run --example resize -- run jobs --connection-uri btq://127.0.0.1:11300
//!
//! # terminal 2: enqueue a resize of image 42
//! cargo run --example resize -- enqueue jobs 42 --width 320
//! ```

use std::process::ExitCode;

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};
use task_backend::cli::{self, WorkerArgs};
use task_backend::{Backend, BackendBuilder, Context, HandlerError};

#[derive(Parser)]
#[command(name = "resize")]
#[command(about = "Resize images on a background queue", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Enqueue a resize task
    Enqueue {
        #[command(flatten)]
        worker: WorkerArgs,

        image_id: u64,

        #[arg(long, default_value_t = 640)]
        width: u32,
    },
    /// Drain a queue until SIGINT/SIGTERM
    Run {
        #[command(flatten)]
        worker: WorkerArgs,
    },
}

#[derive(Debug, Serialize, Deserialize)]
struct Resize {
    image_id: u64,
    width: u32,
}

fn resize(ctx: &Context<'_>) -> Result<(), HandlerError> {
    let job: Resize = ctx.input()?;
    if job.width == 0 {
        return Err(HandlerError::Rejected(format!(
            "image {} cannot be resized to zero width",
            job.image_id
        )));
    }
    tracing::info!(image_id = job.image_id, width = job.width, "resized image");
    Ok(())
}

fn backend(worker: &WorkerArgs) -> anyhow::Result<Backend> {
    let settings = worker.settings().context("loading settings")?;
    let backend = BackendBuilder::from_settings(&settings)?
        .before_first_task(&worker.queue_name, || {
            tracing::info!("warming thumbnail cache");
            Ok(())
        })
        .task_fn(&worker.queue_name, resize)
        .build()?;
    Ok(backend)
}

fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();
    cli::init_tracing();

    match cli.command {
        Commands::Enqueue {
            worker,
            image_id,
            width,
        } => {
            let backend = backend(&worker)?;
            backend
                .task(&worker.queue_name, "resize")?
                .call_with(&Resize { image_id, width })
                .context("enqueueing resize")?;
            tracing::info!(queue = %worker.queue_name, image_id, "enqueued resize");
            Ok(ExitCode::SUCCESS)
        }
        Commands::Run { worker } => {
            let backend = backend(&worker)?;
            Ok(cli::run_worker(&backend, &worker.queue_name))
        }
    }
}
