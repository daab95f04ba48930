//! ggufkit - download a HuggingFace checkpoint, quantize it with llama.cpp and
//! publish the GGUF files.
//!
//! Exit status: 0 when every stage succeeded, 1 when a stage failed or the
//! configuration could not be loaded, 130 when interrupted.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use ggufkit::{GgufkitError, HuggingFaceHub, PipelineConfig, PipelineContext, SystemToolRunner};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Exit status used after Ctrl-C, as a shell would report SIGINT.
const EXIT_INTERRUPTED: u8 = 130;

#[derive(Parser, Debug)]
#[command(name = "ggufkit")]
#[command(about = "Convert a HuggingFace checkpoint to GGUF quantizations and upload them")]
struct Args {
    /// Path to the TOML configuration file
    #[arg(short, long)]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    // Set up logging (RUST_LOG overrides the default level)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();

    match execute(args).await {
        Ok(code) => code,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::from(error_status(&e))
        }
    }
}

/// Exit status for a run that ended with `err`.
fn error_status(err: &anyhow::Error) -> u8 {
    match err.downcast_ref::<GgufkitError>() {
        Some(GgufkitError::Cancelled) => EXIT_INTERRUPTED,
        _ => 1,
    }
}

async fn execute(args: Args) -> Result<ExitCode> {
    let config = PipelineConfig::load(&args.config)
        .with_context(|| format!("invalid configuration {}", args.config.display()))?;

    let endpoint = config.hub_endpoint();
    info!("HuggingFace endpoint: {}", endpoint);
    let hub = HuggingFaceHub::new(&endpoint)?;
    let runner = SystemToolRunner;
    let ctx = PipelineContext::new(&config, &runner, &hub);

    // Dropping the run future kills any tool it is waiting on.
    let report = tokio::select! {
        report = ggufkit::run(&ctx) => report,
        _ = interrupted() => return Err(GgufkitError::Cancelled.into()),
    };

    report.log_summary();
    Ok(if report.succeeded() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

/// Resolves on Ctrl-C. Never resolves if the handler cannot be installed.
async fn interrupted() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
}
