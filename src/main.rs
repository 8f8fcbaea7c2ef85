use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use ort::CPUExecutionProvider;
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

mod config;
mod engine;
mod error;
mod imaging;
mod pipeline;
mod report;

use config::{Cli, Config};
use engine::OrtEngine;

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let config = Config::try_from(cli).context("invalid configuration")?;

    ort::init()
        .with_name("cnn_inference")
        .with_execution_providers([CPUExecutionProvider::default().build()])
        .commit()?;

    let output = pipeline::run(&OrtEngine, &config)
        .inspect_err(|err| debug!(kind = ?err.kind(), "pipeline failed"))
        .with_context(|| format!("inference with {} failed", config.model_path.display()))?;

    if config.output_path.is_none() {
        info!(
            width = output.image.width,
            height = output.image.height,
            channels = output.image.channels,
            "no output image requested, result discarded"
        );
    }
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose != 0);

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{err:#}");
            ExitCode::FAILURE
        }
    }
}
