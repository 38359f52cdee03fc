//! Mirror replicator service binary.
//!
//! Runs the continuous anonymizing mirror by default. `catch-up` (or `--full-reindex`) runs the
//! one-shot reconciliation instead, and `generate` feeds the source table with synthetic
//! customers. The process exits with status 0 after a clean shutdown or a completed catch-up and
//! with status 1 on any failure, after printing a report to stderr.

use clap::Parser;
use mirror_config::shared::MirrorConfig;
use mirror_telemetry::metrics::init_metrics;
use mirror_telemetry::tracing::init_tracing;
use std::process::ExitCode;
use tracing::error;

use crate::cli::{Cli, Mode};
use crate::config::load_mirror_config;
use crate::core::start_replicator_with_config;
use crate::error::{ReplicatorError, ReplicatorResult};

mod cli;
mod config;
mod core;
mod error;

fn main() -> ExitCode {
    let mode = match Cli::parse().mode() {
        Ok(mode) => mode,
        Err(err) => err.exit(),
    };

    match run(mode) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprint!("{}", err.render_report());
            ExitCode::FAILURE
        }
    }
}

/// Loads configuration, installs tracing and drives the selected mode on a Tokio runtime.
fn run(mode: Mode) -> ReplicatorResult<()> {
    let config = load_mirror_config()?;

    // Must outlive the runtime so that shutdown logs are flushed.
    let _log_flusher = init_tracing(env!("CARGO_BIN_NAME")).map_err(ReplicatorError::config)?;

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(async_main(config, mode))
}

async fn async_main(config: MirrorConfig, mode: Mode) -> ReplicatorResult<()> {
    // The exporter's listener is spawned on the current runtime.
    init_metrics(config.pipeline.id).map_err(ReplicatorError::config)?;

    let result = start_replicator_with_config(config, mode).await;
    if let Err(err) = &result {
        error!(error = %err, "mirror replicator failed");
    }

    result
}
