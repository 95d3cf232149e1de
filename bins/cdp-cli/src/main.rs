//! # CDP CLI - Composable Data Pipelines runner
//!
//! This is the command-line entry point for running CDP pipelines. It loads
//! a YAML pipeline template, validates it, and either exits (`--test`) or
//! drives it to completion with proper logging, metrics exposition, and
//! graceful shutdown on signal.
//!
//! ## Usage
//!
//! ```bash
//! # Run a pipeline from a YAML template
//! cdp pipeline.yml
//!
//! # Substitute ${VAR} references from the environment before parsing
//! cdp pipeline.yml --environment
//!
//! # Validate the template and exit without running it
//! cdp pipeline.yml --test
//!
//! # Enable debug logging
//! LOG_LEVEL=debug cdp pipeline.yml
//! ```

mod config;
mod metrics;
mod runner;

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::signal;
#[cfg(unix)]
use tokio::signal::unix::{signal as unix_signal, SignalKind};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use cdp_core::context::EngineContext;
use cdp_core::pipeline::{make_pipeline_template, RawTemplate};

use config::RuntimeConfig;

/// Command-line arguments for the CDP pipeline runner.
#[derive(Parser, Debug)]
#[command(name = "cdp")]
#[command(about = "Composable Data Pipelines runner")]
#[command(long_about = "
CDP executes a streaming pipeline defined in a YAML template: one input
adapter, a graph of named steps each applying a pattern filter, an optional
window, and a transformation function, and a dead-letter sink for anything
refused downstream.

Examples:
  cdp pipeline.yml
  cdp pipeline.yml --environment
  cdp pipeline.yml --test
")]
struct Args {
    /// Path to the pipeline YAML template.
    #[arg(help = "Pipeline YAML template file")]
    pipelinefile: PathBuf,

    /// Substitute `${VAR}` references in the raw document text from the
    /// process environment before parsing.
    #[arg(short = 'e', long = "environment")]
    environment: bool,

    /// Validate the template and exit without running it.
    #[arg(short = 't', long = "test")]
    test: bool,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    let runtime_config = RuntimeConfig::from_env();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_env("LOG_LEVEL")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&runtime_config.log_level)),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    match run(args, runtime_config).await {
        Ok(()) => std::process::exit(0),
        Err(e) => {
            error!(error = %e, "cdp exited with an error");
            eprintln!("cdp: {e}");
            std::process::exit(1);
        }
    }
}

async fn run(args: Args, runtime_config: RuntimeConfig) -> anyhow::Result<()> {
    let document = std::fs::read_to_string(&args.pipelinefile)?;
    let document = if args.environment {
        runner::substitute_environment(&document)
    } else {
        document
    };

    let raw: RawTemplate = serde_yaml::from_str(&document)?;
    let template = make_pipeline_template(raw)?;
    info!(pipeline = %template.name, "template validated");

    if args.test {
        println!("template '{}' is valid", template.name);
        return Ok(());
    }

    let context = EngineContext::with_parse_buffer_size(runtime_config.parse_buffer_size);
    let cancel = CancellationToken::new();

    let handle = metrics::install_recorder(runtime_config.metrics_name_prefix.clone());
    let metrics_cancel = cancel.child_token();
    let metrics_task = metrics::spawn(
        handle,
        runtime_config.metrics_port,
        runtime_config.metrics_path.clone(),
        metrics_cancel,
    );

    let pipeline = runner::run(template, context.clone(), &runtime_config).await?;

    #[cfg(unix)]
    let mut terminate = unix_signal(SignalKind::terminate())?;
    #[cfg(unix)]
    let mut quit = unix_signal(SignalKind::quit())?;

    tokio::select! {
        _ = signal::ctrl_c() => {
            info!("received SIGINT, shutting down");
        }
        #[cfg(unix)]
        _ = terminate.recv() => {
            info!("received SIGTERM, shutting down");
        }
        #[cfg(unix)]
        _ = quit.recv() => {
            info!("received SIGQUIT, shutting down");
        }
        _ = pipeline.cancel.cancelled() => {
            info!("pipeline signalled its own shutdown");
        }
    }

    let dead_letters = pipeline.stop().await;
    report_dead_letters(&runtime_config, &dead_letters);

    // The metrics endpoint must outlive the backpressure supervisor
    // (cancelled inside `pipeline.stop()`), so it is only cancelled here.
    cancel.cancel();
    let _ = metrics_task.await;

    Ok(())
}

/// Invokes the dead-letter handler: writes accumulated dead
/// events as newline-delimited JSON to `DEAD_LETTER_TARGET` if configured,
/// otherwise just logs the count.
fn report_dead_letters(config: &RuntimeConfig, dead_letters: &[cdp_core::Event]) {
    if dead_letters.is_empty() {
        return;
    }
    match &config.dead_letter_target {
        Some(path) => {
            let body = dead_letters
                .iter()
                .filter_map(|e| serde_json::to_string(&e.to_serialized()).ok())
                .collect::<Vec<_>>()
                .join("\n");
            if let Err(err) = std::fs::write(path, body) {
                error!(error = %err, target = %path, "failed to write dead letters to target");
            }
        }
        None => {
            info!(count = dead_letters.len(), "dead letters discarded, no DEAD_LETTER_TARGET configured");
        }
    }
}
