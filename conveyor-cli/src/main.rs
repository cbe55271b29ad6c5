//! Conveyor CLI
//!
//! Command-line interface of the Conveyor deployment pipeline orchestrator.
//!
//! Exit codes: 0 success, 2 configuration error, 3 stage failure,
//! 4 approval rejected or timed out, 5 deployment failure, 130 cancelled.

mod commands;
mod config;
mod output;
mod runtime;

use clap::Parser;
use colored::*;
use commands::{Commands, handle_command};
use config::Config;
use conveyor_core::ConfigError;
use conveyor_engine::source::SourceOverrides;
use conveyor_engine::{CancelReason, CancelSignal};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Exit code for failures outside the pipeline taxonomy (e.g., I/O)
const INTERNAL_ERROR: i32 = 1;

#[derive(Parser)]
#[command(name = "conveyor")]
#[command(about = "Conveyor deployment pipeline orchestrator", long_about = None)]
struct Cli {
    /// Path of the build configuration file
    #[arg(
        long,
        global = true,
        env = "CONVEYOR_CONFIG",
        default_value = "build_config.json"
    )]
    config: PathBuf,

    /// Log commands instead of executing them
    #[arg(long, global = true, env = "CONVEYOR_DRY_RUN")]
    dry_run: bool,

    /// Wall-clock budget for the whole run, in seconds
    #[arg(long, global = true, value_parser = clap::value_parser!(u64).range(1..))]
    pipeline_timeout: Option<u64>,

    /// Budget for every stage, in seconds
    #[arg(long, global = true, value_parser = clap::value_parser!(u64).range(1..))]
    stage_timeout: Option<u64>,

    /// Rollout timeout for every target, in seconds
    #[arg(long, global = true, value_parser = clap::value_parser!(u64).range(1..))]
    rollout_timeout: Option<u64>,

    /// How long a deployment waits for an approval decision, in seconds
    #[arg(long, global = true, value_parser = clap::value_parser!(u64).range(1..))]
    approval_timeout: Option<u64>,

    /// Override the detected branch
    #[arg(long, global = true)]
    branch: Option<String>,

    /// Override the detected source revision
    #[arg(long, global = true)]
    revision: Option<String>,

    /// Override the detected build number
    #[arg(long, global = true)]
    build_number: Option<u64>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_filter = if cli.verbose {
        "conveyor_cli=debug,conveyor_engine=debug,tower_http=debug"
    } else {
        "conveyor_cli=info,conveyor_engine=info,tower_http=info"
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = Config {
        config_path: cli.config,
        dry_run: cli.dry_run,
        pipeline_timeout: cli.pipeline_timeout,
        stage_timeout: cli.stage_timeout,
        rollout_timeout: cli.rollout_timeout,
        approval_timeout: cli.approval_timeout,
        source: SourceOverrides {
            revision: cli.revision,
            branch: cli.branch,
            build_number: cli.build_number,
        },
    };

    let cancel = CancelSignal::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() && cancel.cancel(CancelReason::Requested) {
                warn!("Interrupt received, cancelling run");
            }
        });
    }

    let code = match handle_command(cli.command, &config, cancel).await {
        Ok(code) => code,
        Err(e) => {
            let code = e
                .chain()
                .find_map(|cause| cause.downcast_ref::<ConfigError>())
                .map_or(INTERNAL_ERROR, |config_error| config_error.kind().exit_code());
            error!("{:#}", e);
            eprintln!("{} {:#}", "Error:".red().bold(), e);
            code
        }
    };

    ExitCode::from(u8::try_from(code).unwrap_or(1))
}
