//! Commands module
//!
//! Defines all CLI commands and their handlers.

mod approve;
mod build;
mod deploy;

use anyhow::Result;
use clap::Subcommand;
use conveyor_engine::CancelSignal;

use crate::config::Config;

/// Top-level CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Run the test, build, publish and manifest stages
    Build,
    /// Deploy the current build to one target environment
    Deploy {
        /// Target environment (e.g., staging, production)
        environment: String,

        /// Resolve the approval gate immediately as approved by "cli"
        #[arg(long)]
        auto_approve: bool,
    },
    /// Approve or reject a deployment waiting at the approval gate
    Approve {
        /// Target environment awaiting a decision
        environment: String,

        /// Reject instead of approve
        #[arg(long)]
        reject: bool,

        /// Identity recorded as the decider
        #[arg(long, env = "CONVEYOR_ACTOR")]
        actor: String,

        /// Approval API URL of the waiting deploy
        #[arg(long, env = "CONVEYOR_APPROVAL_URL", default_value = "http://127.0.0.1:8787")]
        url: String,
    },
}

/// Handle a CLI command
///
/// Routes the command to the appropriate handler module.
///
/// # Arguments
/// * `command` - The command to execute
/// * `config` - The CLI configuration
/// * `cancel` - Signal triggered by Ctrl-C
///
/// # Returns
/// The process exit code
pub async fn handle_command(
    command: Commands,
    config: &Config,
    cancel: CancelSignal,
) -> Result<i32> {
    match command {
        Commands::Build => build::handle_build_command(config, cancel).await,
        Commands::Deploy {
            environment,
            auto_approve,
        } => deploy::handle_deploy_command(&environment, auto_approve, config, cancel).await,
        Commands::Approve {
            environment,
            reject,
            actor,
            url,
        } => approve::handle_approve_command(&environment, !reject, &actor, &url).await,
    }
}
