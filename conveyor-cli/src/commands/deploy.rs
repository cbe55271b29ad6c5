//! Deploy command handler
//!
//! Deploys the current build to one target. When the target requires
//! approval, the approval API is served for as long as the deploy runs so
//! that `conveyor approve` can reach the gate.

use anyhow::Result;
use colored::*;
use conveyor_core::ConfigError;
use conveyor_engine::CancelSignal;
use conveyor_engine::api;
use conveyor_engine::pipeline::deploy_pipeline;
use tokio::sync::oneshot;
use tracing::{info, warn};

use crate::config::Config;
use crate::output;
use crate::runtime::Runtime;

/// Handle `conveyor deploy <environment>`
///
/// # Arguments
/// * `environment` - Target name from build_config.json
/// * `auto_approve` - Approve the gate without waiting
/// * `config` - The CLI configuration
/// * `cancel` - Signal triggered by Ctrl-C
///
/// # Returns
/// The exit code derived from the deployment outcome
pub async fn handle_deploy_command(
    environment: &str,
    auto_approve: bool,
    config: &Config,
    cancel: CancelSignal,
) -> Result<i32> {
    let build_config = config.load_build_config()?;
    let settings = config.engine_config(auto_approve)?;

    let target = build_config.target(environment)?.clone();
    let mut pipeline = deploy_pipeline(&target, settings.approval_timeout);
    config.apply_stage_timeout(&mut pipeline);
    pipeline.validate().map_err(ConfigError::Invalid)?;

    let needs_server = target.requires_approval && !auto_approve;
    let listener = if needs_server {
        Some(api::bind(settings.approval_bind_addr).await?)
    } else {
        None
    };

    let runtime = Runtime::prepare(config, build_config, settings, cancel).await?;

    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let server = listener.map(|listener| {
        let gate = runtime.gate.clone();
        tokio::spawn(api::serve(listener, gate, async move {
            let _ = shutdown_rx.await;
        }))
    });

    if needs_server {
        println!(
            "{} {} requires approval. Decide with:",
            "⏸".yellow(),
            target.name.bold()
        );
        println!(
            "    conveyor approve {} --actor <name> [--reject] --url http://{}",
            target.name,
            runtime.settings.approval_bind_addr
        );
    }

    info!(
        "Deploying {} to {} ({})",
        runtime.ctx.build().image_reference(),
        target.name,
        target.namespace
    );
    let report = runtime.engine.run_and_report(&pipeline, &runtime.ctx).await;

    let _ = shutdown_tx.send(());
    if let Some(server) = server {
        match server.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("Approval API stopped with an error: {:#}", e),
            Err(e) => warn!("Approval API task failed: {}", e),
        }
    }

    output::print_pipeline_report(&report);
    Ok(report.exit_code())
}
