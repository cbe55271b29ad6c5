//! Build command handler
//!
//! Runs the configured pipeline (or the standard one) for the current
//! checkout and prints its report.

use anyhow::Result;
use conveyor_core::ConfigError;
use conveyor_engine::CancelSignal;
use conveyor_engine::pipeline::pipeline_for;
use tracing::info;

use crate::config::Config;
use crate::output;
use crate::runtime::Runtime;

/// Handle `conveyor build`
///
/// # Returns
/// The exit code derived from the pipeline report
pub async fn handle_build_command(config: &Config, cancel: CancelSignal) -> Result<i32> {
    let build_config = config.load_build_config()?;
    let settings = config.engine_config(false)?;

    let mut pipeline = pipeline_for(&build_config);
    config.apply_stage_timeout(&mut pipeline);
    pipeline.validate().map_err(ConfigError::Invalid)?;

    let runtime = Runtime::prepare(config, build_config, settings, cancel).await?;
    info!(
        "Running pipeline {} with {} stage(s)",
        pipeline.name,
        pipeline.stages.len()
    );

    let report = runtime.engine.run_and_report(&pipeline, &runtime.ctx).await;
    output::print_pipeline_report(&report);

    Ok(report.exit_code())
}
