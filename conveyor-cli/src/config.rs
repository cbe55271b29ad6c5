//! Configuration module
//!
//! Resolves the settings of one invocation: the build configuration file,
//! the engine configuration from the environment, and the command line
//! overrides applied on top of both.

use conveyor_core::domain::pipeline::PipelineDefinition;
use conveyor_core::{BuildConfig, ConfigError};
use conveyor_engine::EngineConfig;
use conveyor_engine::source::SourceOverrides;
use std::path::PathBuf;
use std::time::Duration;
use tracing::debug;

/// CLI configuration
#[derive(Debug, Clone, Default)]
pub struct Config {
    /// Path of build_config.json
    pub config_path: PathBuf,

    pub dry_run: bool,

    pub pipeline_timeout: Option<u64>,
    pub stage_timeout: Option<u64>,
    pub rollout_timeout: Option<u64>,
    pub approval_timeout: Option<u64>,

    pub source: SourceOverrides,
}

impl Config {
    /// Loads build_config.json and applies the rollout timeout override
    pub fn load_build_config(&self) -> Result<BuildConfig, ConfigError> {
        let mut config = BuildConfig::load(&self.config_path)?;

        if let Some(secs) = self.rollout_timeout {
            for target in &mut config.targets {
                target.rollout_timeout_secs = secs;
            }
        }
        config.validate()?;

        debug!(
            "Loaded {} ({} target(s))",
            self.config_path.display(),
            config.targets.len()
        );
        Ok(config)
    }

    /// Engine configuration from the environment with command line overrides
    pub fn engine_config(&self, auto_approve: bool) -> Result<EngineConfig, ConfigError> {
        let invalid = |e: anyhow::Error| ConfigError::Invalid(e.to_string());

        let mut engine = EngineConfig::from_env().map_err(invalid)?;
        if let Some(secs) = self.pipeline_timeout {
            engine.pipeline_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = self.approval_timeout {
            engine.approval_timeout = Duration::from_secs(secs);
        }
        engine.dry_run = self.dry_run;
        engine.auto_approve = auto_approve;

        engine.validate().map_err(invalid)?;
        Ok(engine)
    }

    /// Applies the stage timeout override to every stage of a pipeline
    pub fn apply_stage_timeout(&self, pipeline: &mut PipelineDefinition) {
        if let Some(secs) = self.stage_timeout {
            for stage in &mut pipeline.stages {
                stage.timeout_secs = secs;
            }
        }
    }
}
