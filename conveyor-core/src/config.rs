//! Build configuration
//!
//! Loaded once from `build_config.json` before any stage runs. Anything
//! missing or malformed is a configuration error and aborts the run.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

use crate::domain::deployment::DeploymentTarget;
use crate::domain::pipeline::PipelineDefinition;
use crate::error::ConfigError;

fn default_port() -> u16 {
    8000
}

fn default_replicas() -> u32 {
    3
}

fn default_release_branches() -> Vec<String> {
    vec!["main".to_string(), "develop".to_string()]
}

fn default_manifests_dir() -> PathBuf {
    PathBuf::from("build")
}

/// Command lines used by the standard pipeline
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StandardCommands {
    #[serde(default)]
    pub install: Vec<String>,
    #[serde(default)]
    pub test: Vec<String>,
    #[serde(default)]
    pub lint: Vec<String>,
}

/// Contents of `build_config.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildConfig {
    /// Container registry (e.g., "localhost:5000")
    pub registry: String,

    pub app_name: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_replicas")]
    pub replicas: u32,

    /// Extra environment variables passed to every command
    #[serde(default)]
    pub env: BTreeMap<String, String>,

    /// Branches eligible for image build, publish and manifest stages
    #[serde(default = "default_release_branches")]
    pub release_branches: Vec<String>,

    /// Directory holding manifest templates, relative to the project root
    #[serde(default = "default_manifests_dir")]
    pub manifests_dir: PathBuf,

    #[serde(default)]
    pub commands: StandardCommands,

    /// Minimum coverage percentage accepted from test summaries
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coverage_threshold: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notify_webhook: Option<String>,

    /// Explicit stage list; the standard pipeline is used when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pipeline: Option<PipelineDefinition>,

    #[serde(default)]
    pub targets: Vec<DeploymentTarget>,
}

impl BuildConfig {
    /// Loads and validates a configuration file
    ///
    /// # Arguments
    /// * `path` - Path to the JSON configuration file
    ///
    /// # Errors
    /// Returns a `ConfigError` if the file is missing, malformed, or fails validation
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        let config: BuildConfig =
            serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;

        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.registry.trim().is_empty() {
            return Err(ConfigError::Invalid("registry cannot be empty".to_string()));
        }

        if self.app_name.trim().is_empty() {
            return Err(ConfigError::Invalid("app_name cannot be empty".to_string()));
        }

        if self.port == 0 {
            return Err(ConfigError::Invalid("port must be greater than 0".to_string()));
        }

        if self.replicas == 0 {
            return Err(ConfigError::Invalid(
                "replicas must be greater than 0".to_string(),
            ));
        }

        if let Some(threshold) = self.coverage_threshold {
            if !(0.0..=100.0).contains(&threshold) {
                return Err(ConfigError::Invalid(
                    "coverage_threshold must be between 0 and 100".to_string(),
                ));
            }
        }

        if let Some(pipeline) = &self.pipeline {
            pipeline.validate().map_err(ConfigError::Invalid)?;
        }

        let mut names = HashSet::new();
        for target in &self.targets {
            if target.name.trim().is_empty() {
                return Err(ConfigError::Invalid(
                    "target name cannot be empty".to_string(),
                ));
            }
            if !names.insert(target.name.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate target '{}'",
                    target.name
                )));
            }
            if target.namespace.trim().is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "target '{}' has an empty namespace",
                    target.name
                )));
            }
            if target.rollout_timeout_secs == 0 {
                return Err(ConfigError::Invalid(format!(
                    "target '{}' rollout_timeout_secs must be greater than 0",
                    target.name
                )));
            }
            if target.health_check.attempts == 0 {
                return Err(ConfigError::Invalid(format!(
                    "target '{}' health_check.attempts must be greater than 0",
                    target.name
                )));
            }
        }

        Ok(())
    }

    /// Looks up a deployment target by name
    pub fn target(&self, name: &str) -> Result<&DeploymentTarget, ConfigError> {
        self.targets
            .iter()
            .find(|t| t.name == name)
            .ok_or_else(|| ConfigError::UnknownTarget(name.to_string()))
    }

    pub fn deployment_name(&self) -> String {
        format!("{}-deployment", self.app_name)
    }

    pub fn service_name(&self) -> String {
        format!("{}-service", self.app_name)
    }
}
