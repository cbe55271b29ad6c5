//! Build context domain types
//!
//! The build context is resolved once when a pipeline run starts and is then
//! shared read-only by every stage. It carries the source revision, branch,
//! build number and the image reference derived from them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// CI platform the pipeline is running on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CiPlatform {
    GithubActions,
    GitlabCi,
    Jenkins,
    Local,
}

impl CiPlatform {
    /// Detects the CI platform from an environment lookup
    ///
    /// # Arguments
    /// * `lookup` - Returns the value of an environment variable, if set
    pub fn detect(lookup: &impl Fn(&str) -> Option<String>) -> Self {
        if lookup("GITHUB_ACTIONS").is_some() {
            CiPlatform::GithubActions
        } else if lookup("GITLAB_CI").is_some() {
            CiPlatform::GitlabCi
        } else if lookup("JENKINS_HOME").is_some() {
            CiPlatform::Jenkins
        } else {
            CiPlatform::Local
        }
    }

    fn revision_var(&self) -> Option<&'static str> {
        match self {
            CiPlatform::GithubActions => Some("GITHUB_SHA"),
            CiPlatform::GitlabCi => Some("CI_COMMIT_SHORT_SHA"),
            CiPlatform::Jenkins => Some("GIT_COMMIT_SHORT"),
            CiPlatform::Local => None,
        }
    }

    fn branch_var(&self) -> Option<&'static str> {
        match self {
            CiPlatform::GithubActions => Some("GITHUB_REF_NAME"),
            CiPlatform::GitlabCi => Some("CI_COMMIT_BRANCH"),
            CiPlatform::Jenkins => Some("GIT_BRANCH"),
            CiPlatform::Local => None,
        }
    }

    fn build_number_var(&self) -> Option<&'static str> {
        match self {
            CiPlatform::GithubActions => Some("GITHUB_RUN_NUMBER"),
            CiPlatform::GitlabCi => Some("CI_PIPELINE_IID"),
            CiPlatform::Jenkins => Some("BUILD_NUMBER"),
            CiPlatform::Local => None,
        }
    }
}

impl fmt::Display for CiPlatform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CiPlatform::GithubActions => write!(f, "github_actions"),
            CiPlatform::GitlabCi => write!(f, "gitlab_ci"),
            CiPlatform::Jenkins => write!(f, "jenkins"),
            CiPlatform::Local => write!(f, "local"),
        }
    }
}

/// Source information detected from the CI environment
///
/// Fields are `None` when the environment did not provide them; the engine
/// fills the gaps by asking git directly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetectedSource {
    pub platform: CiPlatform,
    pub revision: Option<String>,
    pub branch: Option<String>,
    pub build_number: Option<u64>,
}

impl DetectedSource {
    /// Reads revision, branch and build number from CI variables
    pub fn from_env(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let platform = CiPlatform::detect(&lookup);

        let revision = platform
            .revision_var()
            .and_then(|var| lookup(var))
            .filter(|v| !v.trim().is_empty())
            .map(|v| short_revision(v.trim()));

        let branch = platform
            .branch_var()
            .and_then(|var| lookup(var))
            .filter(|v| !v.trim().is_empty())
            .map(|v| v.trim().trim_start_matches("origin/").to_string());

        let build_number = platform
            .build_number_var()
            .and_then(|var| lookup(var))
            .and_then(|v| v.trim().parse::<u64>().ok());

        Self {
            platform,
            revision,
            branch,
            build_number,
        }
    }
}

/// Truncates a full commit hash to the 7-character short form
pub fn short_revision(revision: &str) -> String {
    revision.chars().take(7).collect()
}

/// Fully resolved source identity for one pipeline run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceInfo {
    pub platform: CiPlatform,
    pub revision: String,
    pub branch: String,
    pub build_number: u64,
}

/// Immutable context shared by every stage of a pipeline run
///
/// Fields are private; the context can only be built through
/// [`BuildContext::new`] and never changes afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BuildContext {
    revision: String,
    branch: String,
    build_number: u64,
    registry: String,
    app_name: String,
    platform: CiPlatform,
    created_at: DateTime<Utc>,
}

impl BuildContext {
    /// Creates the build context for a run
    ///
    /// # Arguments
    /// * `source` - Resolved revision, branch and build number
    /// * `registry` - Container registry host (e.g., "localhost:5000")
    /// * `app_name` - Application name used as the image repository
    pub fn new(source: SourceInfo, registry: &str, app_name: &str) -> Self {
        Self {
            revision: source.revision,
            branch: source.branch,
            build_number: source.build_number,
            registry: registry.trim_end_matches('/').to_string(),
            app_name: app_name.to_string(),
            platform: source.platform,
            created_at: Utc::now(),
        }
    }

    pub fn revision(&self) -> &str {
        &self.revision
    }

    pub fn branch(&self) -> &str {
        &self.branch
    }

    pub fn build_number(&self) -> u64 {
        self.build_number
    }

    pub fn registry(&self) -> &str {
        &self.registry
    }

    pub fn app_name(&self) -> &str {
        &self.app_name
    }

    pub fn platform(&self) -> CiPlatform {
        self.platform
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Image reference tagged with the source revision
    pub fn image_reference(&self) -> String {
        format!("{}/{}:{}", self.registry, self.app_name, self.revision)
    }

    /// Image reference tagged `latest`
    pub fn latest_reference(&self) -> String {
        format!("{}/{}:latest", self.registry, self.app_name)
    }

    /// Identifier used to namespace artifacts of this build
    pub fn build_id(&self) -> String {
        format!("{}-{}", self.build_number, self.revision)
    }

    /// Expands `{placeholder}` tokens in a command line
    ///
    /// Unknown tokens are left untouched.
    pub fn expand(&self, template: &str) -> String {
        let mut expanded = template.to_string();
        for (token, value) in self.substitutions() {
            expanded = expanded.replace(token, &value);
        }
        expanded
    }

    /// Environment variables exported to every command of the run
    pub fn env_vars(&self) -> Vec<(String, String)> {
        vec![
            ("CONVEYOR_IMAGE".to_string(), self.image_reference()),
            ("CONVEYOR_REVISION".to_string(), self.revision.clone()),
            ("CONVEYOR_BRANCH".to_string(), self.branch.clone()),
            (
                "CONVEYOR_BUILD_NUMBER".to_string(),
                self.build_number.to_string(),
            ),
            ("CONVEYOR_BUILD_ID".to_string(), self.build_id()),
        ]
    }

    fn substitutions(&self) -> [(&'static str, String); 8] {
        [
            ("{latest_image}", self.latest_reference()),
            ("{image}", self.image_reference()),
            ("{revision}", self.revision.clone()),
            ("{branch}", self.branch.clone()),
            ("{build_number}", self.build_number.to_string()),
            ("{build_id}", self.build_id()),
            ("{app}", self.app_name.clone()),
            ("{registry}", self.registry.clone()),
        ]
    }
}
