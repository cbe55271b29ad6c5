//! Stage domain types
//!
//! A pipeline is an ordered list of stages. Each stage is plain data: its
//! steps, a branch predicate, a timeout budget shared by all steps, and the
//! post-hooks that run once the steps are done.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::time::Duration;

use crate::domain::artifact::{ArtifactKind, ArtifactRef};
use crate::error::Failure;

/// Default stage budget when a definition omits `timeout_secs`
pub const DEFAULT_STAGE_TIMEOUT_SECS: u64 = 1800;

/// What happens to the stage when a step fails
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorPolicy {
    /// Failure aborts the remaining steps and fails the stage
    #[default]
    Fatal,
    /// Failure is recorded and execution continues
    Advisory,
}

/// Operations implemented by the engine itself rather than an external command
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuiltinStep {
    /// Writes deployment/service manifest templates to the manifests directory
    GenerateManifests,
    /// Writes build-info.json into the run workspace
    WriteBuildInfo,
    /// Runs the deployment controller for one target environment
    Deploy { target: String },
}

/// The action performed by a step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepAction {
    /// Shell command line, `{placeholder}` tokens expanded from the build context
    Run(String),
    Builtin(BuiltinStep),
}

/// One invocation inside a stage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Step {
    pub name: String,

    #[serde(flatten)]
    pub action: StepAction,

    #[serde(default)]
    pub policy: ErrorPolicy,

    /// Working directory relative to the project root
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<PathBuf>,

    /// JSON test summary written by the command (passed/failed/coverage)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<PathBuf>,
}

impl Step {
    /// Creates a fatal shell step
    pub fn run(name: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            action: StepAction::Run(command.into()),
            policy: ErrorPolicy::Fatal,
            working_dir: None,
            summary: None,
        }
    }

    /// Creates a fatal builtin step
    pub fn builtin(name: impl Into<String>, builtin: BuiltinStep) -> Self {
        Self {
            name: name.into(),
            action: StepAction::Builtin(builtin),
            policy: ErrorPolicy::Fatal,
            working_dir: None,
            summary: None,
        }
    }

    /// Marks the step as best-effort
    pub fn advisory(mut self) -> Self {
        self.policy = ErrorPolicy::Advisory;
        self
    }

    pub fn with_summary(mut self, path: impl Into<PathBuf>) -> Self {
        self.summary = Some(path.into());
        self
    }

    /// Human readable description of the action, used in reports
    pub fn describe(&self) -> String {
        match &self.action {
            StepAction::Run(command) => command.clone(),
            StepAction::Builtin(BuiltinStep::GenerateManifests) => {
                "builtin:generate_manifests".to_string()
            }
            StepAction::Builtin(BuiltinStep::WriteBuildInfo) => {
                "builtin:write_build_info".to_string()
            }
            StepAction::Builtin(BuiltinStep::Deploy { target }) => {
                format!("builtin:deploy {}", target)
            }
        }
    }
}

/// Which branches a stage is eligible for
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BranchPredicate {
    #[default]
    Always,
    Branches(BTreeSet<String>),
}

impl BranchPredicate {
    pub fn branches<I, S>(branches: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        BranchPredicate::Branches(branches.into_iter().map(Into::into).collect())
    }

    pub fn matches(&self, branch: &str) -> bool {
        match self {
            BranchPredicate::Always => true,
            BranchPredicate::Branches(set) => set.contains(branch),
        }
    }
}

/// Outcome selector of a post-hook
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HookTrigger {
    Always,
    Success,
    Failure,
}

/// Side effect performed by a post-hook
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HookAction {
    /// Shell command line
    Run(String),
    /// Copies a file into the artifact store under `{build_id}/{key}`
    Archive {
        path: PathBuf,
        key: String,
        #[serde(default)]
        kind: ArtifactKind,
    },
    /// Sends an outcome notification
    Notify { message: String },
    /// Tears down the run workspace (pipeline-level only)
    Cleanup,
}

/// Post-action keyed by stage or pipeline outcome
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostHook {
    #[serde(rename = "on")]
    pub trigger: HookTrigger,

    #[serde(flatten)]
    pub action: HookAction,
}

impl PostHook {
    pub fn new(trigger: HookTrigger, action: HookAction) -> Self {
        Self { trigger, action }
    }

    pub fn describe(&self) -> String {
        match &self.action {
            HookAction::Run(command) => command.clone(),
            HookAction::Archive { path, key, .. } => {
                format!("archive {} as {}", path.display(), key)
            }
            HookAction::Notify { .. } => "notify".to_string(),
            HookAction::Cleanup => "cleanup".to_string(),
        }
    }
}

fn default_stage_timeout() -> u64 {
    DEFAULT_STAGE_TIMEOUT_SECS
}

/// A named, independently gated unit of pipeline work
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stage {
    pub name: String,

    pub steps: Vec<Step>,

    #[serde(default)]
    pub when: BranchPredicate,

    /// Budget shared by every step of the stage
    #[serde(default = "default_stage_timeout")]
    pub timeout_secs: u64,

    #[serde(default)]
    pub hooks: Vec<PostHook>,

    /// A failure of this stage does not halt the pipeline
    #[serde(default)]
    pub continue_on_failure: bool,
}

impl Stage {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            steps: Vec::new(),
            when: BranchPredicate::Always,
            timeout_secs: DEFAULT_STAGE_TIMEOUT_SECS,
            hooks: Vec::new(),
            continue_on_failure: false,
        }
    }

    pub fn step(mut self, step: Step) -> Self {
        self.steps.push(step);
        self
    }

    pub fn when(mut self, predicate: BranchPredicate) -> Self {
        self.when = predicate;
        self
    }

    pub fn timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    pub fn hook(mut self, trigger: HookTrigger, action: HookAction) -> Self {
        self.hooks.push(PostHook::new(trigger, action));
        self
    }

    pub fn non_blocking(mut self) -> Self {
        self.continue_on_failure = true;
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Stage outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageOutcome {
    Passed,
    Failed,
    Skipped,
}

/// Outcome of a single step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Succeeded,
    Failed,
    TimedOut,
    Cancelled,
}

/// Machine readable test summary produced by a test runner
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestSummary {
    pub passed: u64,
    pub failed: u64,
    #[serde(default)]
    pub coverage: Option<f64>,
}

/// Record of one executed step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepRecord {
    pub name: String,
    pub command: String,
    pub policy: ErrorPolicy,
    pub status: StepStatus,
    pub exit_code: Option<i32>,
    pub elapsed_ms: u64,
    /// Last lines of stderr (or stdout when stderr is empty) on failure
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_tail: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<TestSummary>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StepRecord {
    pub fn succeeded(&self) -> bool {
        self.status == StepStatus::Succeeded
    }

    /// A failed step whose policy let the stage continue
    pub fn is_advisory_failure(&self) -> bool {
        !self.succeeded() && self.policy == ErrorPolicy::Advisory
    }
}

/// Record of one executed post-hook
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HookRecord {
    pub trigger: HookTrigger,
    pub description: String,
    pub succeeded: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Result of executing one stage
///
/// Built once by the stage executor and appended to the pipeline's result
/// log; it is never modified afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageResult {
    pub stage: String,
    pub outcome: StageOutcome,
    pub elapsed_ms: u64,
    pub steps: Vec<StepRecord>,
    pub hooks: Vec<HookRecord>,
    pub artifacts: Vec<ArtifactRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<Failure>,
}

impl StageResult {
    /// Result for a stage whose branch predicate did not match
    pub fn skipped(stage: &str) -> Self {
        Self {
            stage: stage.to_string(),
            outcome: StageOutcome::Skipped,
            elapsed_ms: 0,
            steps: Vec::new(),
            hooks: Vec::new(),
            artifacts: Vec::new(),
            failure: None,
        }
    }

    pub fn is_failed(&self) -> bool {
        self.outcome == StageOutcome::Failed
    }

    pub fn advisory_failures(&self) -> impl Iterator<Item = &StepRecord> {
        self.steps.iter().filter(|s| s.is_advisory_failure())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_branch_predicate() {
        let predicate = BranchPredicate::branches(["main", "develop"]);
        assert!(predicate.matches("main"));
        assert!(predicate.matches("develop"));
        assert!(!predicate.matches("feature/x"));
        assert!(BranchPredicate::Always.matches("anything"));
    }

    #[test]
    fn test_stage_deserializes_with_defaults() {
        let json = r#"{
            "name": "test",
            "steps": [
                { "name": "unit", "run": "pytest", "summary": "report.json" },
                { "name": "lint", "run": "flake8", "policy": "advisory" }
            ]
        }"#;

        let stage: Stage = serde_json::from_str(json).unwrap();
        assert_eq!(stage.when, BranchPredicate::Always);
        assert_eq!(stage.timeout_secs, DEFAULT_STAGE_TIMEOUT_SECS);
        assert!(!stage.continue_on_failure);
        assert_eq!(stage.steps[0].action, StepAction::Run("pytest".to_string()));
        assert_eq!(stage.steps[0].policy, ErrorPolicy::Fatal);
        assert_eq!(stage.steps[1].policy, ErrorPolicy::Advisory);
    }

    #[test]
    fn test_stage_deserializes_builtins_and_hooks() {
        let json = r#"{
            "name": "deploy-staging",
            "when": { "branches": ["develop"] },
            "timeout_secs": 900,
            "steps": [
                { "name": "manifests", "builtin": "generate_manifests" },
                { "name": "deploy", "builtin": { "deploy": { "target": "staging" } } }
            ],
            "hooks": [
                { "on": "always", "archive": { "path": "build/deployment.yaml", "key": "deployment.yaml" } },
                { "on": "failure", "notify": { "message": "deploy failed" } },
                { "on": "success", "run": "echo done" }
            ]
        }"#;

        let stage: Stage = serde_json::from_str(json).unwrap();
        assert!(stage.when.matches("develop"));
        assert!(!stage.when.matches("main"));
        assert_eq!(stage.timeout(), Duration::from_secs(900));
        assert_eq!(
            stage.steps[1].action,
            StepAction::Builtin(BuiltinStep::Deploy {
                target: "staging".to_string()
            })
        );
        assert_eq!(stage.hooks.len(), 3);
        assert_eq!(stage.hooks[0].trigger, HookTrigger::Always);
        assert!(matches!(
            stage.hooks[0].action,
            HookAction::Archive {
                kind: ArtifactKind::Mutable,
                ..
            }
        ));
    }

    #[test]
    fn test_step_describe() {
        assert_eq!(Step::run("t", "make test").describe(), "make test");
        assert_eq!(
            Step::builtin(
                "d",
                BuiltinStep::Deploy {
                    target: "prod".to_string()
                }
            )
            .describe(),
            "builtin:deploy prod"
        );
    }

    #[test]
    fn test_advisory_failures_are_reported() {
        let mut result = StageResult::skipped("lint");
        result.outcome = StageOutcome::Passed;
        result.steps.push(StepRecord {
            name: "flake8".to_string(),
            command: "flake8".to_string(),
            policy: ErrorPolicy::Advisory,
            status: StepStatus::Failed,
            exit_code: Some(1),
            elapsed_ms: 12,
            output_tail: None,
            summary: None,
            error: None,
        });

        assert_eq!(result.advisory_failures().count(), 1);
        assert!(!result.is_failed());
    }
}
