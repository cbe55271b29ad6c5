//! Pipeline definitions
//!
//! Builds the stage lists the engine executes: the explicit pipeline from
//! the build configuration when present, otherwise the standard
//! install/test/lint/build/publish/manifests sequence, and the single-stage
//! pipeline used by `deploy <environment>`.

use conveyor_core::BuildConfig;
use conveyor_core::domain::artifact::ArtifactKind;
use conveyor_core::domain::deployment::DeploymentTarget;
use conveyor_core::domain::pipeline::PipelineDefinition;
use conveyor_core::domain::stage::{
    BranchPredicate, BuiltinStep, HookAction, HookTrigger, PostHook, Stage, Step,
};
use std::time::Duration;

/// Name of the pipeline generated for `build`
pub const STANDARD_PIPELINE: &str = "build";

/// Report file the test commands are expected to leave in the project root
pub const TEST_REPORT: &str = "test-report.json";

/// Margin added to the deploy stage budget on top of its own waits
const DEPLOY_STAGE_MARGIN_SECS: u64 = 300;

/// Returns the pipeline `build` executes for this configuration
pub fn pipeline_for(config: &BuildConfig) -> PipelineDefinition {
    match &config.pipeline {
        Some(pipeline) => pipeline.clone(),
        None => standard_pipeline(config),
    }
}

/// Generates the standard pipeline
///
/// Command stages with no configured commands are left out. Image, publish
/// and manifest stages only run on release branches.
pub fn standard_pipeline(config: &BuildConfig) -> PipelineDefinition {
    let release = BranchPredicate::branches(config.release_branches.iter().cloned());
    let mut stages = Vec::new();

    if !config.commands.install.is_empty() {
        stages.push(command_stage("install", &config.commands.install, false));
    }

    if !config.commands.test.is_empty() {
        stages.push(command_stage("test", &config.commands.test, false).hook(
            HookTrigger::Always,
            HookAction::Archive {
                path: TEST_REPORT.into(),
                key: TEST_REPORT.to_string(),
                kind: ArtifactKind::Mutable,
            },
        ));
    }

    if !config.commands.lint.is_empty() {
        stages.push(command_stage("lint", &config.commands.lint, true));
    }

    stages.push(
        Stage::new("build-image")
            .when(release.clone())
            .step(Step::run("docker-build", "docker build -t {image} .")),
    );

    // Both tags are pushed on every release branch
    stages.push(
        Stage::new("push-image")
            .when(release.clone())
            .step(Step::run("push-revision", "docker push {image}"))
            .step(Step::run("tag-latest", "docker tag {image} {latest_image}"))
            .step(Step::run("push-latest", "docker push {latest_image}")),
    );

    stages.push(
        Stage::new("manifests")
            .when(release)
            .step(Step::builtin("generate-manifests", BuiltinStep::GenerateManifests))
            .step(Step::builtin("build-info", BuiltinStep::WriteBuildInfo)),
    );

    PipelineDefinition {
        name: STANDARD_PIPELINE.to_string(),
        stages,
        hooks: outcome_hooks(),
    }
}

/// Pipeline run by `deploy <environment>`
///
/// A single stage wrapping the deployment controller. Its budget covers the
/// approval wait, the rollout timeout and the worst-case health retries.
pub fn deploy_pipeline(
    target: &DeploymentTarget,
    approval_timeout: Duration,
) -> PipelineDefinition {
    let approval = if target.requires_approval {
        approval_timeout.as_secs()
    } else {
        0
    };
    let health = &target.health_check;
    let health_secs = (1..health.attempts)
        .map(|attempt| health.backoff(attempt).as_secs())
        .fold(0u64, u64::saturating_add)
        .saturating_add(u64::from(health.attempts).saturating_mul(health.request_timeout_secs));

    let budget = [approval, target.rollout_timeout_secs, health_secs, DEPLOY_STAGE_MARGIN_SECS]
        .into_iter()
        .fold(0u64, u64::saturating_add);

    let stage = Stage::new(format!("deploy-{}", target.name))
        .timeout_secs(budget)
        .step(Step::builtin(
            "deploy",
            BuiltinStep::Deploy {
                target: target.name.clone(),
            },
        ));

    PipelineDefinition {
        name: format!("deploy-{}", target.name),
        stages: vec![stage],
        hooks: outcome_hooks(),
    }
}

fn command_stage(name: &str, commands: &[String], advisory: bool) -> Stage {
    commands
        .iter()
        .enumerate()
        .fold(Stage::new(name), |stage, (index, command)| {
            let step = Step::run(format!("{}-{}", name, index + 1), command.clone());
            stage.step(if advisory { step.advisory() } else { step })
        })
}

fn outcome_hooks() -> Vec<PostHook> {
    vec![
        PostHook::new(HookTrigger::Always, HookAction::Cleanup),
        PostHook::new(
            HookTrigger::Success,
            HookAction::Notify {
                message: "Build {build_id} of {app} on {branch} succeeded".to_string(),
            },
        ),
        PostHook::new(
            HookTrigger::Failure,
            HookAction::Notify {
                message: "Build {build_id} of {app} on {branch} failed".to_string(),
            },
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use conveyor_core::domain::stage::{ErrorPolicy, StepAction};

    fn config() -> BuildConfig {
        serde_json::from_str(
            r#"{
                "registry": "localhost:5000",
                "app_name": "myapp",
                "commands": {
                    "install": ["pip install -r requirements.txt"],
                    "test": ["pytest --cov"],
                    "lint": ["flake8 .", "black --check ."]
                },
                "targets": [
                    { "name": "production", "namespace": "production", "requires_approval": true,
                      "rollout_timeout_secs": 600 }
                ]
            }"#,
        )
        .unwrap()
    }

    fn names(pipeline: &PipelineDefinition) -> Vec<&str> {
        pipeline.stages.iter().map(|s| s.name.as_str()).collect()
    }

    #[test]
    fn test_standard_pipeline_order() {
        let pipeline = standard_pipeline(&config());
        assert!(pipeline.validate().is_ok());
        assert_eq!(
            names(&pipeline),
            vec!["install", "test", "lint", "build-image", "push-image", "manifests"]
        );
    }

    #[test]
    fn test_lint_steps_are_advisory() {
        let pipeline = standard_pipeline(&config());
        let lint = &pipeline.stages[2];
        assert_eq!(lint.steps.len(), 2);
        assert!(lint.steps.iter().all(|s| s.policy == ErrorPolicy::Advisory));
        assert!(pipeline.stages[0].steps.iter().all(|s| s.policy == ErrorPolicy::Fatal));
    }

    #[test]
    fn test_release_stages_are_branch_gated() {
        let pipeline = standard_pipeline(&config());
        for stage in &pipeline.stages[3..] {
            assert!(stage.when.matches("main"));
            assert!(stage.when.matches("develop"));
            assert!(!stage.when.matches("feature/x"));
        }
        assert!(pipeline.stages[0].when.matches("feature/x"));
    }

    #[test]
    fn test_push_stage_pushes_both_tags() {
        let pipeline = standard_pipeline(&config());
        let push = pipeline.stages.iter().find(|s| s.name == "push-image").unwrap();
        let commands: Vec<_> = push.steps.iter().map(|s| s.describe()).collect();
        assert_eq!(
            commands,
            vec![
                "docker push {image}",
                "docker tag {image} {latest_image}",
                "docker push {latest_image}"
            ]
        );
    }

    #[test]
    fn test_empty_command_stages_are_omitted() {
        let config: BuildConfig =
            serde_json::from_str(r#"{ "registry": "r", "app_name": "a" }"#).unwrap();
        let pipeline = standard_pipeline(&config);
        assert_eq!(names(&pipeline), vec!["build-image", "push-image", "manifests"]);
    }

    #[test]
    fn test_pipeline_hooks_cleanup_and_notify() {
        let pipeline = standard_pipeline(&config());
        assert_eq!(pipeline.hooks[0].action, HookAction::Cleanup);
        assert_eq!(pipeline.hooks[0].trigger, HookTrigger::Always);
        assert!(pipeline.hooks.iter().any(|h| h.trigger == HookTrigger::Failure));
    }

    #[test]
    fn test_explicit_pipeline_wins() {
        let mut config = config();
        config.pipeline = Some(PipelineDefinition {
            name: "custom".to_string(),
            stages: vec![Stage::new("only").step(Step::run("echo", "echo hi"))],
            hooks: Vec::new(),
        });
        assert_eq!(names(&pipeline_for(&config)), vec!["only"]);
    }

    #[test]
    fn test_deploy_pipeline_budget_covers_waits() {
        let config = config();
        let target = config.target("production").unwrap();
        let pipeline = deploy_pipeline(target, Duration::from_secs(1800));

        let stage = &pipeline.stages[0];
        assert_eq!(stage.name, "deploy-production");
        assert!(stage.timeout_secs > 1800 + 600);
        assert_eq!(
            stage.steps[0].action,
            StepAction::Builtin(BuiltinStep::Deploy {
                target: "production".to_string()
            })
        );
    }

    #[test]
    fn test_deploy_budget_saturates() {
        let mut target = config().target("production").unwrap().clone();
        target.rollout_timeout_secs = u64::MAX;
        target.health_check.request_timeout_secs = u64::MAX;

        let pipeline = deploy_pipeline(&target, Duration::from_secs(u64::MAX));
        assert_eq!(pipeline.stages[0].timeout_secs, u64::MAX);
    }
}
