//! Run wiring
//!
//! Builds the run context and the engine services for one `build` or
//! `deploy` invocation. Dry runs swap the command runner and the health
//! probe for implementations that only log.

use anyhow::{Context, Result};
use conveyor_core::BuildConfig;
use conveyor_core::domain::context::{BuildContext, DetectedSource};
use conveyor_engine::cluster::KubectlClient;
use conveyor_engine::command::resolve_path;
use conveyor_engine::service::{
    ApprovalGate, ArtifactStore, BuiltinSteps, DeploySettings, DeploymentController,
    DryRunHealthProbe, FsArtifactStore, HealthProbe, HookRunner, HttpHealthProbe, Notifier,
    PipelineEngine, StandardStageExecutor, TracingNotifier, WebhookNotifier,
};
use conveyor_engine::source::resolve_source;
use conveyor_engine::{
    CancelSignal, CommandRunner, DryRunRunner, EngineConfig, ProcessRunner, RunContext,
};
use std::sync::Arc;
use tracing::info;

use crate::config::Config;

/// Everything a run needs, wired together
pub struct Runtime {
    pub ctx: Arc<RunContext>,
    pub engine: PipelineEngine,
    pub gate: Arc<ApprovalGate>,
    pub settings: EngineConfig,
}

impl Runtime {
    /// Resolves the build context and creates the services
    ///
    /// # Arguments
    /// * `config` - CLI configuration
    /// * `build_config` - Loaded build configuration
    /// * `settings` - Engine configuration
    /// * `cancel` - Signal triggered by Ctrl-C
    pub async fn prepare(
        config: &Config,
        build_config: BuildConfig,
        settings: EngineConfig,
        cancel: CancelSignal,
    ) -> Result<Self> {
        let project_dir = std::env::current_dir().context("Failed to read current directory")?;

        // Source detection reads git even on dry runs
        let detected = DetectedSource::from_env(|key| std::env::var(key).ok());
        let overrides = config.source.clone();
        let source = resolve_source(detected, overrides, &ProcessRunner, &project_dir).await;
        let build = BuildContext::new(source, &build_config.registry, &build_config.app_name);

        let runner: Arc<dyn CommandRunner> = if settings.dry_run {
            info!("Dry run: commands are logged, not executed");
            Arc::new(DryRunRunner)
        } else {
            Arc::new(ProcessRunner::new())
        };

        let store: Arc<dyn ArtifactStore> = Arc::new(FsArtifactStore::new(resolve_path(
            &project_dir,
            &settings.artifact_dir,
        )));

        let notifier: Arc<dyn Notifier> = match &build_config.notify_webhook {
            Some(url) if !settings.dry_run => Arc::new(WebhookNotifier::new(url.clone())),
            _ => Arc::new(TracingNotifier),
        };

        let health: Arc<dyn HealthProbe> = if settings.dry_run {
            Arc::new(DryRunHealthProbe)
        } else {
            Arc::new(HttpHealthProbe::new())
        };

        let ctx = RunContext::new(
            build,
            build_config,
            project_dir.clone(),
            &settings.workspace_base,
            cancel.clone(),
        )?;

        let cluster = Arc::new(
            KubectlClient::new(runner.clone(), project_dir, cancel).dry_run(settings.dry_run),
        );
        let gate = Arc::new(ApprovalGate::new(settings.auto_approve));
        let controller = Arc::new(DeploymentController::new(
            cluster,
            health,
            gate.clone(),
            store.clone(),
            DeploySettings {
                rollout_poll_interval: settings.rollout_poll_interval,
                approval_timeout: settings.approval_timeout,
            },
        ));

        let hooks = Arc::new(HookRunner::new(
            runner.clone(),
            store.clone(),
            notifier,
            settings.hook_timeout,
        ));
        let builtins = Arc::new(BuiltinSteps::new(store.clone(), Some(controller)));
        let executor = Arc::new(StandardStageExecutor::new(runner, builtins, hooks.clone()));
        let engine = PipelineEngine::new(executor, hooks, store, settings.pipeline_timeout);

        info!(
            "Run {} prepared for {} (image {})",
            ctx.run_id(),
            ctx.build().build_id(),
            ctx.build().image_reference()
        );

        Ok(Self {
            ctx,
            engine,
            gate,
            settings,
        })
    }
}
