//! Pipeline engine
//!
//! Executes the stages of a pipeline strictly in declared order against one
//! run context. The first failed stage halts the pipeline unless it is
//! marked non-blocking. Pipeline hooks always run afterwards and the
//! workspace is torn down exactly once, even when no cleanup hook exists.

use chrono::Utc;
use conveyor_core::domain::artifact::ArtifactKind;
use conveyor_core::domain::pipeline::{
    PipelineDefinition, PipelineOutcome, PipelineResult, ResultLog,
};
use conveyor_core::dto::report::PipelineReport;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::cancel::CancelReason;
use crate::context::RunContext;
use crate::service::artifact_store::{ArtifactContent, ArtifactStore};
use crate::service::hooks::{HookRunner, HookScope};
use crate::service::stage_executor::StageExecutor;

/// Runs pipelines
pub struct PipelineEngine {
    executor: Arc<dyn StageExecutor>,
    hooks: Arc<HookRunner>,
    store: Arc<dyn ArtifactStore>,
    budget: Duration,
}

impl PipelineEngine {
    /// # Arguments
    /// * `executor` - Stage executor
    /// * `hooks` - Runner for pipeline-level hooks
    /// * `store` - Store receiving the pipeline report
    /// * `budget` - Wall-clock budget for the whole run
    pub fn new(
        executor: Arc<dyn StageExecutor>,
        hooks: Arc<HookRunner>,
        store: Arc<dyn ArtifactStore>,
        budget: Duration,
    ) -> Self {
        Self {
            executor,
            hooks,
            store,
            budget,
        }
    }

    /// Runs a pipeline to completion
    ///
    /// # Returns
    /// The pipeline result; the result log contains one entry per stage that
    /// was reached, in declared order
    pub async fn run(&self, definition: &PipelineDefinition, ctx: &RunContext) -> PipelineResult {
        let started_at = Utc::now();
        let build_id = ctx.build().build_id();

        info!(
            "Starting pipeline {} for {} on branch {} ({} stages)",
            definition.name,
            build_id,
            ctx.build().branch(),
            definition.stages.len()
        );
        ctx.log_info(&definition.name, format!("Build {} started", build_id));

        let watchdog = {
            let cancel = ctx.cancel().clone();
            let budget = self.budget;
            tokio::spawn(async move {
                tokio::time::sleep(budget).await;
                if cancel.cancel(CancelReason::PipelineTimeout) {
                    warn!("Pipeline budget of {}s exhausted", budget.as_secs());
                }
            })
        };

        let mut log = ResultLog::new();
        let mut outcome = PipelineOutcome::Success;

        for (index, stage) in definition.stages.iter().enumerate() {
            if ctx.cancel().is_cancelled() {
                outcome = PipelineOutcome::Failure;
                break;
            }

            info!(
                "Stage {}/{}: {}",
                index + 1,
                definition.stages.len(),
                stage.name
            );
            let result = self.executor.execute(stage, ctx).await;
            let failed = result.is_failed();
            log.append(result);

            if failed {
                if stage.continue_on_failure && !ctx.cancel().is_cancelled() {
                    warn!("Stage {} failed but is non-blocking; continuing", stage.name);
                    continue;
                }
                outcome = PipelineOutcome::Failure;
                break;
            }
        }

        watchdog.abort();
        let cancelled = ctx.cancel().is_cancelled();
        if cancelled {
            outcome = PipelineOutcome::Failure;
        }

        let (hooks, _) = self
            .hooks
            .run_all(&definition.hooks, HookScope::Pipeline(&definition.name), outcome, ctx)
            .await;

        if !ctx.is_torn_down() {
            if let Err(e) = ctx.teardown() {
                error!("Failed to remove workspace {}: {}", ctx.workspace().display(), e);
            }
        }

        let result = PipelineResult {
            pipeline: definition.name.clone(),
            build_id,
            outcome,
            stage_results: log,
            hooks,
            started_at,
            finished_at: Utc::now(),
            cancelled,
        };

        match result.first_failure() {
            Some(failure) if !result.is_success() => {
                error!("Pipeline {} failed: {}", definition.name, failure)
            }
            _ if !result.is_success() => error!("Pipeline {} was cancelled", definition.name),
            _ => info!("Pipeline {} succeeded in {}ms", definition.name, result.elapsed_ms()),
        }

        result
    }

    /// Runs a pipeline and stores its report as `{build_id}/pipeline-report.json`
    pub async fn run_and_report(
        &self,
        definition: &PipelineDefinition,
        ctx: &RunContext,
    ) -> PipelineReport {
        let result = self.run(definition, ctx).await;
        let report = PipelineReport {
            result,
            deployments: ctx.deployments(),
            logs: ctx.logs(),
        };

        let key = format!("{}/pipeline-report.json", report.result.build_id);
        let stored = serde_json::to_vec_pretty(&report)
            .map_err(|e| e.to_string())
            .and_then(|json| {
                self.store
                    .put(&key, ArtifactContent::Bytes(&json), ArtifactKind::Mutable)
                    .map_err(|e| e.to_string())
            });
        if let Err(e) = stored {
            warn!("Failed to store pipeline report {}: {}", key, e);
        }

        report
    }
}
