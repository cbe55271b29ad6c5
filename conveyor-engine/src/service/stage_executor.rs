//! Stage execution
//!
//! Runs the steps of one stage in order under the stage's time budget,
//! applies each step's error policy, then runs the stage post-hooks.

use async_trait::async_trait;
use conveyor_core::domain::artifact::ArtifactRef;
use conveyor_core::domain::pipeline::PipelineOutcome;
use conveyor_core::domain::stage::{
    ErrorPolicy, Stage, StageOutcome, StageResult, Step, StepAction, StepRecord, StepStatus,
    TestSummary,
};
use conveyor_core::error::{ErrorKind, Failure};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::cancel::CancelReason;
use crate::command::{CommandOutput, CommandRunner, CommandSpec, resolve_path};
use crate::context::RunContext;
use crate::service::builtin::BuiltinSteps;
use crate::service::hooks::{HookRunner, HookScope};

/// Lines of output kept in a failed step's record
const OUTPUT_TAIL_LINES: usize = 20;

/// Service for executing stages
#[async_trait]
pub trait StageExecutor: Send + Sync {
    /// Executes one stage
    ///
    /// Never fails: every problem is reported in the returned result.
    async fn execute(&self, stage: &Stage, ctx: &RunContext) -> StageResult;
}

/// Standard implementation of StageExecutor
pub struct StandardStageExecutor {
    runner: Arc<dyn CommandRunner>,
    builtins: Arc<BuiltinSteps>,
    hooks: Arc<HookRunner>,
}

/// What one step produced
struct StepOutcome {
    record: StepRecord,
    artifacts: Vec<ArtifactRef>,
    failure: Option<Failure>,
}

impl StandardStageExecutor {
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        builtins: Arc<BuiltinSteps>,
        hooks: Arc<HookRunner>,
    ) -> Self {
        Self {
            runner,
            builtins,
            hooks,
        }
    }

    async fn run_step(
        &self,
        step: &Step,
        ctx: &RunContext,
        budget: Duration,
        deadline: Option<Instant>,
    ) -> StepOutcome {
        let started = Instant::now();
        let mut outcome = match &step.action {
            StepAction::Run(line) => self.run_command(step, line, ctx, budget).await,
            // Builtins honor the deadline themselves
            StepAction::Builtin(builtin) => match self.builtins.run(builtin, ctx, deadline).await {
                Ok(artifacts) => StepOutcome {
                    record: record(step, StepStatus::Succeeded),
                    artifacts,
                    failure: None,
                },
                Err(failure) => {
                    let status = if failure.kind == ErrorKind::Cancelled {
                        StepStatus::Cancelled
                    } else {
                        StepStatus::Failed
                    };
                    let mut record = record(step, status);
                    record.error = Some(failure.to_string());
                    StepOutcome {
                        record,
                        artifacts: Vec::new(),
                        failure: Some(failure),
                    }
                }
            },
        };
        outcome.record.elapsed_ms = started.elapsed().as_millis() as u64;
        outcome
    }

    async fn run_command(
        &self,
        step: &Step,
        line: &str,
        ctx: &RunContext,
        budget: Duration,
    ) -> StepOutcome {
        let line = ctx.build().expand(line);
        let dir = step
            .working_dir
            .as_deref()
            .map(|d| resolve_path(ctx.project_dir(), d))
            .unwrap_or_else(|| ctx.project_dir().to_path_buf());

        let spec = CommandSpec::shell(&line, &dir)
            .env(ctx.command_env())
            .timeout(budget);

        ctx.log_info(&step.name, format!("$ {}", line));
        let mut record = record(step, StepStatus::Succeeded);
        record.command = line.clone();

        let output = match self.runner.run(&spec, ctx.cancel()).await {
            Ok(output) => output,
            Err(e) => {
                record.status = StepStatus::Failed;
                record.error = Some(e.to_string());
                return StepOutcome {
                    record,
                    artifacts: Vec::new(),
                    failure: Some(Failure::new(ErrorKind::StageStepFailure, e.to_string())),
                };
            }
        };

        record.exit_code = output.exit_code;
        record.status = status_of(&output);

        if record.status == StepStatus::Failed {
            record.output_tail = Some(output.tail(OUTPUT_TAIL_LINES));
            record.error = Some(match output.exit_code {
                Some(code) => format!("'{}' exited with code {}", line, code),
                None => format!("'{}' was terminated by a signal", line),
            });
        }

        if let Some(summary_path) = &step.summary {
            if matches!(record.status, StepStatus::Succeeded | StepStatus::Failed) {
                self.apply_summary(&mut record, &resolve_path(&dir, summary_path), ctx);
            }
        }

        let failure = (record.status == StepStatus::Failed).then(|| {
            Failure::new(
                ErrorKind::StageStepFailure,
                record.error.clone().unwrap_or_else(|| format!("step '{}' failed", step.name)),
            )
        });

        StepOutcome {
            record,
            artifacts: Vec::new(),
            failure,
        }
    }

    /// Reads a test summary and fails the step on failed tests or low coverage
    fn apply_summary(&self, record: &mut StepRecord, path: &Path, ctx: &RunContext) {
        let summary: TestSummary = match std::fs::read(path)
            .map_err(|e| e.to_string())
            .and_then(|raw| serde_json::from_slice(&raw).map_err(|e| e.to_string()))
        {
            Ok(summary) => summary,
            Err(e) => {
                if record.status == StepStatus::Succeeded {
                    record.status = StepStatus::Failed;
                    record.error =
                        Some(format!("test summary {} unreadable: {}", path.display(), e));
                }
                return;
            }
        };

        ctx.log_info(
            &record.name,
            format!(
                "{} passed, {} failed{}",
                summary.passed,
                summary.failed,
                summary
                    .coverage
                    .map(|c| format!(", {:.1}% coverage", c))
                    .unwrap_or_default()
            ),
        );

        if record.status == StepStatus::Succeeded {
            if summary.failed > 0 {
                record.status = StepStatus::Failed;
                record.error = Some(format!("{} test(s) failed", summary.failed));
            } else if let (Some(threshold), Some(coverage)) =
                (ctx.config().coverage_threshold, summary.coverage)
            {
                if coverage < threshold {
                    record.status = StepStatus::Failed;
                    record.error = Some(format!(
                        "coverage {:.1}% below threshold {:.1}%",
                        coverage, threshold
                    ));
                }
            }
        }

        record.summary = Some(summary);
    }
}

fn record(step: &Step, status: StepStatus) -> StepRecord {
    StepRecord {
        name: step.name.clone(),
        command: step.describe(),
        policy: step.policy,
        status,
        exit_code: None,
        elapsed_ms: 0,
        output_tail: None,
        summary: None,
        error: None,
    }
}

fn status_of(output: &CommandOutput) -> StepStatus {
    if output.cancelled {
        StepStatus::Cancelled
    } else if output.timed_out {
        StepStatus::TimedOut
    } else if output.success() {
        StepStatus::Succeeded
    } else {
        StepStatus::Failed
    }
}

fn interrupted(reason: CancelReason, stage: &str) -> Failure {
    match reason {
        CancelReason::PipelineTimeout => Failure::new(
            ErrorKind::StageTimeout,
            format!("pipeline time budget exhausted during stage '{}'", stage),
        ),
        CancelReason::Requested => {
            Failure::new(ErrorKind::Cancelled, format!("stage '{}' cancelled", stage))
        }
    }
}

#[async_trait]
impl StageExecutor for StandardStageExecutor {
    async fn execute(&self, stage: &Stage, ctx: &RunContext) -> StageResult {
        let branch = ctx.build().branch();
        if !stage.when.matches(branch) {
            info!("Skipping stage {}: branch '{}' not eligible", stage.name, branch);
            ctx.log_info(&stage.name, format!("Skipped (branch '{}')", branch));
            return StageResult::skipped(&stage.name);
        }

        info!("Executing stage {}", stage.name);
        let started = Instant::now();
        // No deadline when the budget is beyond what the clock can represent
        let deadline = started.checked_add(stage.timeout());

        let mut steps = Vec::with_capacity(stage.steps.len());
        let mut artifacts = Vec::new();
        let mut failure = None;

        for step in &stage.steps {
            if let Some(reason) = ctx.cancel().reason() {
                failure = Some(interrupted(reason, &stage.name));
                break;
            }

            let remaining = deadline
                .map(|d| d.saturating_duration_since(Instant::now()))
                .unwrap_or_else(|| stage.timeout());
            if remaining.is_zero() {
                failure = Some(Failure::new(
                    ErrorKind::StageTimeout,
                    format!(
                        "stage '{}' exceeded its {}s budget",
                        stage.name, stage.timeout_secs
                    ),
                ));
                break;
            }

            let outcome = self.run_step(step, ctx, remaining, deadline).await;
            artifacts.extend(outcome.artifacts);
            let record = outcome.record;

            let stop = match record.status {
                StepStatus::Succeeded => None,
                StepStatus::TimedOut => Some(Failure::new(
                    ErrorKind::StageTimeout,
                    format!(
                        "stage '{}' exceeded its {}s budget in step '{}'",
                        stage.name, stage.timeout_secs, step.name
                    ),
                )),
                StepStatus::Cancelled => Some(interrupted(
                    ctx.cancel().reason().unwrap_or(CancelReason::Requested),
                    &stage.name,
                )),
                StepStatus::Failed if record.policy == ErrorPolicy::Advisory => {
                    warn!(
                        "Advisory step {} of stage {} failed: {}",
                        step.name,
                        stage.name,
                        record.error.as_deref().unwrap_or("unknown error")
                    );
                    ctx.log_warning(
                        &stage.name,
                        format!("Advisory step '{}' failed; continuing", step.name),
                    );
                    None
                }
                StepStatus::Failed => Some(outcome.failure.unwrap_or_else(|| {
                    Failure::new(
                        ErrorKind::StageStepFailure,
                        format!("step '{}' failed", step.name),
                    )
                })),
            };

            steps.push(record);
            if stop.is_some() {
                failure = stop;
                break;
            }
        }

        let outcome = if failure.is_some() {
            StageOutcome::Failed
        } else {
            StageOutcome::Passed
        };

        match &failure {
            Some(f) => {
                warn!("Stage {} failed: {}", stage.name, f);
                ctx.log_error(&stage.name, f.to_string());
            }
            None => ctx.log_info(&stage.name, "Passed"),
        }

        let hook_outcome = match outcome {
            StageOutcome::Failed => PipelineOutcome::Failure,
            _ => PipelineOutcome::Success,
        };
        let (hooks, archived) = self
            .hooks
            .run_all(&stage.hooks, HookScope::Stage(&stage.name), hook_outcome, ctx)
            .await;
        artifacts.extend(archived);

        StageResult {
            stage: stage.name.clone(),
            outcome,
            elapsed_ms: started.elapsed().as_millis() as u64,
            steps,
            hooks,
            artifacts,
            failure,
        }
    }
}
