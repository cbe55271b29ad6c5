//! Post-hook execution
//!
//! Hooks run after a stage or after the whole pipeline, keyed by outcome.
//! They run under their own budget with a fresh cancellation signal so that
//! archiving and cleanup still happen when the run itself was cancelled.

use conveyor_core::domain::artifact::ArtifactRef;
use conveyor_core::domain::pipeline::PipelineOutcome;
use conveyor_core::domain::stage::{HookAction, HookRecord, HookTrigger, PostHook};
use conveyor_core::dto::notification::Notification;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::cancel::CancelSignal;
use crate::command::{CommandRunner, CommandSpec, resolve_path};
use crate::context::RunContext;
use crate::service::artifact_store::{ArtifactContent, ArtifactStore};
use crate::service::notifier::Notifier;

/// Where a hook is attached
#[derive(Debug, Clone, Copy)]
pub enum HookScope<'a> {
    Stage(&'a str),
    Pipeline(&'a str),
}

impl HookScope<'_> {
    fn name(&self) -> &str {
        match self {
            HookScope::Stage(name) | HookScope::Pipeline(name) => name,
        }
    }
}

/// Hooks that apply to an outcome, always-hooks first
pub fn hooks_for(hooks: &[PostHook], outcome: PipelineOutcome) -> impl Iterator<Item = &PostHook> {
    let specific = match outcome {
        PipelineOutcome::Success => HookTrigger::Success,
        PipelineOutcome::Failure => HookTrigger::Failure,
    };
    hooks
        .iter()
        .filter(|h| h.trigger == HookTrigger::Always)
        .chain(hooks.iter().filter(move |h| h.trigger == specific))
}

/// Runs post-hooks
pub struct HookRunner {
    runner: Arc<dyn CommandRunner>,
    store: Arc<dyn ArtifactStore>,
    notifier: Arc<dyn Notifier>,
    timeout: Duration,
}

impl HookRunner {
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        store: Arc<dyn ArtifactStore>,
        notifier: Arc<dyn Notifier>,
        timeout: Duration,
    ) -> Self {
        Self {
            runner,
            store,
            notifier,
            timeout,
        }
    }

    /// Runs every hook matching `outcome`
    ///
    /// Hook failures are recorded, never propagated.
    ///
    /// # Returns
    /// One record per executed hook and the artifacts archived by them
    pub async fn run_all(
        &self,
        hooks: &[PostHook],
        scope: HookScope<'_>,
        outcome: PipelineOutcome,
        ctx: &RunContext,
    ) -> (Vec<HookRecord>, Vec<ArtifactRef>) {
        let mut records = Vec::new();
        let mut artifacts = Vec::new();

        for hook in hooks_for(hooks, outcome) {
            let run = self.run(hook, scope, outcome, ctx);
            let result = match tokio::time::timeout(self.timeout, run).await {
                Ok(result) => result,
                Err(_) => Err(format!("hook timed out after {}s", self.timeout.as_secs())),
            };

            let record = HookRecord {
                trigger: hook.trigger,
                description: hook.describe(),
                succeeded: result.is_ok(),
                error: result.as_ref().err().cloned(),
            };
            match result {
                Ok(Some(artifact)) => artifacts.push(artifact),
                Ok(None) => {}
                Err(e) => {
                    warn!("Hook '{}' of {} failed: {}", record.description, scope.name(), e);
                    ctx.log_warning(
                        scope.name(),
                        format!("Hook '{}' failed: {}", record.description, e),
                    );
                }
            }
            records.push(record);
        }

        (records, artifacts)
    }

    async fn run(
        &self,
        hook: &PostHook,
        scope: HookScope<'_>,
        outcome: PipelineOutcome,
        ctx: &RunContext,
    ) -> Result<Option<ArtifactRef>, String> {
        match &hook.action {
            HookAction::Run(line) => {
                let line = ctx.build().expand(line);
                let spec = CommandSpec::shell(&line, ctx.project_dir())
                    .env(ctx.command_env())
                    .timeout(self.timeout);
                let output = self
                    .runner
                    .run(&spec, &CancelSignal::new())
                    .await
                    .map_err(|e| e.to_string())?;
                if output.success() {
                    Ok(None)
                } else {
                    Err(format!(
                        "'{}' exited with {:?}: {}",
                        line,
                        output.exit_code,
                        output.tail(5)
                    ))
                }
            }

            HookAction::Archive { path, key, kind } => {
                let project_path = resolve_path(ctx.project_dir(), path);
                let source = if project_path.exists() {
                    project_path
                } else {
                    resolve_path(ctx.workspace(), path)
                };
                let key = format!("{}/{}", ctx.build().build_id(), key);
                let artifact = self
                    .store
                    .put(&key, ArtifactContent::File(&source), *kind)
                    .map_err(|e| e.to_string())?;
                ctx.log_info(scope.name(), format!("Archived {} as {}", source.display(), key));
                Ok(Some(artifact))
            }

            HookAction::Notify { message } => {
                let notification = Notification {
                    pipeline: scope.name().to_string(),
                    build_id: ctx.build().build_id(),
                    outcome,
                    message: ctx.build().expand(message),
                };
                self.notifier
                    .notify(&notification)
                    .await
                    .map(|_| None)
                    .map_err(|e| e.to_string())
            }

            HookAction::Cleanup => match scope {
                HookScope::Pipeline(_) => {
                    let removed = ctx.teardown().map_err(|e| format!("cleanup failed: {}", e))?;
                    if removed {
                        info!("Workspace {} removed", ctx.workspace().display());
                    }
                    Ok(None)
                }
                HookScope::Stage(_) => {
                    Err("cleanup is only allowed as a pipeline hook".to_string())
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::DryRunRunner;
    use crate::context::test_support::{build_config, run_context};
    use crate::service::artifact_store::FsArtifactStore;
    use crate::service::notifier::TracingNotifier;
    use async_trait::async_trait;
    use conveyor_core::domain::artifact::ArtifactKind;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingNotifier {
        sent: Mutex<Vec<Notification>>,
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        async fn notify(&self, notification: &Notification) -> anyhow::Result<()> {
            self.sent.lock().unwrap().push(notification.clone());
            Ok(())
        }
    }

    #[test]
    fn test_hooks_for_orders_always_first() {
        let hooks = vec![
            PostHook::new(HookTrigger::Failure, HookAction::Run("echo failed".to_string())),
            PostHook::new(HookTrigger::Success, HookAction::Run("echo ok".to_string())),
            PostHook::new(HookTrigger::Always, HookAction::Cleanup),
        ];

        let on_failure: Vec<_> = hooks_for(&hooks, PipelineOutcome::Failure)
            .map(|h| h.describe())
            .collect();
        assert_eq!(on_failure, vec!["cleanup", "echo failed"]);

        let on_success: Vec<_> = hooks_for(&hooks, PipelineOutcome::Success)
            .map(|h| h.describe())
            .collect();
        assert_eq!(on_success, vec!["cleanup", "echo ok"]);
    }

    #[tokio::test]
    async fn test_archive_and_notify() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("test-report.json"), r#"{"passed":1,"failed":0}"#).unwrap();
        let store = Arc::new(FsArtifactStore::new(dir.path().join("artifacts")));
        let notifier = Arc::new(RecordingNotifier::default());
        let runner = HookRunner::new(
            Arc::new(DryRunRunner),
            store.clone(),
            notifier.clone(),
            Duration::from_secs(5),
        );
        let ctx = run_context(dir.path(), "main", build_config());

        let hooks = vec![
            PostHook::new(
                HookTrigger::Always,
                HookAction::Archive {
                    path: "test-report.json".into(),
                    key: "test-report.json".to_string(),
                    kind: ArtifactKind::Mutable,
                },
            ),
            PostHook::new(
                HookTrigger::Failure,
                HookAction::Notify {
                    message: "Build {build_id} failed".to_string(),
                },
            ),
        ];

        let (records, artifacts) = runner
            .run_all(&hooks, HookScope::Stage("test"), PipelineOutcome::Failure, &ctx)
            .await;

        assert!(records.iter().all(|r| r.succeeded));
        assert_eq!(artifacts[0].key, "42-abc1234/test-report.json");
        assert!(store.get("42-abc1234/test-report.json").is_ok());

        let sent = notifier.sent.lock().unwrap();
        assert_eq!(sent[0].message, "Build 42-abc1234 failed");
        assert_eq!(sent[0].outcome, PipelineOutcome::Failure);
    }

    #[tokio::test]
    async fn test_failed_hook_is_recorded_not_propagated() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(FsArtifactStore::new(dir.path().join("artifacts")));
        let runner = HookRunner::new(
            Arc::new(DryRunRunner),
            store,
            Arc::new(TracingNotifier),
            Duration::from_secs(5),
        );
        let ctx = run_context(dir.path(), "main", build_config());

        let hooks = vec![PostHook::new(
            HookTrigger::Always,
            HookAction::Archive {
                path: "missing.json".into(),
                key: "missing.json".to_string(),
                kind: ArtifactKind::Mutable,
            },
        )];

        let (records, artifacts) = runner
            .run_all(&hooks, HookScope::Stage("test"), PipelineOutcome::Success, &ctx)
            .await;
        assert!(!records[0].succeeded);
        assert!(records[0].error.is_some());
        assert!(artifacts.is_empty());
    }

    #[tokio::test]
    async fn test_cleanup_runs_once() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(FsArtifactStore::new(dir.path().join("artifacts")));
        let runner = HookRunner::new(
            Arc::new(DryRunRunner),
            store,
            Arc::new(TracingNotifier),
            Duration::from_secs(5),
        );
        let ctx = run_context(dir.path(), "main", build_config());
        let hooks = vec![PostHook::new(HookTrigger::Always, HookAction::Cleanup)];

        runner
            .run_all(&hooks, HookScope::Pipeline("ci"), PipelineOutcome::Success, &ctx)
            .await;
        assert!(ctx.is_torn_down());
        assert!(!ctx.workspace().exists());

        let (records, _) = runner
            .run_all(&hooks, HookScope::Pipeline("ci"), PipelineOutcome::Success, &ctx)
            .await;
        assert!(records[0].succeeded);
    }
}
