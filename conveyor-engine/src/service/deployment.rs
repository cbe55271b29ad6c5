//! Deployment controller
//!
//! Drives one target through the deployment state machine:
//!
//! 1. Render the manifest templates for the target (ManifestRendered)
//! 2. Wait for approval when the target requires it
//! 3. Check the cluster is reachable and apply the manifests (Applying)
//! 4. Poll rollout status until complete or the rollout budget runs out (RollingOut)
//! 5. Probe the health endpoint with exponential backoff (Verifying)
//!
//! Every transition goes into the run log, and the final record is stored
//! as `{build_id}/deployments/{target}.json`. A deployment cut short by its
//! stage deadline still fails through the state machine and is stored.

use conveyor_core::domain::approval::ApprovalStatus;
use conveyor_core::domain::artifact::ArtifactKind;
use conveyor_core::domain::deployment::{DeploymentRecord, DeploymentState, DeploymentTarget};
use conveyor_core::error::ErrorKind;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::cluster::{ClusterClient, RolloutStatus};
use crate::context::RunContext;
use crate::manifest;
use crate::service::approval::{ApprovalError, ApprovalGate};
use crate::service::artifact_store::{ArtifactContent, ArtifactStore};
use crate::service::health::HealthProbe;

/// Timing knobs of the controller
#[derive(Debug, Clone)]
pub struct DeploySettings {
    pub rollout_poll_interval: Duration,
    pub approval_timeout: Duration,
}

impl Default for DeploySettings {
    fn default() -> Self {
        Self {
            rollout_poll_interval: Duration::from_secs(5),
            approval_timeout: Duration::from_secs(1800),
        }
    }
}

/// Stops the state machine with a failure kind and message
struct Abort(ErrorKind, String);

impl Abort {
    fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self(kind, message.into())
    }
}

/// Controller for target deployments
pub struct DeploymentController {
    cluster: Arc<dyn ClusterClient>,
    health: Arc<dyn HealthProbe>,
    gate: Arc<ApprovalGate>,
    store: Arc<dyn ArtifactStore>,
    settings: DeploySettings,
}

impl DeploymentController {
    pub fn new(
        cluster: Arc<dyn ClusterClient>,
        health: Arc<dyn HealthProbe>,
        gate: Arc<ApprovalGate>,
        store: Arc<dyn ArtifactStore>,
        settings: DeploySettings,
    ) -> Self {
        Self {
            cluster,
            health,
            gate,
            store,
            settings,
        }
    }

    /// Deploys the build of `ctx` to `target`
    ///
    /// Never returns an error: failures are recorded in the returned record,
    /// which is always terminal. The record is also added to the run context.
    ///
    /// # Arguments
    /// * `target` - Target environment
    /// * `ctx` - Run context
    /// * `deadline` - Point after which the deployment fails, if any
    pub async fn deploy(
        &self,
        target: &DeploymentTarget,
        ctx: &RunContext,
        deadline: Option<Instant>,
    ) -> DeploymentRecord {
        let image = ctx.build().image_reference();
        let mut record = DeploymentRecord::new(&target.name, &image);

        info!("Deploying {} to {} ({})", image, target.name, target.namespace);
        ctx.log_info(
            &target.name,
            format!("Deploying {} to namespace {}", image, target.namespace),
        );

        let outcome = match deadline {
            Some(deadline) => {
                let driven =
                    tokio::time::timeout_at(deadline, self.drive(target, ctx, &mut record)).await;
                driven.unwrap_or_else(|_| Err(deadline_exceeded(target, &record)))
            }
            None => self.drive(target, ctx, &mut record).await,
        };

        if let Err(Abort(kind, message)) = outcome {
            error!("Deployment to {} failed: {}: {}", target.name, kind, message);
            ctx.log_error(&target.name, format!("{}: {}", kind, message));
            if let Err(e) = record.fail(kind, message) {
                error!("Could not record failure for {}: {}", target.name, e);
            }
        }

        self.persist(&record, ctx);
        ctx.record_deployment(record.clone());
        record
    }

    async fn drive(
        &self,
        target: &DeploymentTarget,
        ctx: &RunContext,
        record: &mut DeploymentRecord,
    ) -> Result<(), Abort> {
        let rendered = self.render(target, ctx)?;
        self.advance(record, DeploymentState::ManifestRendered, ctx)?;

        if target.requires_approval {
            self.await_approval(target, ctx, record).await?;
        }

        self.advance(record, DeploymentState::Applying, ctx)?;
        self.apply(target, &rendered, ctx).await?;

        self.advance(record, DeploymentState::RollingOut, ctx)?;
        self.await_rollout(target, ctx).await?;

        self.advance(record, DeploymentState::Verifying, ctx)?;
        self.verify(target, ctx).await?;

        self.advance(record, DeploymentState::Succeeded, ctx)?;
        info!("Deployment to {} succeeded", target.name);
        Ok(())
    }

    fn advance(
        &self,
        record: &mut DeploymentRecord,
        next: DeploymentState,
        ctx: &RunContext,
    ) -> Result<(), Abort> {
        let from = record.state();
        record
            .advance(next)
            .map_err(|e| Abort::new(ErrorKind::ClusterApply, e.to_string()))?;
        ctx.log_info(record.target(), format!("{} -> {}", from, next));
        Ok(())
    }

    // =============================================================================
    // Phases
    // =============================================================================

    /// Renders templates into the workspace and stores them as artifacts
    fn render(&self, target: &DeploymentTarget, ctx: &RunContext) -> Result<Vec<PathBuf>, Abort> {
        let render_error =
            |e: &dyn std::fmt::Display| Abort::new(ErrorKind::ManifestRender, e.to_string());

        let templates_dir = ctx.project_dir().join(&ctx.config().manifests_dir);
        let templates = manifest::load_templates(&templates_dir).map_err(|e| render_error(&e))?;
        let image = ctx.build().image_reference();
        let rendered = manifest::render(&templates, &image, &target.namespace)
            .map_err(|e| render_error(&e))?;

        let out_dir = ctx.workspace().join("rendered").join(&target.name);
        let paths = manifest::write_manifests(&out_dir, &rendered).map_err(|e| render_error(&e))?;

        let build_id = ctx.build().build_id();
        for manifest in &rendered {
            let key = format!("{}/manifests/{}/{}", build_id, target.name, manifest.file);
            if let Err(e) = self.store.put(
                &key,
                ArtifactContent::Bytes(manifest.content.as_bytes()),
                ArtifactKind::Mutable,
            ) {
                warn!("Failed to archive rendered manifest {}: {}", key, e);
            }
        }

        Ok(paths)
    }

    async fn await_approval(
        &self,
        target: &DeploymentTarget,
        ctx: &RunContext,
        record: &mut DeploymentRecord,
    ) -> Result<(), Abort> {
        let message = format!(
            "Deploy {} to {}?",
            ctx.build().image_reference(),
            target.name
        );
        ctx.log_info(&target.name, format!("Awaiting approval: {}", message));

        let decision = match self
            .gate
            .await_decision(&target.name, &message, self.settings.approval_timeout, ctx.cancel())
            .await
        {
            Ok(decision) => decision,
            Err(ApprovalError::Cancelled(_)) => {
                return Err(Abort::new(ErrorKind::Cancelled, "cancelled while awaiting approval"));
            }
            Err(e) => return Err(Abort::new(ErrorKind::ApprovalRejected, e.to_string())),
        };

        let status = decision.status();
        let actor = decision.decided_by().unwrap_or("nobody").to_string();
        record.record_approval(decision);

        match status {
            ApprovalStatus::Approved => {
                ctx.log_info(&target.name, format!("Approved by {}", actor));
                Ok(())
            }
            ApprovalStatus::Rejected => Err(Abort::new(
                ErrorKind::ApprovalRejected,
                format!("deployment to {} rejected by {}", target.name, actor),
            )),
            ApprovalStatus::TimedOut | ApprovalStatus::Pending => Err(Abort::new(
                ErrorKind::ApprovalTimedOut,
                format!(
                    "no decision for {} within {}s",
                    target.name,
                    self.settings.approval_timeout.as_secs()
                ),
            )),
        }
    }

    async fn apply(
        &self,
        target: &DeploymentTarget,
        manifests: &[PathBuf],
        ctx: &RunContext,
    ) -> Result<(), Abort> {
        self.cluster.check_connection().await.map_err(|e| {
            Abort::new(
                ErrorKind::ClusterApply,
                format!("cluster is not reachable: {}", e),
            )
        })?;

        if let Err(e) = self.cluster.ensure_namespace(&target.namespace).await {
            warn!("Could not ensure namespace {}: {}", target.namespace, e);
            ctx.log_warning(&target.name, format!("Namespace check failed: {}", e));
        }

        for path in manifests {
            self.cluster
                .apply(path, &target.namespace)
                .await
                .map_err(|e| Abort::new(ErrorKind::ClusterApply, e.to_string()))?;
            ctx.log_info(&target.name, format!("Applied {}", path.display()));
        }
        Ok(())
    }

    async fn await_rollout(
        &self,
        target: &DeploymentTarget,
        ctx: &RunContext,
    ) -> Result<(), Abort> {
        let deployment = ctx.config().deployment_name();
        let deadline = Instant::now().checked_add(target.rollout_timeout());

        loop {
            let query = self.cluster.rollout_status(&deployment, &target.namespace);
            let status = match deadline {
                Some(deadline) => tokio::time::timeout_at(deadline, query).await.ok(),
                None => Some(query.await),
            };

            match status {
                Some(Ok(RolloutStatus::Complete)) => {
                    ctx.log_info(&target.name, format!("Rollout of {} complete", deployment));
                    return Ok(());
                }
                Some(Ok(RolloutStatus::Failed(message))) => {
                    return Err(Abort::new(ErrorKind::RolloutFailed, message));
                }
                Some(Ok(RolloutStatus::Progressing(message))) => {
                    debug!("Rollout of {} progressing: {}", deployment, message);
                }
                Some(Err(e)) => {
                    warn!("Rollout status query for {} failed: {}", deployment, e);
                }
                None => {
                    warn!("Rollout status query for {} outlived the deadline", deployment);
                }
            }

            let now = Instant::now();
            if deadline.is_some_and(|deadline| now >= deadline) {
                return Err(Abort::new(
                    ErrorKind::RolloutTimeout,
                    format!(
                        "{} did not finish rolling out within {}s",
                        deployment, target.rollout_timeout_secs
                    ),
                ));
            }

            let poll = self.settings.rollout_poll_interval;
            let pause = deadline.map_or(poll, |deadline| poll.min(deadline - now));
            self.pause(pause, ctx).await?;
        }
    }

    async fn verify(&self, target: &DeploymentTarget, ctx: &RunContext) -> Result<(), Abort> {
        let check = &target.health_check;

        let base = match &check.url {
            Some(url) => url.clone(),
            None => self
                .cluster
                .service_endpoint(&ctx.config().service_name(), &target.namespace)
                .await
                .map(|endpoint| endpoint.base_url())
                .map_err(|e| {
                    Abort::new(
                        ErrorKind::HealthCheckFailure,
                        format!("could not discover service endpoint: {}", e),
                    )
                })?,
        };
        let url = check.probe_url(&base);
        let timeout = Duration::from_secs(check.request_timeout_secs);

        let mut last_error = String::new();
        for attempt in 1..=check.attempts {
            match self.health.probe(&url, timeout).await {
                Ok(status) => {
                    ctx.log_info(
                        &target.name,
                        format!("Health check {} answered {} (attempt {})", url, status, attempt),
                    );
                    return Ok(());
                }
                Err(e) => {
                    warn!(
                        "Health check {} attempt {}/{} failed: {}",
                        url, attempt, check.attempts, e
                    );
                    last_error = e;
                }
            }

            if attempt < check.attempts {
                self.pause(check.backoff(attempt), ctx).await?;
            }
        }

        Err(Abort::new(
            ErrorKind::HealthCheckFailure,
            format!(
                "{} unhealthy after {} attempts: {}",
                url, check.attempts, last_error
            ),
        ))
    }

    /// Sleeps unless the run is cancelled first
    async fn pause(&self, duration: Duration, ctx: &RunContext) -> Result<(), Abort> {
        tokio::select! {
            _ = tokio::time::sleep(duration) => Ok(()),
            _ = ctx.cancel().cancelled() => {
                Err(Abort::new(ErrorKind::Cancelled, "deployment cancelled"))
            }
        }
    }

    fn persist(&self, record: &DeploymentRecord, ctx: &RunContext) {
        let key = format!(
            "{}/deployments/{}.json",
            ctx.build().build_id(),
            record.target()
        );
        let result = serde_json::to_vec_pretty(record)
            .map_err(|e| e.to_string())
            .and_then(|json| {
                self.store
                    .put(&key, ArtifactContent::Bytes(&json), ArtifactKind::Mutable)
                    .map_err(|e| e.to_string())
            });
        if let Err(e) = result {
            warn!("Failed to store deployment record {}: {}", key, e);
        }
    }
}

/// Failure recorded when the deadline passes while `record` is in flight
fn deadline_exceeded(target: &DeploymentTarget, record: &DeploymentRecord) -> Abort {
    let state = record.state();
    let kind = match state {
        DeploymentState::ManifestRendered if target.requires_approval => {
            ErrorKind::ApprovalTimedOut
        }
        DeploymentState::RollingOut => ErrorKind::RolloutTimeout,
        DeploymentState::Verifying => ErrorKind::HealthCheckFailure,
        _ => ErrorKind::ClusterApply,
    };
    Abort::new(
        kind,
        format!("stage time budget ran out while {} was {}", target.name, state),
    )
}
