//! Builtin steps
//!
//! Steps implemented inside the engine rather than by an external command.

use conveyor_core::domain::artifact::{ArtifactKind, ArtifactRef};
use conveyor_core::domain::stage::BuiltinStep;
use conveyor_core::dto::build_info::BuildInfo;
use conveyor_core::error::{ErrorKind, Failure};
use std::sync::Arc;
use tokio::time::Instant;
use tracing::info;

use crate::context::RunContext;
use crate::manifest;
use crate::service::artifact_store::{ArtifactContent, ArtifactStore};
use crate::service::deployment::DeploymentController;

/// Executes builtin steps
pub struct BuiltinSteps {
    store: Arc<dyn ArtifactStore>,
    deployer: Option<Arc<DeploymentController>>,
}

impl BuiltinSteps {
    /// # Arguments
    /// * `store` - Store receiving generated files
    /// * `deployer` - Controller for `deploy` steps; without it they fail
    pub fn new(
        store: Arc<dyn ArtifactStore>,
        deployer: Option<Arc<DeploymentController>>,
    ) -> Self {
        Self { store, deployer }
    }

    /// Runs one builtin step
    ///
    /// # Arguments
    /// * `step` - Builtin to run
    /// * `ctx` - Run context
    /// * `deadline` - End of the enclosing stage's budget, if bounded
    ///
    /// # Returns
    /// Artifacts produced by the step, or the failure that stops it
    pub async fn run(
        &self,
        step: &BuiltinStep,
        ctx: &RunContext,
        deadline: Option<Instant>,
    ) -> Result<Vec<ArtifactRef>, Failure> {
        match step {
            BuiltinStep::GenerateManifests => self.generate_manifests(ctx),
            BuiltinStep::WriteBuildInfo => self.write_build_info(ctx),
            BuiltinStep::Deploy { target } => self.deploy(target, ctx, deadline).await,
        }
    }

    fn generate_manifests(&self, ctx: &RunContext) -> Result<Vec<ArtifactRef>, Failure> {
        let failure =
            |e: manifest::RenderError| Failure::new(ErrorKind::ManifestRender, e.to_string());

        let templates = manifest::generate_templates(ctx.config(), ctx.build()).map_err(failure)?;
        let dir = ctx.project_dir().join(&ctx.config().manifests_dir);
        manifest::write_manifests(&dir, &templates).map_err(failure)?;

        let build_id = ctx.build().build_id();
        let mut artifacts = Vec::with_capacity(templates.len());
        for template in &templates {
            let key = format!("{}/templates/{}", build_id, template.file);
            let content = ArtifactContent::Bytes(template.content.as_bytes());
            let artifact = self
                .store
                .put(&key, content, ArtifactKind::Fingerprint)
                .map_err(|e| Failure::new(ErrorKind::StageStepFailure, e.to_string()))?;
            artifacts.push(artifact);
        }

        ctx.log_info(
            "manifests",
            format!("Generated {} manifest template(s) in {}", templates.len(), dir.display()),
        );
        Ok(artifacts)
    }

    fn write_build_info(&self, ctx: &RunContext) -> Result<Vec<ArtifactRef>, Failure> {
        let failure = |message: String| Failure::new(ErrorKind::StageStepFailure, message);

        let info = BuildInfo::from(ctx.build());
        let json = serde_json::to_vec_pretty(&info).map_err(|e| failure(e.to_string()))?;

        let path = ctx.workspace().join("build-info.json");
        std::fs::write(&path, &json)
            .map_err(|e| failure(format!("Failed to write {}: {}", path.display(), e)))?;

        let key = format!("{}/build-info.json", ctx.build().build_id());
        let artifact = self
            .store
            .put(&key, ArtifactContent::Bytes(&json), ArtifactKind::Mutable)
            .map_err(|e| failure(e.to_string()))?;

        info!("Build info written to {}", path.display());
        Ok(vec![artifact])
    }

    async fn deploy(
        &self,
        target: &str,
        ctx: &RunContext,
        deadline: Option<Instant>,
    ) -> Result<Vec<ArtifactRef>, Failure> {
        let deployer = self.deployer.as_ref().ok_or_else(|| {
            Failure::new(ErrorKind::Configuration, "no deployment controller configured")
        })?;
        let target = ctx
            .config()
            .target(target)
            .map_err(|e| Failure::new(ErrorKind::Configuration, e.to_string()))?
            .clone();

        let record = deployer.deploy(&target, ctx, deadline).await;
        match record.error() {
            Some(failure) => Err(failure.clone()),
            None if record.is_succeeded() => Ok(Vec::new()),
            None => Err(Failure::new(
                ErrorKind::ClusterApply,
                format!("deployment to {} ended in {}", target.name, record.state()),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::test_support::{build_config, run_context};
    use crate::service::artifact_store::FsArtifactStore;

    #[tokio::test]
    async fn test_generate_manifests_writes_and_archives() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(FsArtifactStore::new(dir.path().join("artifacts")));
        let builtins = BuiltinSteps::new(store.clone(), None);
        let ctx = run_context(dir.path(), "main", build_config());

        let artifacts = builtins.run(&BuiltinStep::GenerateManifests, &ctx, None).await.unwrap();

        assert_eq!(artifacts.len(), 2);
        assert!(artifacts.iter().all(|a| a.kind == ArtifactKind::Fingerprint));
        assert!(dir.path().join("build/deployment.yaml").is_file());
        assert!(dir.path().join("build/service.yaml").is_file());

        // Regenerating the same build is a no-op for fingerprints
        let again = builtins.run(&BuiltinStep::GenerateManifests, &ctx, None).await.unwrap();
        assert_eq!(artifacts, again);
    }

    #[tokio::test]
    async fn test_write_build_info() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(FsArtifactStore::new(dir.path().join("artifacts")));
        let builtins = BuiltinSteps::new(store.clone(), None);
        let ctx = run_context(dir.path(), "develop", build_config());

        builtins.run(&BuiltinStep::WriteBuildInfo, &ctx, None).await.unwrap();

        let raw = store.get("42-abc1234/build-info.json").unwrap();
        let info: BuildInfo = serde_json::from_slice(&raw).unwrap();
        assert_eq!(info.branch, "develop");
        assert_eq!(info.image_tag, "localhost:5000/myapp:abc1234");
        assert!(ctx.workspace().join("build-info.json").is_file());
    }

    #[tokio::test]
    async fn test_deploy_without_controller_fails() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(FsArtifactStore::new(dir.path().join("artifacts")));
        let builtins = BuiltinSteps::new(store, None);
        let ctx = run_context(dir.path(), "main", build_config());

        let failure = builtins
            .run(&BuiltinStep::Deploy { target: "staging".to_string() }, &ctx, None)
            .await
            .unwrap_err();
        assert_eq!(failure.kind, ErrorKind::Configuration);
    }
}
