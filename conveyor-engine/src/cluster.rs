//! Cluster access
//!
//! The deployment controller only needs five things from a cluster: a
//! connectivity check, a namespace, manifest application, rollout status and
//! the address of the deployed service. [`KubectlClient`] implements them by
//! driving `kubectl` through a [`CommandRunner`].

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

use crate::cancel::CancelSignal;
use crate::command::{CommandError, CommandOutput, CommandRunner, CommandSpec};

#[derive(Debug, Error)]
pub enum ClusterError {
    #[error(transparent)]
    Command(#[from] CommandError),

    #[error("'{command}' failed: {message}")]
    Failed { command: String, message: String },

    #[error("Unexpected output from '{command}': {message}")]
    Output { command: String, message: String },
}

/// Rollout progress reported by the cluster
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RolloutStatus {
    Complete,
    Progressing(String),
    /// The cluster gave up on the rollout (e.g., progress deadline exceeded)
    Failed(String),
}

/// Externally reachable address of a service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceEndpoint {
    pub host: String,
    pub port: u16,
}

impl ServiceEndpoint {
    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }
}

/// Operations the deployment controller performs against a cluster
#[async_trait]
pub trait ClusterClient: Send + Sync {
    async fn check_connection(&self) -> Result<(), ClusterError>;

    /// Creates the namespace if it does not exist yet
    async fn ensure_namespace(&self, namespace: &str) -> Result<(), ClusterError>;

    async fn apply(&self, manifest: &Path, namespace: &str) -> Result<(), ClusterError>;

    /// Queries rollout progress once, without waiting
    async fn rollout_status(
        &self,
        deployment: &str,
        namespace: &str,
    ) -> Result<RolloutStatus, ClusterError>;

    async fn service_endpoint(
        &self,
        service: &str,
        namespace: &str,
    ) -> Result<ServiceEndpoint, ClusterError>;
}

/// `kubectl` backed cluster client
pub struct KubectlClient {
    runner: Arc<dyn CommandRunner>,
    working_dir: PathBuf,
    timeout: Duration,
    cancel: CancelSignal,
    dry_run: bool,
}

impl KubectlClient {
    /// Creates a client
    ///
    /// # Arguments
    /// * `runner` - Runner used to execute kubectl
    /// * `working_dir` - Directory kubectl runs in
    /// * `cancel` - Run cancellation signal
    pub fn new(runner: Arc<dyn CommandRunner>, working_dir: PathBuf, cancel: CancelSignal) -> Self {
        Self {
            runner,
            working_dir,
            timeout: Duration::from_secs(120),
            cancel,
            dry_run: false,
        }
    }

    /// Applies with `--dry-run=client` and reports rollouts as complete
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    async fn kubectl(&self, args: &[&str]) -> Result<(String, CommandOutput), ClusterError> {
        let spec = CommandSpec::new("kubectl", args.iter().copied(), &self.working_dir)
            .timeout(self.timeout);
        let command = spec.display();
        let output = self.runner.run(&spec, &self.cancel).await?;
        Ok((command, output))
    }

    fn failure(command: String, output: &CommandOutput) -> ClusterError {
        let message = if output.timed_out {
            "timed out".to_string()
        } else if output.cancelled {
            "cancelled".to_string()
        } else {
            output.tail(5)
        };
        ClusterError::Failed { command, message }
    }
}

#[async_trait]
impl ClusterClient for KubectlClient {
    async fn check_connection(&self) -> Result<(), ClusterError> {
        let (command, output) = self.kubectl(&["cluster-info"]).await?;
        if !output.success() {
            return Err(Self::failure(command, &output));
        }
        debug!("Cluster reachable");
        Ok(())
    }

    async fn ensure_namespace(&self, namespace: &str) -> Result<(), ClusterError> {
        let (command, output) = self.kubectl(&["create", "namespace", namespace]).await?;
        let exists =
            output.stderr.contains("AlreadyExists") || output.stderr.contains("already exists");
        if output.success() || exists {
            return Ok(());
        }
        Err(Self::failure(command, &output))
    }

    async fn apply(&self, manifest: &Path, namespace: &str) -> Result<(), ClusterError> {
        let manifest = manifest.to_string_lossy();
        let mut args = vec!["apply", "-f", &*manifest, "-n", namespace];
        if self.dry_run {
            args.push("--dry-run=client");
        }

        let (command, output) = self.kubectl(&args).await?;
        if !output.success() {
            return Err(Self::failure(command, &output));
        }
        info!("Applied {} to {}", manifest, namespace);
        Ok(())
    }

    async fn rollout_status(
        &self,
        deployment: &str,
        namespace: &str,
    ) -> Result<RolloutStatus, ClusterError> {
        if self.dry_run {
            return Ok(RolloutStatus::Complete);
        }

        let target = format!("deployment/{}", deployment);
        let (command, output) = self
            .kubectl(&["rollout", "status", &target, "-n", namespace, "--watch=false"])
            .await?;
        parse_rollout_status(command, &output)
    }

    async fn service_endpoint(
        &self,
        service: &str,
        namespace: &str,
    ) -> Result<ServiceEndpoint, ClusterError> {
        if self.dry_run {
            return Ok(ServiceEndpoint {
                host: format!("{}.{}.svc", service, namespace),
                port: 80,
            });
        }

        let (command, output) = self
            .kubectl(&["get", "service", service, "-n", namespace, "-o", "json"])
            .await?;
        if !output.success() {
            return Err(Self::failure(command, &output));
        }

        let json: serde_json::Value =
            serde_json::from_str(&output.stdout).map_err(|e| ClusterError::Output {
                command: command.clone(),
                message: e.to_string(),
            })?;
        parse_service_endpoint(&json).ok_or(ClusterError::Output {
            command,
            message: "service has no reachable address".to_string(),
        })
    }
}

/// Interprets one `kubectl rollout status --watch=false` invocation
fn parse_rollout_status(
    command: String,
    output: &CommandOutput,
) -> Result<RolloutStatus, ClusterError> {
    let combined = format!("{}\n{}", output.stdout, output.stderr);

    if combined.contains("exceeded its progress deadline") {
        return Ok(RolloutStatus::Failed(output.tail(1)));
    }
    if !output.success() {
        return Err(KubectlClient::failure(command, output));
    }
    if output.stdout.contains("successfully rolled out") {
        return Ok(RolloutStatus::Complete);
    }
    Ok(RolloutStatus::Progressing(output.stdout.trim().to_string()))
}

/// Load balancer ingress first, cluster IP as fallback
fn parse_service_endpoint(json: &serde_json::Value) -> Option<ServiceEndpoint> {
    let port = json["spec"]["ports"][0]["port"].as_u64()?;
    let port = u16::try_from(port).ok()?;

    let ingress = &json["status"]["loadBalancer"]["ingress"][0];
    let host = ingress["ip"]
        .as_str()
        .or_else(|| ingress["hostname"].as_str())
        .or_else(|| json["spec"]["clusterIP"].as_str())
        .filter(|h| !h.is_empty() && *h != "None")?;

    Some(ServiceEndpoint {
        host: host.to_string(),
        port,
    })
}


#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Replies to kubectl invocations from a script
    struct ScriptedRunner {
        replies: Mutex<Vec<CommandOutput>>,
        seen: Mutex<Vec<String>>,
    }

    impl ScriptedRunner {
        fn new(replies: Vec<CommandOutput>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies),
                seen: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl CommandRunner for ScriptedRunner {
        async fn run(
            &self,
            spec: &CommandSpec,
            _cancel: &CancelSignal,
        ) -> Result<CommandOutput, CommandError> {
            self.seen.lock().unwrap().push(spec.display());
            Ok(self.replies.lock().unwrap().remove(0))
        }
    }

    fn reply(code: i32, stdout: &str, stderr: &str) -> CommandOutput {
        CommandOutput {
            exit_code: Some(code),
            stdout: stdout.to_string(),
            stderr: stderr.to_string(),
            ..CommandOutput::default()
        }
    }

    fn client(runner: Arc<ScriptedRunner>) -> KubectlClient {
        KubectlClient::new(runner, std::env::temp_dir(), CancelSignal::new())
    }

    #[tokio::test]
    async fn test_existing_namespace_is_ok() {
        let runner = ScriptedRunner::new(vec![reply(
            1,
            "",
            "Error from server (AlreadyExists): namespaces \"staging\" already exists",
        )]);
        client(runner.clone()).ensure_namespace("staging").await.unwrap();
        assert_eq!(runner.seen.lock().unwrap()[0], "kubectl create namespace staging");
    }

    #[tokio::test]
    async fn test_apply_failure_reports_stderr() {
        let runner = ScriptedRunner::new(vec![reply(1, "", "error: forbidden")]);
        let err = client(runner)
            .apply(Path::new("deployment.yaml"), "staging")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("forbidden"));
    }

    #[tokio::test]
    async fn test_rollout_status_parsing() {
        let runner = ScriptedRunner::new(vec![
            reply(
                0,
                "Waiting for deployment \"myapp-deployment\" rollout to finish: \
                 1 of 3 updated replicas are available...",
                "",
            ),
            reply(0, "deployment \"myapp-deployment\" successfully rolled out", ""),
            reply(
                1,
                "",
                "error: deployment \"myapp-deployment\" exceeded its progress deadline",
            ),
        ]);
        let client = client(runner.clone());

        assert!(matches!(
            client.rollout_status("myapp-deployment", "staging").await.unwrap(),
            RolloutStatus::Progressing(_)
        ));
        assert_eq!(
            client.rollout_status("myapp-deployment", "staging").await.unwrap(),
            RolloutStatus::Complete
        );
        assert!(matches!(
            client.rollout_status("myapp-deployment", "staging").await.unwrap(),
            RolloutStatus::Failed(_)
        ));
        assert_eq!(
            runner.seen.lock().unwrap()[0],
            "kubectl rollout status deployment/myapp-deployment -n staging --watch=false"
        );
    }

    #[test]
    fn test_service_endpoint_prefers_ingress() {
        let json = serde_json::json!({
            "spec": { "clusterIP": "10.0.0.5", "ports": [{ "port": 80 }] },
            "status": { "loadBalancer": { "ingress": [{ "ip": "203.0.113.7" }] } }
        });
        let endpoint = parse_service_endpoint(&json).unwrap();
        assert_eq!(endpoint.base_url(), "http://203.0.113.7:80");

        let json = serde_json::json!({
            "spec": { "clusterIP": "10.0.0.5", "ports": [{ "port": 8080 }] },
            "status": { "loadBalancer": {} }
        });
        assert_eq!(parse_service_endpoint(&json).unwrap().host, "10.0.0.5");
    }

    #[tokio::test]
    async fn test_dry_run_short_circuits_queries() {
        let runner = ScriptedRunner::new(vec![reply(0, "", "")]);
        let client = client(runner.clone()).dry_run(true);

        client.apply(Path::new("d.yaml"), "staging").await.unwrap();
        assert_eq!(
            client.rollout_status("myapp-deployment", "staging").await.unwrap(),
            RolloutStatus::Complete
        );
        assert!(runner.seen.lock().unwrap()[0].ends_with("--dry-run=client"));
        assert_eq!(runner.seen.lock().unwrap().len(), 1);
    }
}
