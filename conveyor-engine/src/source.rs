//! Source resolution
//!
//! Determines the revision, branch and build number of a run. CI variables
//! are used when present, explicit overrides always win, and gaps are
//! filled by asking git in the project directory.

use chrono::Utc;
use conveyor_core::domain::context::{DetectedSource, SourceInfo, short_revision};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::cancel::CancelSignal;
use crate::command::{CommandRunner, CommandSpec};

const GIT_TIMEOUT: Duration = Duration::from_secs(30);

/// Values given on the command line
#[derive(Debug, Clone, Default)]
pub struct SourceOverrides {
    pub revision: Option<String>,
    pub branch: Option<String>,
    pub build_number: Option<u64>,
}

/// Resolves the source identity of a run
///
/// # Arguments
/// * `detected` - Values read from CI environment variables
/// * `overrides` - Command line values, taking precedence over everything
/// * `runner` - Runner used for git queries
/// * `project_dir` - Repository checkout
pub async fn resolve_source(
    detected: DetectedSource,
    overrides: SourceOverrides,
    runner: &dyn CommandRunner,
    project_dir: &Path,
) -> SourceInfo {
    let revision = match overrides.revision.or(detected.revision) {
        Some(revision) => revision,
        None => match git(runner, project_dir, &["rev-parse", "--short", "HEAD"]).await {
            Some(revision) => short_revision(&revision),
            None => {
                let fallback = Utc::now().format("%Y%m%d%H%M%S").to_string();
                warn!("Could not determine git revision, using {}", fallback);
                fallback
            }
        },
    };

    let branch = match overrides.branch.or(detected.branch) {
        Some(branch) => branch,
        None => git(runner, project_dir, &["rev-parse", "--abbrev-ref", "HEAD"])
            .await
            .unwrap_or_else(|| {
                warn!("Could not determine git branch");
                "unknown".to_string()
            }),
    };

    let build_number = overrides.build_number.or(detected.build_number).unwrap_or(0);

    info!(
        "Source resolved on {}: revision {}, branch {}, build {}",
        detected.platform, revision, branch, build_number
    );

    SourceInfo {
        platform: detected.platform,
        revision,
        branch,
        build_number,
    }
}

/// Runs a git query, returning trimmed stdout on success
async fn git(runner: &dyn CommandRunner, dir: &Path, args: &[&str]) -> Option<String> {
    let spec = CommandSpec::new("git", args.iter().copied(), dir).timeout(GIT_TIMEOUT);
    match runner.run(&spec, &CancelSignal::new()).await {
        Ok(output) if output.success() => {
            let value = output.stdout.trim().to_string();
            (!value.is_empty()).then_some(value)
        }
        Ok(output) => {
            debug!("git {} failed: {}", args.join(" "), output.tail(3));
            None
        }
        Err(e) => {
            debug!("git {} could not run: {}", args.join(" "), e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{CommandError, CommandOutput};
    use async_trait::async_trait;
    use conveyor_core::domain::context::CiPlatform;
    use std::sync::Mutex;

    struct GitStub {
        replies: Mutex<Vec<Result<CommandOutput, CommandError>>>,
        calls: Mutex<Vec<String>>,
    }

    impl GitStub {
        fn new(replies: Vec<Result<CommandOutput, CommandError>>) -> Self {
            Self {
                replies: Mutex::new(replies),
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl CommandRunner for GitStub {
        async fn run(
            &self,
            spec: &CommandSpec,
            _cancel: &CancelSignal,
        ) -> Result<CommandOutput, CommandError> {
            self.calls.lock().unwrap().push(spec.display());
            self.replies.lock().unwrap().remove(0)
        }
    }

    fn stdout(text: &str) -> Result<CommandOutput, CommandError> {
        Ok(CommandOutput {
            exit_code: Some(0),
            stdout: text.to_string(),
            ..CommandOutput::default()
        })
    }

    fn local() -> DetectedSource {
        DetectedSource {
            platform: CiPlatform::Local,
            revision: None,
            branch: None,
            build_number: None,
        }
    }

    #[tokio::test]
    async fn test_local_source_asks_git() {
        let runner = GitStub::new(vec![stdout("1a2b3c4d\n"), stdout("develop\n")]);
        let overrides = SourceOverrides::default();
        let source = resolve_source(local(), overrides, &runner, Path::new(".")).await;

        assert_eq!(source.revision, "1a2b3c4");
        assert_eq!(source.branch, "develop");
        assert_eq!(source.build_number, 0);
        assert_eq!(
            *runner.calls.lock().unwrap(),
            vec!["git rev-parse --short HEAD", "git rev-parse --abbrev-ref HEAD"]
        );
    }

    #[tokio::test]
    async fn test_overrides_skip_git() {
        let runner = GitStub::new(vec![]);
        let overrides = SourceOverrides {
            revision: Some("fff0000".to_string()),
            branch: Some("main".to_string()),
            build_number: Some(9),
        };
        let source = resolve_source(local(), overrides, &runner, Path::new(".")).await;

        assert_eq!(source.revision, "fff0000");
        assert_eq!(source.branch, "main");
        assert_eq!(source.build_number, 9);
        assert!(runner.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_git_failure_falls_back() {
        let runner = GitStub::new(vec![
            Err(CommandError::NotFound("git".to_string())),
            Ok(CommandOutput {
                exit_code: Some(128),
                stderr: "fatal: not a git repository".to_string(),
                ..CommandOutput::default()
            }),
        ]);
        let overrides = SourceOverrides::default();
        let source = resolve_source(local(), overrides, &runner, Path::new(".")).await;

        assert_eq!(source.revision.len(), 14);
        assert!(source.revision.chars().all(|c| c.is_ascii_digit()));
        assert_eq!(source.branch, "unknown");
    }

    #[tokio::test]
    async fn test_ci_values_used_before_git() {
        let detected = DetectedSource {
            platform: CiPlatform::GitlabCi,
            revision: Some("abc1234".to_string()),
            branch: Some("feature/x".to_string()),
            build_number: Some(5),
        };
        let runner = GitStub::new(vec![]);
        let overrides = SourceOverrides::default();
        let source = resolve_source(detected, overrides, &runner, Path::new(".")).await;

        assert_eq!(source.platform, CiPlatform::GitlabCi);
        assert_eq!(source.branch, "feature/x");
        assert_eq!(source.build_number, 5);
    }
}
