//! External command execution
//!
//! Every external tool the engine drives (shell steps, git, docker, kubectl)
//! goes through a [`CommandRunner`]. The process runner captures stdout and
//! stderr and enforces a timeout. Each child leads its own process group,
//! and the whole group is killed on timeout or cancellation.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use thiserror::Error;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, Command};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::cancel::CancelSignal;

/// How long to wait for output pipes to drain after killing a child
const DRAIN_GRACE: Duration = Duration::from_secs(2);

/// Errors that prevent a command from being started at all
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("Executable not found: {0}")]
    NotFound(String),

    #[error("Working directory does not exist: {}", .0.display())]
    WorkingDirMissing(PathBuf),

    #[error("Failed to run {program}: {source}")]
    Io {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

/// A command to execute
#[derive(Debug, Clone)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub working_dir: PathBuf,
    pub env: Vec<(String, String)>,
    pub timeout: Duration,
}

impl CommandSpec {
    pub fn new<I, S>(program: impl Into<String>, args: I, working_dir: impl Into<PathBuf>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
            working_dir: working_dir.into(),
            env: Vec::new(),
            timeout: Duration::from_secs(300),
        }
    }

    /// Runs a command line through `sh -c`
    pub fn shell(line: &str, working_dir: impl Into<PathBuf>) -> Self {
        Self::new("sh", ["-c", line], working_dir)
    }

    pub fn env(mut self, vars: impl IntoIterator<Item = (String, String)>) -> Self {
        self.env.extend(vars);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Command line as shown in logs
    pub fn display(&self) -> String {
        if self.program == "sh" && self.args.len() == 2 && self.args[0] == "-c" {
            return self.args[1].clone();
        }
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Captured result of a finished, timed out or cancelled command
#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    /// `None` when the process was killed or terminated by a signal
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub elapsed: Duration,
    pub timed_out: bool,
    pub cancelled: bool,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        !self.timed_out && !self.cancelled && self.exit_code == Some(0)
    }

    /// Last `lines` lines of stderr, falling back to stdout
    pub fn tail(&self, lines: usize) -> String {
        let source = if self.stderr.trim().is_empty() {
            &self.stdout
        } else {
            &self.stderr
        };
        let all: Vec<&str> = source.trim_end().lines().collect();
        let start = all.len().saturating_sub(lines);
        all[start..].join("\n")
    }
}

/// Executes external commands
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Runs a command to completion, timeout or cancellation
    ///
    /// A non-zero exit is not an error; it is reported in the output.
    async fn run(&self, spec: &CommandSpec, cancel: &CancelSignal)
    -> Result<CommandOutput, CommandError>;
}

/// Runs commands as child processes of the engine
#[derive(Debug, Clone, Default)]
pub struct ProcessRunner;

impl ProcessRunner {
    pub fn new() -> Self {
        Self
    }
}

enum Completion {
    Exited(std::io::Result<std::process::ExitStatus>),
    TimedOut,
    Cancelled,
}

#[async_trait]
impl CommandRunner for ProcessRunner {
    async fn run(
        &self,
        spec: &CommandSpec,
        cancel: &CancelSignal,
    ) -> Result<CommandOutput, CommandError> {
        if !spec.working_dir.is_dir() {
            return Err(CommandError::WorkingDirMissing(spec.working_dir.clone()));
        }

        debug!("Running '{}' in {}", spec.display(), spec.working_dir.display());

        let start = Instant::now();
        let mut command = Command::new(&spec.program);
        command
            .args(&spec.args)
            .current_dir(&spec.working_dir)
            .envs(spec.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        command.process_group(0);

        let mut child = command
            .spawn()
            .map_err(|source| match source.kind() {
                std::io::ErrorKind::NotFound => CommandError::NotFound(spec.program.clone()),
                _ => CommandError::Io {
                    program: spec.program.clone(),
                    source,
                },
            })?;

        let stdout_task = tokio::spawn(read_pipe(child.stdout.take()));
        let stderr_task = tokio::spawn(read_pipe(child.stderr.take()));

        let completion = tokio::select! {
            status = child.wait() => Completion::Exited(status),
            _ = tokio::time::sleep(spec.timeout) => Completion::TimedOut,
            _ = cancel.cancelled() => Completion::Cancelled,
        };

        let mut output = CommandOutput::default();
        match completion {
            Completion::Exited(status) => {
                let status = status.map_err(|source| CommandError::Io {
                    program: spec.program.clone(),
                    source,
                })?;
                output.exit_code = status.code();
            }
            Completion::TimedOut => {
                warn!(
                    "'{}' exceeded its {}s timeout, killing",
                    spec.display(),
                    spec.timeout.as_secs()
                );
                terminate(&mut child).await;
                output.timed_out = true;
            }
            Completion::Cancelled => {
                info!("Cancelling '{}'", spec.display());
                terminate(&mut child).await;
                output.cancelled = true;
            }
        }

        // Grandchildren may keep the pipes open after a kill
        output.stdout = collect(stdout_task).await;
        output.stderr = collect(stderr_task).await;
        output.elapsed = start.elapsed();

        debug!(
            "'{}' finished with {:?} after {}ms",
            spec.display(),
            output.exit_code,
            output.elapsed.as_millis()
        );

        Ok(output)
    }
}

/// Kills the child's process group, then the child itself
async fn terminate(child: &mut Child) {
    #[cfg(unix)]
    if let Some(pgid) = child.id().and_then(|id| libc::pid_t::try_from(id).ok()) {
        // SAFETY: killpg has no memory-safety preconditions
        unsafe {
            libc::killpg(pgid, libc::SIGKILL);
        }
    }
    let _ = child.kill().await;
}

async fn read_pipe<R>(pipe: Option<R>) -> String
where
    R: tokio::io::AsyncRead + Unpin,
{
    let Some(mut pipe) = pipe else {
        return String::new();
    };
    let mut buf = Vec::new();
    let _ = pipe.read_to_end(&mut buf).await;
    String::from_utf8_lossy(&buf).into_owned()
}

async fn collect(task: tokio::task::JoinHandle<String>) -> String {
    let abort = task.abort_handle();
    match tokio::time::timeout(DRAIN_GRACE, task).await {
        Ok(Ok(text)) => text,
        Ok(Err(_)) => String::new(),
        Err(_) => {
            abort.abort();
            String::new()
        }
    }
}

/// Logs commands instead of executing them
///
/// Every command "succeeds" with empty output.
#[derive(Debug, Clone, Default)]
pub struct DryRunRunner;

#[async_trait]
impl CommandRunner for DryRunRunner {
    async fn run(
        &self,
        spec: &CommandSpec,
        _cancel: &CancelSignal,
    ) -> Result<CommandOutput, CommandError> {
        info!("[dry-run] {} (in {})", spec.display(), spec.working_dir.display());
        Ok(CommandOutput {
            exit_code: Some(0),
            ..CommandOutput::default()
        })
    }
}

/// Resolves a possibly relative path against a base directory
pub fn resolve_path(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancel::CancelReason;

    fn tmp() -> PathBuf {
        std::env::temp_dir()
    }

    #[tokio::test]
    async fn test_captures_output_and_exit_code() {
        let spec = CommandSpec::shell("echo out; echo err >&2; exit 3", tmp());
        let output = ProcessRunner::new()
            .run(&spec, &CancelSignal::new())
            .await
            .unwrap();

        assert_eq!(output.exit_code, Some(3));
        assert_eq!(output.stdout.trim(), "out");
        assert_eq!(output.stderr.trim(), "err");
        assert!(!output.success());
        assert_eq!(output.tail(5), "err");
    }

    #[tokio::test]
    async fn test_passes_environment() {
        let spec = CommandSpec::shell("printf %s \"$CONVEYOR_REVISION\"", tmp())
            .env([("CONVEYOR_REVISION".to_string(), "abc1234".to_string())]);
        let output = ProcessRunner::new()
            .run(&spec, &CancelSignal::new())
            .await
            .unwrap();

        assert!(output.success());
        assert_eq!(output.stdout, "abc1234");
    }

    #[tokio::test]
    async fn test_timeout_kills_process() {
        let spec = CommandSpec::shell("exec sleep 30", tmp()).timeout(Duration::from_millis(200));
        let output = ProcessRunner::new()
            .run(&spec, &CancelSignal::new())
            .await
            .unwrap();

        assert!(output.timed_out);
        assert!(!output.success());
        assert!(output.elapsed < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_cancellation_kills_process() {
        let cancel = CancelSignal::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            trigger.cancel(CancelReason::Requested);
        });

        let spec = CommandSpec::shell("exec sleep 30", tmp());
        let output = ProcessRunner::new().run(&spec, &cancel).await.unwrap();

        assert!(output.cancelled);
        assert_eq!(output.exit_code, None);
    }

    /// Whether `pid` names a live, non-zombie process
    #[cfg(target_os = "linux")]
    fn alive(pid: &str) -> bool {
        std::fs::read_to_string(format!("/proc/{}/stat", pid))
            .map(|stat| {
                let state = stat.rsplit(')').next().unwrap_or_default().trim_start();
                !state.starts_with('Z')
            })
            .unwrap_or(false)
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_timeout_kills_whole_process_group() {
        let dir = tempfile::tempdir().unwrap();
        let spec = CommandSpec::shell("sleep 30 & echo $! > sleeper.pid; wait; true", dir.path())
            .timeout(Duration::from_millis(500));
        let output = ProcessRunner::new()
            .run(&spec, &CancelSignal::new())
            .await
            .unwrap();
        assert!(output.timed_out);

        let pid = std::fs::read_to_string(dir.path().join("sleeper.pid")).unwrap();
        let pid = pid.trim();
        for _ in 0..50 {
            if !alive(pid) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("background process {} outlived its timed out shell", pid);
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_cancellation_kills_compound_command() {
        let dir = tempfile::tempdir().unwrap();
        let cancel = CancelSignal::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(300)).await;
            trigger.cancel(CancelReason::Requested);
        });

        let spec = CommandSpec::shell("sleep 30 & echo $! > sleeper.pid; wait", dir.path());
        let output = ProcessRunner::new().run(&spec, &cancel).await.unwrap();
        assert!(output.cancelled);

        let pid = std::fs::read_to_string(dir.path().join("sleeper.pid")).unwrap();
        let pid = pid.trim();
        for _ in 0..50 {
            if !alive(pid) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("background process {} outlived its cancelled shell", pid);
    }

    #[tokio::test]
    async fn test_missing_executable() {
        let spec = CommandSpec::new("conveyor-definitely-missing", Vec::<String>::new(), tmp());
        let err = ProcessRunner::new()
            .run(&spec, &CancelSignal::new())
            .await
            .unwrap_err();
        assert!(matches!(err, CommandError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_missing_working_dir() {
        let spec = CommandSpec::shell("true", "/nonexistent/conveyor/dir");
        let err = ProcessRunner::new()
            .run(&spec, &CancelSignal::new())
            .await
            .unwrap_err();
        assert!(matches!(err, CommandError::WorkingDirMissing(_)));
    }

    #[tokio::test]
    async fn test_dry_run_never_executes() {
        let spec = CommandSpec::shell("exit 1", "/nonexistent/conveyor/dir");
        let output = DryRunRunner.run(&spec, &CancelSignal::new()).await.unwrap();
        assert!(output.success());
    }

    #[test]
    fn test_display() {
        assert_eq!(CommandSpec::shell("npm test", tmp()).display(), "npm test");
        assert_eq!(
            CommandSpec::new("kubectl", ["apply", "-f", "x.yaml"], tmp()).display(),
            "kubectl apply -f x.yaml"
        );
    }
}
