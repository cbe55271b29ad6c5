//! Run context
//!
//! Contains all state needed while one pipeline run or deployment executes:
//! - The immutable build context (revision, branch, image reference)
//! - The loaded build configuration
//! - A private workspace under the workspace base, removed exactly once
//! - The run log buffer and the deployment records produced so far
//! - The cancellation signal shared by everything the run starts

use conveyor_core::BuildConfig;
use conveyor_core::domain::context::BuildContext;
use conveyor_core::domain::deployment::DeploymentRecord;
use conveyor_core::domain::log::{LogEntry, LogLevel};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use uuid::Uuid;

use crate::cancel::CancelSignal;
use crate::service::{InMemoryLogBuffer, LogBufferService};

/// Execution context shared by every stage of a run
pub struct RunContext {
    run_id: Uuid,
    build: Arc<BuildContext>,
    config: Arc<BuildConfig>,
    project_dir: PathBuf,
    workspace: PathBuf,
    log: Arc<dyn LogBufferService>,
    deployments: Mutex<Vec<DeploymentRecord>>,
    cancel: CancelSignal,
    torn_down: AtomicBool,
}

impl RunContext {
    /// Creates a run context and its workspace directory
    ///
    /// # Arguments
    /// * `build` - Build context, fixed for the whole run
    /// * `config` - Loaded build configuration
    /// * `project_dir` - Checked-out source tree commands run in
    /// * `workspace_base` - Base directory for run workspaces (e.g., /tmp/conveyor)
    /// * `cancel` - Signal shared with the caller
    pub fn new(
        build: BuildContext,
        config: BuildConfig,
        project_dir: PathBuf,
        workspace_base: &Path,
        cancel: CancelSignal,
    ) -> anyhow::Result<Arc<Self>> {
        use anyhow::Context as _;

        let run_id = Uuid::new_v4();
        let workspace = workspace_base.join(run_id.to_string());
        std::fs::create_dir_all(&workspace).with_context(|| {
            format!("Failed to create workspace directory {}", workspace.display())
        })?;

        Ok(Arc::new(Self {
            run_id,
            build: Arc::new(build),
            config: Arc::new(config),
            project_dir,
            workspace,
            log: Arc::new(InMemoryLogBuffer::new()),
            deployments: Mutex::new(Vec::new()),
            cancel,
            torn_down: AtomicBool::new(false),
        }))
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn build(&self) -> &BuildContext {
        &self.build
    }

    pub fn config(&self) -> &BuildConfig {
        &self.config
    }

    pub fn project_dir(&self) -> &Path {
        &self.project_dir
    }

    pub fn workspace(&self) -> &Path {
        &self.workspace
    }

    pub fn cancel(&self) -> &CancelSignal {
        &self.cancel
    }

    /// Environment exported to every command of the run
    ///
    /// Configured variables come first so build variables cannot be shadowed.
    pub fn command_env(&self) -> Vec<(String, String)> {
        let mut env: Vec<(String, String)> = self
            .config
            .env
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        env.extend(self.build.env_vars());
        env.push((
            "CONVEYOR_WORKSPACE".to_string(),
            self.workspace.to_string_lossy().into_owned(),
        ));
        env
    }

    // =============================================================================
    // Logging
    // =============================================================================

    pub fn log(&self, level: LogLevel, source: &str, message: impl Into<String>) {
        self.log.add_entry(LogEntry::new(level, source, message));
    }

    pub fn log_debug(&self, source: &str, message: impl Into<String>) {
        self.log(LogLevel::Debug, source, message);
    }

    pub fn log_info(&self, source: &str, message: impl Into<String>) {
        self.log(LogLevel::Info, source, message);
    }

    pub fn log_warning(&self, source: &str, message: impl Into<String>) {
        self.log(LogLevel::Warning, source, message);
    }

    pub fn log_error(&self, source: &str, message: impl Into<String>) {
        self.log(LogLevel::Error, source, message);
    }

    pub fn logs(&self) -> Vec<LogEntry> {
        self.log.snapshot()
    }

    // =============================================================================
    // Deployments
    // =============================================================================

    pub fn record_deployment(&self, record: DeploymentRecord) {
        self.deployments
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(record);
    }

    pub fn deployments(&self) -> Vec<DeploymentRecord> {
        self.deployments
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    // =============================================================================
    // Teardown
    // =============================================================================

    /// Removes the workspace
    ///
    /// Only the first call does anything; it returns `Ok(true)` when it
    /// performed the teardown and `Ok(false)` afterwards.
    pub fn teardown(&self) -> std::io::Result<bool> {
        if self.torn_down.swap(true, Ordering::SeqCst) {
            return Ok(false);
        }

        match std::fs::remove_dir_all(&self.workspace) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }
        self.log_info("cleanup", format!("Removed workspace {}", self.workspace.display()));
        Ok(true)
    }

    pub fn is_torn_down(&self) -> bool {
        self.torn_down.load(Ordering::SeqCst)
    }
}
