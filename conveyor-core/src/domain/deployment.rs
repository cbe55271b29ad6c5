//! Deployment domain types
//!
//! A deployment moves one target environment from "manifest rendered" to
//! "serving and verified healthy". The allowed transitions are:
//!
//! ```text
//! Pending -> ManifestRendered -> Applying -> RollingOut -> Verifying -> Succeeded
//!    |              |               |            |             |
//!    +--------------+---------------+------------+-------------+--> Failed
//! ```
//!
//! `RolledBack` is terminal and only reachable once manifests were submitted;
//! the controller itself never reverts a deployment.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

use crate::domain::approval::ApprovalDecision;
use crate::error::{ErrorKind, Failure, TransitionError};

/// Default rollout budget (10 minutes)
pub const DEFAULT_ROLLOUT_TIMEOUT_SECS: u64 = 600;

fn default_rollout_timeout() -> u64 {
    DEFAULT_ROLLOUT_TIMEOUT_SECS
}

fn default_health_path() -> String {
    "/health".to_string()
}

fn default_attempts() -> u32 {
    5
}

fn default_initial_backoff() -> u64 {
    2
}

fn default_max_backoff() -> u64 {
    30
}

fn default_request_timeout() -> u64 {
    5
}

/// Post-deploy health check descriptor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthCheck {
    #[serde(default = "default_health_path")]
    pub path: String,

    /// Explicit base URL; when absent the service endpoint is discovered
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    #[serde(default = "default_attempts")]
    pub attempts: u32,

    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_secs: u64,

    #[serde(default = "default_max_backoff")]
    pub max_backoff_secs: u64,

    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

impl Default for HealthCheck {
    fn default() -> Self {
        Self {
            path: default_health_path(),
            url: None,
            attempts: default_attempts(),
            initial_backoff_secs: default_initial_backoff(),
            max_backoff_secs: default_max_backoff(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

impl HealthCheck {
    /// Delay before the given retry (1-based), doubling and capped
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        let secs = self
            .initial_backoff_secs
            .saturating_mul(1u64 << exponent)
            .min(self.max_backoff_secs);
        Duration::from_secs(secs)
    }

    /// Full URL probed for a discovered or configured base URL
    pub fn probe_url(&self, base: &str) -> String {
        let base = base.trim_end_matches('/');
        if self.path.starts_with('/') {
            format!("{}{}", base, self.path)
        } else {
            format!("{}/{}", base, self.path)
        }
    }
}

/// A target environment (e.g., staging, production)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentTarget {
    pub name: String,
    pub namespace: String,

    #[serde(default)]
    pub requires_approval: bool,

    #[serde(default = "default_rollout_timeout")]
    pub rollout_timeout_secs: u64,

    #[serde(default)]
    pub health_check: HealthCheck,
}

impl DeploymentTarget {
    pub fn rollout_timeout(&self) -> Duration {
        Duration::from_secs(self.rollout_timeout_secs)
    }
}

/// Deployment state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentState {
    Pending,
    ManifestRendered,
    Applying,
    RollingOut,
    Verifying,
    Succeeded,
    Failed,
    RolledBack,
}

impl DeploymentState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            DeploymentState::Succeeded | DeploymentState::Failed | DeploymentState::RolledBack
        )
    }

    /// Whether `next` directly follows `self` in the state graph
    pub fn can_transition_to(&self, next: DeploymentState) -> bool {
        use DeploymentState::*;

        match (self, next) {
            (Pending, ManifestRendered)
            | (ManifestRendered, Applying)
            | (Applying, RollingOut)
            | (RollingOut, Verifying)
            | (Verifying, Succeeded) => true,
            (Pending | ManifestRendered | Applying | RollingOut | Verifying, Failed) => true,
            (Applying | RollingOut | Verifying, RolledBack) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for DeploymentState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            DeploymentState::Pending => "Pending",
            DeploymentState::ManifestRendered => "ManifestRendered",
            DeploymentState::Applying => "Applying",
            DeploymentState::RollingOut => "RollingOut",
            DeploymentState::Verifying => "Verifying",
            DeploymentState::Succeeded => "Succeeded",
            DeploymentState::Failed => "Failed",
            DeploymentState::RolledBack => "RolledBack",
        };
        write!(f, "{}", name)
    }
}

/// One recorded state change
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateTransition {
    pub from: DeploymentState,
    pub to: DeploymentState,
    pub at: DateTime<Utc>,
}

/// Record of one deployment attempt
///
/// State only moves forward along the graph above and reaches a terminal
/// state at most once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeploymentRecord {
    id: Uuid,
    target: String,
    image: String,
    state: DeploymentState,
    started_at: DateTime<Utc>,
    finished_at: Option<DateTime<Utc>>,
    error: Option<Failure>,
    history: Vec<StateTransition>,
    approval: Option<ApprovalDecision>,
}

impl DeploymentRecord {
    pub fn new(target: &str, image: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            target: target.to_string(),
            image: image.to_string(),
            state: DeploymentState::Pending,
            started_at: Utc::now(),
            finished_at: None,
            error: None,
            history: Vec::new(),
            approval: None,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn image(&self) -> &str {
        &self.image
    }

    pub fn state(&self) -> DeploymentState {
        self.state
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn finished_at(&self) -> Option<DateTime<Utc>> {
        self.finished_at
    }

    pub fn error(&self) -> Option<&Failure> {
        self.error.as_ref()
    }

    pub fn history(&self) -> &[StateTransition] {
        &self.history
    }

    pub fn approval(&self) -> Option<&ApprovalDecision> {
        self.approval.as_ref()
    }

    pub fn is_succeeded(&self) -> bool {
        self.state == DeploymentState::Succeeded
    }

    /// Moves to the next state
    ///
    /// # Errors
    /// Returns an error if the current state is terminal or `next` is not a
    /// direct successor. `Failed` must go through [`DeploymentRecord::fail`].
    pub fn advance(&mut self, next: DeploymentState) -> Result<(), TransitionError> {
        if next == DeploymentState::Failed {
            return Err(TransitionError::Illegal {
                from: self.state,
                to: next,
            });
        }
        self.transition(next)
    }

    /// Moves to `Failed`, recording the cause
    pub fn fail(
        &mut self,
        kind: ErrorKind,
        message: impl Into<String>,
    ) -> Result<(), TransitionError> {
        self.transition(DeploymentState::Failed)?;
        self.error = Some(Failure::new(kind, message));
        Ok(())
    }

    /// Attaches the approval decision that gated this deployment
    pub fn record_approval(&mut self, decision: ApprovalDecision) {
        self.approval = Some(decision);
    }

    fn transition(&mut self, next: DeploymentState) -> Result<(), TransitionError> {
        if self.state.is_terminal() {
            return Err(TransitionError::FromTerminal {
                from: self.state,
                to: next,
            });
        }

        if !self.state.can_transition_to(next) {
            return Err(TransitionError::Illegal {
                from: self.state,
                to: next,
            });
        }

        let now = Utc::now();
        self.history.push(StateTransition {
            from: self.state,
            to: next,
            at: now,
        });
        self.state = next;

        if next.is_terminal() {
            self.finished_at = Some(now);
        }

        Ok(())
    }
}
