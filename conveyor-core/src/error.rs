//! Error taxonomy shared by every Conveyor crate
//!
//! `ErrorKind` classifies the first fatal cause of a failed stage or
//! deployment and decides the process exit code.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

use crate::domain::deployment::DeploymentState;

/// Process exit codes of the `conveyor` binary
pub mod exit_code {
    pub const SUCCESS: i32 = 0;
    pub const CONFIGURATION: i32 = 2;
    pub const STAGE_FAILURE: i32 = 3;
    pub const APPROVAL: i32 = 4;
    pub const DEPLOYMENT: i32 = 5;
    pub const CANCELLED: i32 = 130;
}

/// Classification of a fatal failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Configuration,
    StageStepFailure,
    StageTimeout,
    ApprovalRejected,
    ApprovalTimedOut,
    ManifestRender,
    ClusterApply,
    RolloutTimeout,
    RolloutFailed,
    HealthCheckFailure,
    Cancelled,
}

impl ErrorKind {
    /// Exit code reported when this kind is the first fatal cause
    pub fn exit_code(&self) -> i32 {
        match self {
            ErrorKind::Configuration => exit_code::CONFIGURATION,
            ErrorKind::StageStepFailure | ErrorKind::StageTimeout => exit_code::STAGE_FAILURE,
            ErrorKind::ApprovalRejected | ErrorKind::ApprovalTimedOut => exit_code::APPROVAL,
            ErrorKind::ManifestRender
            | ErrorKind::ClusterApply
            | ErrorKind::RolloutTimeout
            | ErrorKind::RolloutFailed
            | ErrorKind::HealthCheckFailure => exit_code::DEPLOYMENT,
            ErrorKind::Cancelled => exit_code::CANCELLED,
        }
    }

    /// Whether the failure belongs to a deployment rather than a plain stage
    pub fn is_deployment(&self) -> bool {
        matches!(
            self,
            ErrorKind::ApprovalRejected
                | ErrorKind::ApprovalTimedOut
                | ErrorKind::ManifestRender
                | ErrorKind::ClusterApply
                | ErrorKind::RolloutTimeout
                | ErrorKind::RolloutFailed
                | ErrorKind::HealthCheckFailure
        )
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::Configuration => "ConfigurationError",
            ErrorKind::StageStepFailure => "StageStepFailure",
            ErrorKind::StageTimeout => "StageTimeout",
            ErrorKind::ApprovalRejected => "ApprovalRejected",
            ErrorKind::ApprovalTimedOut => "ApprovalTimedOut",
            ErrorKind::ManifestRender => "ManifestRenderError",
            ErrorKind::ClusterApply => "ClusterApplyError",
            ErrorKind::RolloutTimeout => "RolloutTimeout",
            ErrorKind::RolloutFailed => "RolloutFailed",
            ErrorKind::HealthCheckFailure => "HealthCheckFailure",
            ErrorKind::Cancelled => "Cancelled",
        };
        write!(f, "{}", name)
    }
}

/// A classified failure with a human readable explanation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Failure {
    pub kind: ErrorKind,
    pub message: String,
}

impl Failure {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

/// Errors raised while loading or validating the build configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Unknown deployment target '{0}'")]
    UnknownTarget(String),
}

impl ConfigError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::Configuration
    }
}

/// Rejected state machine transitions
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
    #[error("Deployment already reached terminal state {from:?}; cannot move to {to:?}")]
    FromTerminal {
        from: DeploymentState,
        to: DeploymentState,
    },

    #[error("Illegal deployment transition {from:?} -> {to:?}")]
    Illegal {
        from: DeploymentState,
        to: DeploymentState,
    },

    #[error("Approval decision already resolved")]
    AlreadyResolved,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes_are_distinct_per_category() {
        assert_eq!(ErrorKind::Configuration.exit_code(), 2);
        assert_eq!(ErrorKind::StageTimeout.exit_code(), 3);
        assert_eq!(ErrorKind::StageStepFailure.exit_code(), 3);
        assert_eq!(ErrorKind::ApprovalRejected.exit_code(), 4);
        assert_eq!(ErrorKind::ApprovalTimedOut.exit_code(), 4);
        assert_eq!(ErrorKind::RolloutTimeout.exit_code(), 5);
        assert_eq!(ErrorKind::HealthCheckFailure.exit_code(), 5);
        assert_eq!(ErrorKind::Cancelled.exit_code(), 130);
    }

    #[test]
    fn test_failure_display() {
        let failure = Failure::new(ErrorKind::ClusterApply, "forbidden");
        assert_eq!(failure.to_string(), "ClusterApplyError: forbidden");
    }

    #[test]
    fn test_kind_serializes_snake_case() {
        let json = serde_json::to_string(&ErrorKind::RolloutTimeout).unwrap();
        assert_eq!(json, "\"rollout_timeout\"");
    }
}
