//! Report DTOs
//!
//! Serialized summaries stored as artifacts after a run and printed by the CLI.

use serde::{Deserialize, Serialize};

use crate::domain::deployment::DeploymentRecord;
use crate::domain::log::LogEntry;
use crate::domain::pipeline::PipelineResult;
use crate::error::exit_code;

/// Everything recorded about one run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineReport {
    pub result: PipelineResult,
    pub deployments: Vec<DeploymentRecord>,
    pub logs: Vec<LogEntry>,
}

impl PipelineReport {
    /// Exit code derived from the first fatal cause
    pub fn exit_code(&self) -> i32 {
        if self.result.is_success() {
            return exit_code::SUCCESS;
        }
        match self.result.first_failure() {
            Some(failure) => failure.kind.exit_code(),
            None if self.result.cancelled => exit_code::CANCELLED,
            None => exit_code::STAGE_FAILURE,
        }
    }
}
