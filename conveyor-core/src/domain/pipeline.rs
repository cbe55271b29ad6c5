//! Pipeline domain types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::domain::stage::{HookRecord, PostHook, StageOutcome, StageResult};
use crate::error::Failure;

/// Pipeline definition
///
/// Stage order is fixed here and never changes at runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineDefinition {
    pub name: String,
    pub stages: Vec<crate::domain::stage::Stage>,
    /// Pipeline-level post hooks (cleanup, notification)
    #[serde(default)]
    pub hooks: Vec<PostHook>,
}

impl PipelineDefinition {
    /// Checks structural rules (stages present, unique names, non-zero budgets)
    pub fn validate(&self) -> Result<(), String> {
        if self.stages.is_empty() {
            return Err(format!("pipeline '{}' has no stages", self.name));
        }

        let mut seen = HashSet::new();
        for stage in &self.stages {
            if stage.name.trim().is_empty() {
                return Err("stage name cannot be empty".to_string());
            }
            if !seen.insert(stage.name.as_str()) {
                return Err(format!("duplicate stage name '{}'", stage.name));
            }
            if stage.timeout_secs == 0 {
                return Err(format!("stage '{}' has a zero timeout", stage.name));
            }
            if stage
                .hooks
                .iter()
                .any(|h| h.action == crate::domain::stage::HookAction::Cleanup)
            {
                return Err(format!(
                    "stage '{}': cleanup is only allowed as a pipeline hook",
                    stage.name
                ));
            }
        }

        Ok(())
    }
}

/// Overall pipeline outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineOutcome {
    Success,
    Failure,
}

/// Append-only log of stage results in execution order
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResultLog {
    results: Vec<StageResult>,
}

impl ResultLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, result: StageResult) {
        self.results.push(result);
    }

    pub fn iter(&self) -> impl Iterator<Item = &StageResult> {
        self.results.iter()
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    pub fn get(&self, stage: &str) -> Option<&StageResult> {
        self.results.iter().find(|r| r.stage == stage)
    }
}

/// Result of a whole pipeline run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineResult {
    pub pipeline: String,
    pub build_id: String,
    pub outcome: PipelineOutcome,
    pub stage_results: ResultLog,
    pub hooks: Vec<HookRecord>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// The run was interrupted by a cancellation request or its time budget
    pub cancelled: bool,
}

impl PipelineResult {
    /// First failed stage that halted the pipeline, if any
    pub fn first_failure(&self) -> Option<&Failure> {
        self.stage_results
            .iter()
            .filter(|r| r.outcome == StageOutcome::Failed)
            .find_map(|r| r.failure.as_ref())
    }

    pub fn is_success(&self) -> bool {
        self.outcome == PipelineOutcome::Success
    }

    pub fn elapsed_ms(&self) -> u64 {
        (self.finished_at - self.started_at)
            .num_milliseconds()
            .max(0) as u64
    }
}
