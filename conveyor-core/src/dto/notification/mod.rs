//! Notification DTOs

use serde::{Deserialize, Serialize};

use crate::domain::pipeline::PipelineOutcome;

/// Payload sent to the notification webhook
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub pipeline: String,
    pub build_id: String,
    pub outcome: PipelineOutcome,
    pub message: String,
}
