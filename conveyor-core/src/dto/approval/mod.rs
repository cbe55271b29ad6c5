//! Approval DTOs for the approval API

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// An approval currently waiting for a decision
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingApproval {
    pub target: String,
    pub message: String,
    pub requested_at: DateTime<Utc>,
}

/// Decision submitted by an external actor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitDecision {
    pub approved: bool,
    pub actor: String,
}
