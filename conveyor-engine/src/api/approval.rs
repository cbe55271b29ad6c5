//! Approval API Handlers

use axum::{
    Json,
    extract::{Path, State},
};
use conveyor_core::domain::approval::ApprovalDecision;
use conveyor_core::dto::approval::{PendingApproval, SubmitDecision};
use std::sync::Arc;

use crate::api::error::{ApiError, ApiResult};
use crate::service::ApprovalGate;

/// GET /approvals
/// List approvals waiting for a decision
pub async fn list_pending(State(gate): State<Arc<ApprovalGate>>) -> Json<Vec<PendingApproval>> {
    tracing::debug!("Listing pending approvals");
    Json(gate.pending())
}

/// POST /approvals/{target}
/// Approve or reject the pending deployment of a target
pub async fn submit_decision(
    State(gate): State<Arc<ApprovalGate>>,
    Path(target): Path<String>,
    Json(req): Json<SubmitDecision>,
) -> ApiResult<Json<ApprovalDecision>> {
    if req.actor.trim().is_empty() {
        return Err(ApiError::BadRequest("actor cannot be empty".to_string()));
    }

    tracing::info!(
        "Decision for {} from {}: {}",
        target,
        req.actor,
        if req.approved { "approved" } else { "rejected" }
    );

    let decision = gate.submit(&target, req.approved, &req.actor)?;
    Ok(Json(decision))
}
