//! Approval API endpoints

use crate::ConveyorClient;
use crate::error::Result;
use conveyor_core::domain::approval::ApprovalDecision;
use conveyor_core::dto::approval::{PendingApproval, SubmitDecision};

impl ConveyorClient {
    // =============================================================================
    // Approvals
    // =============================================================================

    /// List approvals currently waiting for a decision
    ///
    /// # Returns
    /// Pending approvals, one per gated target
    pub async fn list_pending_approvals(&self) -> Result<Vec<PendingApproval>> {
        let url = format!("{}/approvals", self.base_url);
        let response = self.client.get(&url).send().await?;

        self.handle_response(response).await
    }

    /// Submit a decision for a gated target
    ///
    /// # Arguments
    /// * `target` - Deployment target name (e.g., "production")
    /// * `approved` - `true` to approve, `false` to reject
    /// * `actor` - Identity recorded as the decider
    ///
    /// # Returns
    /// The resolved decision
    ///
    /// # Example
    /// ```no_run
    /// # use conveyor_client::ConveyorClient;
    /// # async fn example() -> conveyor_client::Result<()> {
    /// let client = ConveyorClient::new("http://127.0.0.1:8787");
    /// let decision = client.submit_decision("production", true, "alice").await?;
    /// assert!(decision.is_approved());
    /// # Ok(())
    /// # }
    /// ```
    pub async fn submit_decision(
        &self,
        target: &str,
        approved: bool,
        actor: &str,
    ) -> Result<ApprovalDecision> {
        let url = format!("{}/approvals/{}", self.base_url, target);
        let response = self
            .client
            .post(&url)
            .json(&SubmitDecision {
                approved,
                actor: actor.to_string(),
            })
            .send()
            .await?;

        self.handle_response(response).await
    }

    /// Check that the approval API is reachable
    pub async fn ping(&self) -> Result<()> {
        let url = format!("{}/health", self.base_url);
        let response = self.client.get(&url).send().await?;

        crate::handle_empty(response).await
    }
}
