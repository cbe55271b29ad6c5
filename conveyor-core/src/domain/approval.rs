//! Approval domain types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::TransitionError;

/// State of an approval request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Rejected,
    TimedOut,
}

impl std::fmt::Display for ApprovalStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ApprovalStatus::Pending => write!(f, "pending"),
            ApprovalStatus::Approved => write!(f, "approved"),
            ApprovalStatus::Rejected => write!(f, "rejected"),
            ApprovalStatus::TimedOut => write!(f, "timed-out"),
        }
    }
}

/// Decision on a gated production change
///
/// Starts `Pending` and resolves exactly once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalDecision {
    message: String,
    status: ApprovalStatus,
    decided_by: Option<String>,
    decided_at: Option<DateTime<Utc>>,
}

impl ApprovalDecision {
    pub fn pending(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            status: ApprovalStatus::Pending,
            decided_by: None,
            decided_at: None,
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn status(&self) -> ApprovalStatus {
        self.status
    }

    pub fn decided_by(&self) -> Option<&str> {
        self.decided_by.as_deref()
    }

    pub fn decided_at(&self) -> Option<DateTime<Utc>> {
        self.decided_at
    }

    pub fn is_approved(&self) -> bool {
        self.status == ApprovalStatus::Approved
    }

    /// Resolves a pending decision
    ///
    /// # Arguments
    /// * `status` - Final status; `Pending` is rejected
    /// * `actor` - Identity of the approver (`None` for timeouts)
    pub fn resolve(
        &mut self,
        status: ApprovalStatus,
        actor: Option<String>,
    ) -> Result<(), TransitionError> {
        if self.status != ApprovalStatus::Pending || status == ApprovalStatus::Pending {
            return Err(TransitionError::AlreadyResolved);
        }

        self.status = status;
        self.decided_by = actor;
        self.decided_at = Some(Utc::now());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_once() {
        let mut decision = ApprovalDecision::pending("Deploy abc1234 to production?");
        decision
            .resolve(ApprovalStatus::Approved, Some("alice".to_string()))
            .unwrap();

        assert!(decision.is_approved());
        assert_eq!(decision.decided_by(), Some("alice"));
        assert!(decision.decided_at().is_some());

        let again = decision.resolve(ApprovalStatus::Rejected, Some("bob".to_string()));
        assert_eq!(again, Err(TransitionError::AlreadyResolved));
        assert_eq!(decision.status(), ApprovalStatus::Approved);
    }

    #[test]
    fn test_cannot_resolve_to_pending() {
        let mut decision = ApprovalDecision::pending("m");
        assert!(decision.resolve(ApprovalStatus::Pending, None).is_err());
    }

    #[test]
    fn test_status_display() {
        assert_eq!(ApprovalStatus::TimedOut.to_string(), "timed-out");
    }
}
