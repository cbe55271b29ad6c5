//! Approval gate
//!
//! Suspends a deployment until an external actor approves or rejects it, or
//! until the wait times out. Decisions arrive through [`ApprovalGate::submit`],
//! which the approval API calls. At most one wait per target can be pending.

use chrono::{DateTime, Utc};
use conveyor_core::domain::approval::{ApprovalDecision, ApprovalStatus};
use conveyor_core::dto::approval::PendingApproval;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::oneshot;
use tracing::{info, warn};

use crate::cancel::CancelSignal;

/// Actor recorded for decisions made by `--auto-approve`
pub const AUTO_APPROVE_ACTOR: &str = "cli";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApprovalError {
    #[error("An approval for '{0}' is already pending")]
    AlreadyPending(String),

    #[error("No approval is pending for '{0}'")]
    NotPending(String),

    #[error("Approval wait for '{0}' was cancelled")]
    Cancelled(String),
}

struct Waiter {
    id: u64,
    message: String,
    requested_at: DateTime<Utc>,
    sender: oneshot::Sender<ApprovalDecision>,
}

/// Gate holding every pending approval
pub struct ApprovalGate {
    auto_approve: bool,
    pending: Mutex<HashMap<String, Waiter>>,
    next_id: AtomicU64,
}

/// Removes its registration when the waiting future completes or is dropped
struct Registration<'a> {
    gate: &'a ApprovalGate,
    target: String,
    id: u64,
}

impl Drop for Registration<'_> {
    fn drop(&mut self) {
        let mut pending = self.gate.lock();
        if pending.get(&self.target).is_some_and(|w| w.id == self.id) {
            pending.remove(&self.target);
        }
    }
}

impl ApprovalGate {
    /// Creates a gate
    ///
    /// # Arguments
    /// * `auto_approve` - Approve every request immediately as [`AUTO_APPROVE_ACTOR`]
    pub fn new(auto_approve: bool) -> Self {
        Self {
            auto_approve,
            pending: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Waiter>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Waits for a decision on `target`
    ///
    /// # Arguments
    /// * `target` - Deployment target the approval is for
    /// * `message` - Prompt shown to approvers
    /// * `timeout` - How long to wait before resolving as timed out
    /// * `cancel` - Run cancellation signal
    ///
    /// # Returns
    /// A resolved decision (approved, rejected or timed out)
    pub async fn await_decision(
        &self,
        target: &str,
        message: &str,
        timeout: Duration,
        cancel: &CancelSignal,
    ) -> Result<ApprovalDecision, ApprovalError> {
        let mut decision = ApprovalDecision::pending(message);

        if self.auto_approve {
            info!("Auto-approving deployment to {}", target);
            let actor = Some(AUTO_APPROVE_ACTOR.to_string());
            let _ = decision.resolve(ApprovalStatus::Approved, actor);
            return Ok(decision);
        }

        let (sender, receiver) = oneshot::channel();
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        {
            let mut pending = self.lock();
            if pending.contains_key(target) {
                return Err(ApprovalError::AlreadyPending(target.to_string()));
            }
            pending.insert(
                target.to_string(),
                Waiter {
                    id,
                    message: message.to_string(),
                    requested_at: Utc::now(),
                    sender,
                },
            );
        }
        let _registration = Registration {
            gate: self,
            target: target.to_string(),
            id,
        };

        info!(
            "Waiting up to {}s for approval of {}: {}",
            timeout.as_secs(),
            target,
            message
        );

        // A decision already handed to `submit` wins over a timer firing in the same tick
        tokio::select! {
            biased;
            received = receiver => match received {
                Ok(resolved) => Ok(resolved),
                // Sender dropped without a decision; only happens if the entry was discarded
                Err(_) => Err(ApprovalError::Cancelled(target.to_string())),
            },
            _ = tokio::time::sleep(timeout) => {
                warn!("Approval for {} timed out after {}s", target, timeout.as_secs());
                let _ = decision.resolve(ApprovalStatus::TimedOut, None);
                Ok(decision)
            }
            _ = cancel.cancelled() => Err(ApprovalError::Cancelled(target.to_string())),
        }
    }

    /// Submits a decision for a pending approval
    ///
    /// # Returns
    /// The resolved decision, or `NotPending` if nothing waits on `target`
    pub fn submit(
        &self,
        target: &str,
        approved: bool,
        actor: &str,
    ) -> Result<ApprovalDecision, ApprovalError> {
        let waiter = self
            .lock()
            .remove(target)
            .ok_or_else(|| ApprovalError::NotPending(target.to_string()))?;

        let status = if approved {
            ApprovalStatus::Approved
        } else {
            ApprovalStatus::Rejected
        };
        let mut decision = ApprovalDecision::pending(waiter.message);
        let _ = decision.resolve(status, Some(actor.to_string()));

        info!("Approval for {} {} by {}", target, status, actor);

        // The waiter may have timed out between the lookup and the send
        if waiter.sender.send(decision.clone()).is_err() {
            return Err(ApprovalError::NotPending(target.to_string()));
        }
        Ok(decision)
    }

    /// Approvals currently waiting for a decision, ordered by target
    pub fn pending(&self) -> Vec<PendingApproval> {
        let mut list: Vec<PendingApproval> = self
            .lock()
            .iter()
            .map(|(target, waiter)| PendingApproval {
                target: target.clone(),
                message: waiter.message.clone(),
                requested_at: waiter.requested_at,
            })
            .collect();
        list.sort_by(|a, b| a.target.cmp(&b.target));
        list
    }
}

impl Default for ApprovalGate {
    fn default() -> Self {
        Self::new(false)
    }
}
