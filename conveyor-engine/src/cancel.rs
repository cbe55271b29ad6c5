//! Cancellation signal
//!
//! One signal is shared by everything a pipeline run starts: stage steps,
//! external commands, the approval wait and the rollout/health polls. The
//! first reason recorded wins; later calls are ignored.

use std::sync::Arc;
use tokio::sync::watch;

/// Why a run was cancelled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelReason {
    /// External request (e.g., Ctrl-C)
    Requested,
    /// The pipeline wall-clock budget ran out
    PipelineTimeout,
}

/// Cloneable cancellation handle
#[derive(Debug, Clone)]
pub struct CancelSignal {
    tx: Arc<watch::Sender<Option<CancelReason>>>,
    rx: watch::Receiver<Option<CancelReason>>,
}

impl CancelSignal {
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(None);
        Self {
            tx: Arc::new(tx),
            rx,
        }
    }

    /// Requests cancellation
    ///
    /// Returns `true` if this call set the reason.
    pub fn cancel(&self, reason: CancelReason) -> bool {
        self.tx.send_if_modified(|current| {
            if current.is_none() {
                *current = Some(reason);
                true
            } else {
                false
            }
        })
    }

    pub fn reason(&self) -> Option<CancelReason> {
        *self.rx.borrow()
    }

    pub fn is_cancelled(&self) -> bool {
        self.reason().is_some()
    }

    /// Resolves once cancellation has been requested
    pub async fn cancelled(&self) -> CancelReason {
        let mut rx = self.rx.clone();
        loop {
            if let Some(reason) = *rx.borrow_and_update() {
                return reason;
            }
            if rx.changed().await.is_err() {
                // The sender lives as long as any clone of this signal
                std::future::pending::<()>().await;
            }
        }
    }
}

impl Default for CancelSignal {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_first_reason_wins() {
        let signal = CancelSignal::new();
        assert!(!signal.is_cancelled());

        assert!(signal.cancel(CancelReason::PipelineTimeout));
        assert!(!signal.cancel(CancelReason::Requested));
        assert_eq!(signal.reason(), Some(CancelReason::PipelineTimeout));
    }

    #[tokio::test]
    async fn test_clones_observe_cancellation() {
        let signal = CancelSignal::new();
        let clone = signal.clone();

        let waiter = tokio::spawn(async move { clone.cancelled().await });
        tokio::time::sleep(Duration::from_millis(10)).await;
        signal.cancel(CancelReason::Requested);

        assert_eq!(waiter.await.unwrap(), CancelReason::Requested);
    }

    #[tokio::test]
    async fn test_cancelled_returns_immediately_when_already_set() {
        let signal = CancelSignal::new();
        signal.cancel(CancelReason::Requested);
        assert_eq!(signal.cancelled().await, CancelReason::Requested);
    }
}
