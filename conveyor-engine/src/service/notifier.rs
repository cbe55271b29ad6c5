//! Outcome notifications
//!
//! Notify hooks hand a [`Notification`] to a [`Notifier`]. Without a
//! configured webhook notifications only go to the log.

use async_trait::async_trait;
use conveyor_client::WebhookClient;
use conveyor_core::domain::pipeline::PipelineOutcome;
use conveyor_core::dto::notification::Notification;
use tracing::{info, warn};

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, notification: &Notification) -> anyhow::Result<()>;
}

/// Writes notifications to the log
#[derive(Debug, Clone, Default)]
pub struct TracingNotifier;

#[async_trait]
impl Notifier for TracingNotifier {
    async fn notify(&self, notification: &Notification) -> anyhow::Result<()> {
        match notification.outcome {
            PipelineOutcome::Success => info!(
                "[notify] {} #{}: {}",
                notification.pipeline, notification.build_id, notification.message
            ),
            PipelineOutcome::Failure => warn!(
                "[notify] {} #{}: {}",
                notification.pipeline, notification.build_id, notification.message
            ),
        }
        Ok(())
    }
}

/// Posts notifications to a webhook, logging them as well
#[derive(Debug, Clone)]
pub struct WebhookNotifier {
    client: WebhookClient,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: WebhookClient::new(url),
        }
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, notification: &Notification) -> anyhow::Result<()> {
        TracingNotifier.notify(notification).await?;
        self.client
            .notify(notification)
            .await
            .map_err(|e| anyhow::anyhow!("Webhook {} failed: {}", self.client.url(), e))
    }
}
