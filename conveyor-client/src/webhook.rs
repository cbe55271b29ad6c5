//! Notification webhook

use conveyor_core::dto::notification::Notification;
use reqwest::Client;

use crate::error::Result;

/// Posts pipeline outcome notifications to a webhook URL
#[derive(Debug, Clone)]
pub struct WebhookClient {
    url: String,
    client: Client,
}

impl WebhookClient {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            client: Client::new(),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Sends one notification
    pub async fn notify(&self, notification: &Notification) -> Result<()> {
        let response = self
            .client
            .post(&self.url)
            .json(notification)
            .send()
            .await?;

        crate::handle_empty(response).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::serve;
    use axum::extract::State;
    use axum::http::StatusCode;
    use axum::routing::post;
    use axum::{Json, Router};
    use conveyor_core::domain::pipeline::PipelineOutcome;
    use std::sync::{Arc, Mutex};

    fn notification() -> Notification {
        Notification {
            pipeline: "build".to_string(),
            build_id: "42-abc1234".to_string(),
            outcome: PipelineOutcome::Success,
            message: "Build 42-abc1234 of myapp on main succeeded".to_string(),
        }
    }

    #[tokio::test]
    async fn test_notify_posts_json() {
        let received: Arc<Mutex<Vec<Notification>>> = Arc::default();
        let router = Router::new()
            .route(
                "/hook",
                post(
                    |State(received): State<Arc<Mutex<Vec<Notification>>>>,
                     Json(body): Json<Notification>| async move {
                        received.lock().unwrap().push(body);
                        StatusCode::NO_CONTENT
                    },
                ),
            )
            .with_state(received.clone());
        let base = serve(router).await;

        WebhookClient::new(format!("{}/hook", base))
            .notify(&notification())
            .await
            .unwrap();

        assert_eq!(*received.lock().unwrap(), vec![notification()]);
    }

    #[tokio::test]
    async fn test_rejected_notification_is_api_error() {
        let router = Router::new().route(
            "/hook",
            post(|| async { (StatusCode::FORBIDDEN, "bad token") }),
        );
        let base = serve(router).await;

        let err = WebhookClient::new(format!("{}/hook", base))
            .notify(&notification())
            .await
            .unwrap_err();
        assert_eq!(err.status(), Some(403));
        assert_eq!(err.to_string(), "HTTP 403: bad token");
    }
}
