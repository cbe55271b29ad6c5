//! Health-check probe
//!
//! Issues a single HTTP GET against a deployed service. Retry and backoff
//! policy belongs to the caller.

use reqwest::Client;
use std::time::Duration;
use tracing::debug;

use crate::error::{ClientError, Result};

/// HTTP client used for post-deploy health checks
#[derive(Debug, Clone, Default)]
pub struct HealthClient {
    client: Client,
}

impl HealthClient {
    pub fn new() -> Self {
        Self {
            client: Client::new(),
        }
    }

    /// Performs one GET request
    ///
    /// # Arguments
    /// * `url` - Full URL to probe
    /// * `timeout` - Per-request timeout
    ///
    /// # Returns
    /// The HTTP status code when it is 2xx
    ///
    /// # Errors
    /// `ClientError::ApiError` for non-2xx responses, `RequestFailed` for
    /// connection errors and timeouts
    pub async fn probe(&self, url: &str, timeout: Duration) -> Result<u16> {
        let response = self.client.get(url).timeout(timeout).send().await?;
        let status = response.status();

        debug!("Health probe {} returned {}", url, status);

        if status.is_success() {
            Ok(status.as_u16())
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(ClientError::api_error(status.as_u16(), body))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::serve;
    use axum::Router;
    use axum::http::StatusCode;
    use axum::routing::get;

    #[tokio::test]
    async fn test_server_error_is_api_error() {
        let router = Router::new().route(
            "/health",
            get(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "database unavailable") }),
        );
        let base = serve(router).await;

        let err = HealthClient::new()
            .probe(&format!("{}/health", base), Duration::from_secs(5))
            .await
            .unwrap_err();

        match err {
            ClientError::ApiError { status, message } => {
                assert_eq!(status, 500);
                assert_eq!(message, "database unavailable");
            }
            other => panic!("expected an API error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_no_content_is_healthy() {
        let router = Router::new().route("/health", get(|| async { StatusCode::NO_CONTENT }));
        let base = serve(router).await;

        let status = HealthClient::new()
            .probe(&format!("{}/health", base), Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(status, 204);
    }

    #[tokio::test]
    async fn test_slow_endpoint_times_out() {
        let router = Router::new().route(
            "/health",
            get(|| async {
                tokio::time::sleep(Duration::from_secs(10)).await;
                StatusCode::OK
            }),
        );
        let base = serve(router).await;

        let err = HealthClient::new()
            .probe(&format!("{}/health", base), Duration::from_millis(200))
            .await
            .unwrap_err();
        assert!(err.is_timeout(), "{:?}", err);
    }
}
