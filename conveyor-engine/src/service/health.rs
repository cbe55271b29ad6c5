//! Post-deploy health probing

use async_trait::async_trait;
use conveyor_client::HealthClient;
use std::time::Duration;
use tracing::{debug, info};

/// Probes a health endpoint once
#[async_trait]
pub trait HealthProbe: Send + Sync {
    /// # Returns
    /// The HTTP status on a 2xx answer, otherwise a description of the failure
    async fn probe(&self, url: &str, timeout: Duration) -> Result<u16, String>;
}

/// HTTP implementation of HealthProbe
#[derive(Debug, Clone, Default)]
pub struct HttpHealthProbe {
    client: HealthClient,
}

impl HttpHealthProbe {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl HealthProbe for HttpHealthProbe {
    async fn probe(&self, url: &str, timeout: Duration) -> Result<u16, String> {
        debug!("Probing {}", url);
        self.client.probe(url, timeout).await.map_err(|e| {
            if e.is_timeout() {
                format!("no answer within {}s", timeout.as_secs())
            } else {
                e.to_string()
            }
        })
    }
}

/// Reports every probe as healthy without sending a request
#[derive(Debug, Clone, Default)]
pub struct DryRunHealthProbe;

#[async_trait]
impl HealthProbe for DryRunHealthProbe {
    async fn probe(&self, url: &str, _timeout: Duration) -> Result<u16, String> {
        info!("[dry-run] GET {}", url);
        Ok(200)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_silent_endpoint_reports_timeout() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        // Accepts connections but never answers
        let _server = tokio::spawn(async move {
            let mut open = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                open.push(socket);
            }
        });

        let err = HttpHealthProbe::new()
            .probe(&format!("http://{}/health", addr), Duration::from_secs(1))
            .await
            .unwrap_err();
        assert_eq!(err, "no answer within 1s");
    }

    #[tokio::test]
    async fn test_dry_run_is_healthy() {
        let status = DryRunHealthProbe
            .probe("http://myapp.staging.svc/health", Duration::from_secs(1))
            .await;
        assert_eq!(status, Ok(200));
    }
}
