//! Conveyor HTTP Client
//!
//! Typed HTTP access for the parts of Conveyor that talk over the network:
//!
//! - the approval API served by a `deploy` that waits for a decision
//! - post-deploy health probes against the deployed service
//! - the outcome notification webhook
//!
//! # Example
//!
//! ```no_run
//! use conveyor_client::ConveyorClient;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), conveyor_client::ClientError> {
//!     let client = ConveyorClient::new("http://127.0.0.1:8787");
//!
//!     for pending in client.list_pending_approvals().await? {
//!         println!("{}: {}", pending.target, pending.message);
//!     }
//!     Ok(())
//! }
//! ```

pub mod error;
mod approvals;
mod health;
mod webhook;

// Re-export commonly used types
pub use error::{ClientError, Result};
pub use health::HealthClient;
pub use webhook::WebhookClient;

use reqwest::Client;
use serde::de::DeserializeOwned;

/// HTTP client for the approval API of a running deployment
#[derive(Debug, Clone)]
pub struct ConveyorClient {
    /// Base URL of the approval API (e.g., "http://127.0.0.1:8787")
    base_url: String,
    /// HTTP client instance
    client: Client,
}

impl ConveyorClient {
    /// Create a new client
    ///
    /// # Arguments
    /// * `base_url` - The base URL of the approval API
    ///
    /// # Example
    /// ```
    /// use conveyor_client::ConveyorClient;
    ///
    /// let client = ConveyorClient::new("http://127.0.0.1:8787");
    /// ```
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client: Client::new(),
        }
    }

    /// Create a new client with a custom HTTP client
    ///
    /// This allows you to configure timeouts, proxies, TLS settings, etc.
    pub fn with_client(base_url: impl Into<String>, client: Client) -> Self {
        let base_url = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        }
    }

    /// Get the base URL of the approval API
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    // =============================================================================
    // Response Handlers
    // =============================================================================

    /// Handle an API response and deserialize JSON
    ///
    /// This method checks the status code and returns an appropriate error if
    /// the request failed, or deserializes the response body if successful.
    async fn handle_response<T: DeserializeOwned>(
        &self,
        response: reqwest::Response,
    ) -> Result<T> {
        handle_json(response).await
    }
}

/// Shared JSON response handling for every client in this crate
pub(crate) async fn handle_json<T: DeserializeOwned>(response: reqwest::Response) -> Result<T> {
    let status = response.status();

    if !status.is_success() {
        let error_text = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());
        return Err(ClientError::api_error(status.as_u16(), error_text));
    }

    response
        .json()
        .await
        .map_err(|e| ClientError::ParseError(format!("Failed to parse JSON response: {}", e)))
}

/// Shared handling for responses without a body
pub(crate) async fn handle_empty(response: reqwest::Response) -> Result<()> {
    let status = response.status();

    if !status.is_success() {
        let error_text = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());
        return Err(ClientError::api_error(status.as_u16(), error_text));
    }

    Ok(())
}

#[cfg(test)]
pub(crate) mod test_support {
    use axum::Router;

    /// Serves `router` on an ephemeral local port and returns its base URL
    pub(crate) async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{}", addr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_creation() {
        let client = ConveyorClient::new("http://127.0.0.1:8787");
        assert_eq!(client.base_url(), "http://127.0.0.1:8787");
    }

    #[test]
    fn test_client_trims_trailing_slash() {
        let client = ConveyorClient::new("http://127.0.0.1:8787/");
        assert_eq!(client.base_url(), "http://127.0.0.1:8787");
    }

    #[test]
    fn test_client_with_custom_client() {
        let http_client = Client::new();
        let client = ConveyorClient::with_client("http://127.0.0.1:8787", http_client);
        assert_eq!(client.base_url(), "http://127.0.0.1:8787");
    }
}
