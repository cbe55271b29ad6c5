//! Approval API
//!
//! HTTP surface served while a deployment waits at the approval gate.
//! External actors list pending approvals and submit decisions here.

pub mod approval;
pub mod error;
pub mod health;

use anyhow::Context;
use axum::{
    Router,
    routing::{get, post},
};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

use crate::service::ApprovalGate;

/// Create the approval router
pub fn create_router(gate: Arc<ApprovalGate>) -> Router {
    Router::new()
        .route("/health", get(health::health_check))
        .route("/approvals", get(approval::list_pending))
        .route("/approvals/{target}", post(approval::submit_decision))
        .with_state(gate)
        .layer(TraceLayer::new_for_http())
}

/// Binds the approval API address
pub async fn bind(addr: SocketAddr) -> anyhow::Result<TcpListener> {
    TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind approval API to {}", addr))
}

/// Serves the approval API until `shutdown` resolves
///
/// # Arguments
/// * `listener` - Listener from [`bind`]
/// * `gate` - Gate receiving the decisions
/// * `shutdown` - Future completing when the server should stop
pub async fn serve(
    listener: TcpListener,
    gate: Arc<ApprovalGate>,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        tracing::info!("Approval API listening on {}", addr);
    }

    axum::serve(listener, create_router(gate))
        .with_graceful_shutdown(shutdown)
        .await
        .context("Approval API server failed")
}
