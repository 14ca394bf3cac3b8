//! HTTP Gateway - liveness and metrics
//!
//! - `GET /health`: `{status: "healthy" | "unhealthy", ...counters}` from
//!   per-loop cycle age plus database ping, 200 or 503
//! - `GET /metrics`: counter snapshot as JSON

pub mod handlers;
pub mod state;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{Router, routing::get};
use tokio::net::TcpListener;
use tracing::info;

pub use state::{GatewayState, WatchedLoop};

use crate::shutdown::Shutdown;

pub fn router(state: Arc<GatewayState>) -> Router {
    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/metrics", get(handlers::get_metrics))
        .with_state(state)
}

/// Bind the gateway; split from [`serve`] so callers learn the bound port
pub async fn bind(host: &str, port: u16) -> std::io::Result<TcpListener> {
    let addr = format!("{}:{}", host, port);
    TcpListener::bind(&addr).await
}

/// Serve until `shutdown` fires, then drain open connections
pub async fn serve(
    listener: TcpListener,
    state: Arc<GatewayState>,
    mut shutdown: Shutdown,
) -> std::io::Result<()> {
    let local: Option<SocketAddr> = listener.local_addr().ok();
    info!(addr = ?local, "Gateway listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { shutdown.wait().await })
        .await?;

    info!("Gateway stopped");
    Ok(())
}
