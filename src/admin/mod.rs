//! Read-only admin API over the audit log.
//!
//! Served on its own bind address, separate from the bridge socket, so the
//! catch-all bridge route never shadows it.

pub mod handlers;

use std::sync::Arc;

use axum::routing::get;
use axum::Router;
use tokio::sync::broadcast;

use crate::audit::AuditStore;

/// State injected into admin handlers.
#[derive(Clone)]
pub struct AdminState {
    /// Absent when the audit store is disabled.
    pub store: Option<Arc<AuditStore>>,
}

/// Build the admin router.
pub fn router(store: Option<Arc<AuditStore>>) -> Router {
    Router::new()
        .route("/api/status", get(handlers::get_status))
        .route("/api/logs", get(handlers::get_logs))
        .route("/api/stats", get(handlers::get_stats))
        .with_state(AdminState { store })
}

/// Bind and serve the admin API until the shutdown signal fires.
pub async fn serve(
    bind_address: &str,
    store: Option<Arc<AuditStore>>,
    shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), std::io::Error> {
    let listener = tokio::net::TcpListener::bind(bind_address).await?;
    tracing::info!(address = %bind_address, "admin API listening");
    serve_on(listener, store, shutdown_rx).await
}

/// Serve the admin API on an already-bound listener.
pub async fn serve_on(
    listener: tokio::net::TcpListener,
    store: Option<Arc<AuditStore>>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), std::io::Error> {
    axum::serve(listener, router(store))
        .with_graceful_shutdown(async move {
            let _ = shutdown_rx.recv().await;
        })
        .await
}
