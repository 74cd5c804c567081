//! HTTP server setup.
//!
//! # Responsibilities
//! - Build the axum router: a single catch-all route into the bridge
//! - Wire up request tracing
//! - Serve with graceful shutdown: drain in-flight bridges for the
//!   configured window, then cancel the stragglers
//!
//! The path is data, not routing; every method on every path lands in the
//! bridge handler.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Request, State};
use axum::response::Response;
use axum::routing::any;
use axum::Router;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

use crate::bridge::BridgeEngine;
use crate::config::BridgeConfig;
use crate::lifecycle::Shutdown;
use crate::observability::metrics::record_in_flight;

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<BridgeEngine>,
}

/// HTTP server for the bridge.
pub struct HttpServer {
    router: Router,
    engine: Arc<BridgeEngine>,
    shutdown_timeout: Duration,
    force_cancel: Shutdown,
}

impl HttpServer {
    /// Create a new HTTP server around the bridge engine.
    ///
    /// `force_cancel` must be the same coordinator handed to the engine;
    /// the drain watcher triggers it when the shutdown window elapses.
    pub fn new(config: &BridgeConfig, engine: Arc<BridgeEngine>, force_cancel: Shutdown) -> Self {
        let state = AppState {
            engine: Arc::clone(&engine),
        };
        let router = Self::build_router(state);
        Self {
            router,
            engine,
            shutdown_timeout: config.http.shutdown_timeout,
            force_cancel,
        }
    }

    /// Build the axum router with the catch-all bridge route.
    fn build_router(state: AppState) -> Router {
        Router::new()
            .route("/", any(bridge_handler))
            .route("/{*path}", any(bridge_handler))
            .with_state(state)
            .layer(TraceLayer::new_for_http())
    }

    /// Run the server, accepting connections on the given listener.
    ///
    /// Triggering `shutdown` stops the accept loop and starts the drain
    /// window; bridges still in flight when it closes are force-canceled.
    pub async fn run(self, listener: TcpListener, shutdown: Shutdown) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        let mut drain_rx = shutdown.subscribe();
        let engine = Arc::clone(&self.engine);
        let force_cancel = self.force_cancel.clone();
        let shutdown_timeout = self.shutdown_timeout;
        tokio::spawn(async move {
            let _ = drain_rx.recv().await;
            let in_flight = engine.in_flight();
            tracing::info!(
                in_flight,
                timeout_secs = shutdown_timeout.as_secs(),
                "draining in-flight bridges"
            );
            let deadline = tokio::time::Instant::now() + shutdown_timeout;
            loop {
                let in_flight = engine.in_flight();
                record_in_flight(in_flight);
                if in_flight == 0 {
                    break;
                }
                if tokio::time::Instant::now() >= deadline {
                    tracing::warn!(
                        in_flight,
                        "shutdown window elapsed, canceling remaining bridges"
                    );
                    force_cancel.trigger();
                    break;
                }
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        });

        let mut serve_rx = shutdown.subscribe();
        axum::serve(listener, self.router)
            .with_graceful_shutdown(async move {
                let _ = serve_rx.recv().await;
            })
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

/// Main bridge handler: every request becomes one bridge.
async fn bridge_handler(State(state): State<AppState>, request: Request) -> Response {
    state.engine.handle(request).await
}
