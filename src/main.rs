//! HTTP to pub/sub bridge.
//!
//! # Architecture Overview
//!
//! ```text
//!   Client Request          ┌──────────────────────────────────────────┐
//!   ─────────────────────── ▶  http    ──▶  bridge engine              │
//!                           │  front-end    │  envelope + routing      │
//!                           │               ▼                          │
//!                           │         ┌──────────┐   subscribe/publish │
//!   Client Response         │         │  broker  │──────────────────── ┼──▶ Broker ◀── Workers
//!   ◀────────────────────── ◀─────────│  client  │◀─────────────────── ┼──
//!                           │         └──────────┘    correlated reply │
//!                           │                                          │
//!                           │  config · audit · admin · observability  │
//!                           └──────────────────────────────────────────┘
//! ```
//!
//! Exit codes: 0 on clean shutdown, non-zero on bind failure or a fatal
//! broker error at startup.

use std::sync::Arc;

use tokio::net::TcpListener;

use pubsub_bridge::audit::{AuditLog, AuditSink, NoopSink};
use pubsub_bridge::bridge::{BridgeEngine, BridgeSettings};
use pubsub_bridge::broker::RedisBroker;
use pubsub_bridge::config;
use pubsub_bridge::http::HttpServer;
use pubsub_bridge::lifecycle::{shutdown_signal, Shutdown};
use pubsub_bridge::observability::{logging, metrics};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = config::load_from_env()?;
    logging::init(&config.observability.log_level);

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "pubsub-bridge starting");
    tracing::info!(
        listen_port = config.listen_port,
        broker_endpoint = %config.broker.endpoint,
        fixed_channel = config.fixed_channel.as_deref().unwrap_or(""),
        respond_immediately_status = ?config.respond_immediately_status,
        response_timeout_secs = config.response_timeout.as_secs(),
        "configuration loaded"
    );
    tracing::debug!(
        read_timeout_secs = config.http.read_timeout.as_secs(),
        write_timeout_secs = config.http.write_timeout.as_secs(),
        idle_timeout_secs = config.http.idle_timeout.as_secs(),
        max_header_bytes = config.http.max_header_bytes,
        max_request_body_bytes = config.http.max_request_body_bytes,
        shutdown_timeout_secs = config.http.shutdown_timeout.as_secs(),
        "http limits"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => {
                if let Err(err) = metrics::init_metrics(addr) {
                    tracing::error!(error = %err, "failed to install metrics exporter");
                }
            }
            Err(err) => {
                tracing::error!(
                    metrics_address = %config.observability.metrics_address,
                    error = %err,
                    "failed to parse metrics address"
                );
            }
        }
    }

    // A broker that cannot be reached at startup is fatal.
    let broker = Arc::new(
        RedisBroker::connect(config.broker.clone(), config.http.max_request_body_bytes).await?,
    );

    let (audit, audit_store): (Arc<dyn AuditSink>, _) = if config.audit.max_entries > 0 {
        let log = AuditLog::new(config.audit.max_entries);
        let store = log.store();
        (Arc::new(log), Some(store))
    } else {
        (Arc::new(NoopSink), None)
    };

    let shutdown = Shutdown::new();
    let force_cancel = Shutdown::new();

    if config.admin.enabled {
        let bind_address = config.admin.bind_address.clone();
        let store = audit_store.clone();
        let admin_rx = shutdown.subscribe();
        tokio::spawn(async move {
            if let Err(err) = pubsub_bridge::admin::serve(&bind_address, store, admin_rx).await {
                tracing::error!(error = %err, "admin API failed");
            }
        });
    }

    let engine = Arc::new(BridgeEngine::new(
        BridgeSettings::from_config(&config),
        broker,
        audit,
        force_cancel.clone(),
    ));
    let server = HttpServer::new(&config, engine, force_cancel);

    let listener = TcpListener::bind(("0.0.0.0", config.listen_port)).await?;

    let signal_shutdown = shutdown.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        signal_shutdown.trigger();
    });

    server.run(listener, shutdown).await?;

    tracing::info!("shutdown complete");
    Ok(())
}
