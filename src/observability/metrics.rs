//! Metrics collection and exposition.

use std::net::SocketAddr;
use std::time::Instant;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

/// Initialize metrics exporter and server.
pub fn init_metrics(addr: SocketAddr) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;

    tracing::info!("metrics server listening on http://{}", addr);
    Ok(())
}

/// Record one bridged request.
pub fn record_request(method: &str, status: u16, channel: &str, started: Instant) {
    let labels = [
        ("method", method.to_string()),
        ("status", status.to_string()),
        ("channel", channel.to_string()),
    ];

    counter!("bridge_requests_total", &labels).increment(1);
    histogram!("bridge_request_duration_seconds", &labels).record(started.elapsed().as_secs_f64());
}

/// Update the in-flight bridge gauge.
pub fn record_in_flight(count: usize) {
    gauge!("bridge_in_flight").set(count as f64);
}
