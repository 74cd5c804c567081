//! Configuration schema definitions.
//!
//! All values are immutable after load; the loaded config is shared via
//! `Arc` across the server, the bridge engine, and the admin API.

use std::time::Duration;

/// Root configuration for the bridge.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Port the HTTP front-end listens on.
    pub listen_port: u16,

    /// Broker connection settings.
    pub broker: BrokerConfig,

    /// If set, every request publishes to this channel regardless of path.
    pub fixed_channel: Option<String>,

    /// If set, enables fire-and-forget mode: respond with this status
    /// immediately after publishing, without waiting for a reply.
    pub respond_immediately_status: Option<u16>,

    /// Maximum wait for a correlated reply in synchronous mode.
    pub response_timeout: Duration,

    /// HTTP server limits and timeouts.
    pub http: HttpConfig,

    /// Audit log settings.
    pub audit: AuditConfig,

    /// Admin API settings.
    pub admin: AdminConfig,

    /// Logging and metrics settings.
    pub observability: ObservabilityConfig,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            listen_port: 8080,
            broker: BrokerConfig::default(),
            fixed_channel: None,
            respond_immediately_status: None,
            response_timeout: Duration::from_secs(30),
            http: HttpConfig::default(),
            audit: AuditConfig::default(),
            admin: AdminConfig::default(),
            observability: ObservabilityConfig::default(),
        }
    }
}

impl BridgeConfig {
    /// True when the bridge publishes without waiting for a reply.
    pub fn is_fire_and_forget(&self) -> bool {
        self.respond_immediately_status.is_some()
    }
}

/// Broker connection settings.
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// Broker endpoint, `host:port`.
    pub endpoint: String,

    /// Optional credential sent at connect time.
    pub credential: Option<String>,

    /// Logical database index selected at connect time.
    pub db_index: i64,

    /// Number of pooled publish connections.
    pub pool_size: usize,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            endpoint: "localhost:6379".to_string(),
            credential: None,
            db_index: 0,
            pool_size: 10,
        }
    }
}

/// HTTP server limits and timeouts.
#[derive(Debug, Clone)]
pub struct HttpConfig {
    /// Maximum time to read a request body.
    pub read_timeout: Duration,

    /// Maximum time to write a response.
    pub write_timeout: Duration,

    /// Idle connection timeout.
    pub idle_timeout: Duration,

    /// Maximum size of request headers in bytes.
    pub max_header_bytes: usize,

    /// Maximum request body size in bytes.
    pub max_request_body_bytes: usize,

    /// How long in-flight bridges may run after a shutdown signal.
    pub shutdown_timeout: Duration,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            read_timeout: Duration::from_secs(30),
            write_timeout: Duration::from_secs(60),
            idle_timeout: Duration::from_secs(60),
            max_header_bytes: 1 << 20,
            max_request_body_bytes: 10 << 20,
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

/// Audit log settings.
///
/// `max_entries` of zero disables the store; the bridge then logs to a
/// no-op sink.
#[derive(Debug, Clone, Default)]
pub struct AuditConfig {
    /// Maximum entries retained in the in-memory audit log.
    pub max_entries: usize,
}

/// Admin API settings.
#[derive(Debug, Clone)]
pub struct AdminConfig {
    /// Serve the read-only admin API.
    pub enabled: bool,

    /// Admin API bind address.
    pub bind_address: String,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            bind_address: "127.0.0.1:8081".to_string(),
        }
    }
}

/// Logging and metrics settings.
#[derive(Debug, Clone)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Install the Prometheus exporter.
    pub metrics_enabled: bool,

    /// Metrics exporter bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}
