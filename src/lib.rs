//! HTTP to pub/sub bridge library.
//!
//! Turns each inbound HTTP request into a message on a pub/sub broker,
//! optionally awaits a correlated reply on a per-request response channel,
//! and translates that reply back into an HTTP response.

// Core subsystems
pub mod bridge;
pub mod broker;
pub mod envelope;
pub mod http;
pub mod routing;

// Cross-cutting concerns
pub mod admin;
pub mod audit;
pub mod config;
pub mod lifecycle;
pub mod observability;

pub use bridge::{BridgeEngine, BridgeSettings};
pub use config::BridgeConfig;
pub use http::HttpServer;
pub use lifecycle::Shutdown;
