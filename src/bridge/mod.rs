//! Request/reply bridging engine.
//!
//! One bridge is one in-flight request lifecycle: build the envelope, pick
//! channels, subscribe-then-publish, await the correlated reply (or not, in
//! fire-and-forget mode), and produce exactly one HTTP response.

pub mod engine;

pub use engine::{BridgeEngine, BridgeSettings};
