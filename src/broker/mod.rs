//! Broker capability.
//!
//! # Responsibilities
//! - Publish bytes to a channel (fire-and-forget)
//! - Create subscriptions with an explicit readiness signal
//! - Deliver subscribed messages as a finite, lazy sequence
//!
//! The bridge engine depends only on the [`Broker`] and [`Subscription`]
//! traits; connection management lives behind them.

pub mod memory;
pub mod redis;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

pub use memory::InMemoryBroker;
pub use redis::RedisBroker;

/// Errors from broker operations.
#[derive(Debug, Error)]
pub enum BrokerError {
    /// The broker could not be reached or the connection was lost.
    #[error("broker unavailable: {0}")]
    Unavailable(String),

    /// The operation was canceled before completing.
    #[error("broker operation canceled")]
    Canceled,

    /// The broker misbehaved at the protocol level.
    #[error("broker protocol error: {0}")]
    Internal(String),
}

/// One message delivered on a subscription.
#[derive(Debug, Clone)]
pub struct BrokerMessage {
    /// Channel the message arrived on.
    pub channel: String,

    /// Raw payload bytes.
    pub payload: Bytes,
}

/// Publishing and subscribing against a pub/sub broker.
///
/// Implementations must be safe to share across concurrent bridges.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Publish `payload` to `channel`. Delivery is best-effort; publishing
    /// to a channel with no subscribers succeeds and drops the message.
    async fn publish(&self, channel: &str, payload: Bytes) -> Result<(), BrokerError>;

    /// Create a subscription to `channel`. The subscription is not
    /// guaranteed to receive messages until [`Subscription::ready`] returns.
    async fn subscribe(&self, channel: &str) -> Result<Box<dyn Subscription>, BrokerError>;
}

/// A single-channel subscription handle, owned by one bridge.
#[async_trait]
pub trait Subscription: Send {
    /// Wait until the broker acknowledges the subscription is active.
    /// A publish issued before this returns may be lost to the subscriber.
    async fn ready(&mut self) -> Result<(), BrokerError>;

    /// Receive the next message. `Ok(None)` means the stream ended and no
    /// further messages will arrive.
    async fn next_message(&mut self) -> Result<Option<BrokerMessage>, BrokerError>;

    /// Release the subscription. Idempotent.
    async fn close(&mut self) -> Result<(), BrokerError>;
}
