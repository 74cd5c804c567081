//! Process-local broker built on per-channel broadcast channels.
//!
//! Used by the test suite and for embedding the bridge next to in-process
//! workers. Semantics match a fire-and-forget pub/sub broker: publishing to
//! a channel with no subscribers succeeds and the message is dropped.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::broadcast;

use super::{Broker, BrokerError, BrokerMessage, Subscription};

const CHANNEL_CAPACITY: usize = 64;

/// A record of one publish, kept for test introspection.
#[derive(Debug, Clone)]
pub struct PublishRecord {
    pub channel: String,
    pub payload: Bytes,
}

struct Inner {
    channels: Mutex<HashMap<String, broadcast::Sender<Bytes>>>,
    publishes: Mutex<Vec<PublishRecord>>,
    publish_count: AtomicU64,
    live_subscriptions: AtomicUsize,
    subscriptions_created: AtomicU64,
}

/// In-memory pub/sub bus.
#[derive(Clone)]
pub struct InMemoryBroker {
    inner: Arc<Inner>,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                channels: Mutex::new(HashMap::new()),
                publishes: Mutex::new(Vec::new()),
                publish_count: AtomicU64::new(0),
                live_subscriptions: AtomicUsize::new(0),
                subscriptions_created: AtomicU64::new(0),
            }),
        }
    }

    /// Total number of publishes observed.
    pub fn publish_count(&self) -> u64 {
        self.inner.publish_count.load(Ordering::Relaxed)
    }

    /// All publishes observed so far, in order.
    pub fn publishes(&self) -> Vec<PublishRecord> {
        self.inner
            .publishes
            .lock()
            .map(|records| records.clone())
            .unwrap_or_default()
    }

    /// Publishes observed on one channel, in order.
    pub fn publishes_on(&self, channel: &str) -> Vec<PublishRecord> {
        self.publishes()
            .into_iter()
            .filter(|record| record.channel == channel)
            .collect()
    }

    /// Number of subscriptions currently open.
    pub fn live_subscription_count(&self) -> usize {
        self.inner.live_subscriptions.load(Ordering::Relaxed)
    }

    /// Number of subscriptions ever created.
    pub fn subscriptions_created(&self) -> u64 {
        self.inner.subscriptions_created.load(Ordering::Relaxed)
    }
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Broker for InMemoryBroker {
    async fn publish(&self, channel: &str, payload: Bytes) -> Result<(), BrokerError> {
        self.inner.publish_count.fetch_add(1, Ordering::Relaxed);
        self.inner
            .publishes
            .lock()
            .map_err(|_| BrokerError::Internal("publish log poisoned".to_string()))?
            .push(PublishRecord {
                channel: channel.to_string(),
                payload: payload.clone(),
            });

        let sender = {
            let channels = self
                .inner
                .channels
                .lock()
                .map_err(|_| BrokerError::Internal("channel map poisoned".to_string()))?;
            channels.get(channel).cloned()
        };
        if let Some(sender) = sender {
            // Err here means no live receivers, which is fine for pub/sub.
            let _ = sender.send(payload);
        }
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<Box<dyn Subscription>, BrokerError> {
        let receiver = {
            let mut channels = self
                .inner
                .channels
                .lock()
                .map_err(|_| BrokerError::Internal("channel map poisoned".to_string()))?;
            channels
                .entry(channel.to_string())
                .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
                .subscribe()
        };

        self.inner.live_subscriptions.fetch_add(1, Ordering::Relaxed);
        self.inner
            .subscriptions_created
            .fetch_add(1, Ordering::Relaxed);

        Ok(Box::new(MemorySubscription {
            channel: channel.to_string(),
            receiver: Some(receiver),
            inner: Arc::clone(&self.inner),
        }))
    }
}

struct MemorySubscription {
    channel: String,
    receiver: Option<broadcast::Receiver<Bytes>>,
    inner: Arc<Inner>,
}

impl MemorySubscription {
    fn release(&mut self) {
        let Some(receiver) = self.receiver.take() else {
            return;
        };
        // The receiver must be gone before the count check below.
        drop(receiver);
        self.inner.live_subscriptions.fetch_sub(1, Ordering::Relaxed);
        if let Ok(mut channels) = self.inner.channels.lock() {
            let empty = channels
                .get(&self.channel)
                .map(|sender| sender.receiver_count() == 0)
                .unwrap_or(false);
            if empty {
                channels.remove(&self.channel);
            }
        }
    }
}

#[async_trait]
impl Subscription for MemorySubscription {
    async fn ready(&mut self) -> Result<(), BrokerError> {
        // Broadcast receivers are live from creation.
        match self.receiver {
            Some(_) => Ok(()),
            None => Err(BrokerError::Internal("subscription closed".to_string())),
        }
    }

    async fn next_message(&mut self) -> Result<Option<BrokerMessage>, BrokerError> {
        let Some(receiver) = self.receiver.as_mut() else {
            return Ok(None);
        };
        loop {
            match receiver.recv().await {
                Ok(payload) => {
                    return Ok(Some(BrokerMessage {
                        channel: self.channel.clone(),
                        payload,
                    }));
                }
                Err(broadcast::error::RecvError::Closed) => return Ok(None),
                Err(broadcast::error::RecvError::Lagged(count)) => {
                    tracing::debug!(channel = %self.channel, lagged = count, "subscriber lagged");
                    continue;
                }
            }
        }
    }

    async fn close(&mut self) -> Result<(), BrokerError> {
        self.release();
        Ok(())
    }
}

impl Drop for MemorySubscription {
    fn drop(&mut self) {
        self.release();
    }
}
