//! Sample worker: echoes the envelope body back on the embedded reply
//! channel. Useful for exercising the bridge end to end against a real
//! broker.
//!
//! Configuration via environment: `BROKER_ENDPOINT`, `BROKER_CREDENTIAL`,
//! `CHANNELS` (comma-separated), `RESPONSE_DELAY_MS`.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use serde_json::json;

use pubsub_bridge::broker::{Broker, BrokerError, RedisBroker, Subscription};
use pubsub_bridge::config::BrokerConfig;
use pubsub_bridge::envelope::Envelope;
use pubsub_bridge::observability::logging;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    logging::init(&std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()));

    let endpoint =
        std::env::var("BROKER_ENDPOINT").unwrap_or_else(|_| "localhost:6379".to_string());
    let credential = std::env::var("BROKER_CREDENTIAL")
        .ok()
        .filter(|value| !value.is_empty());
    let channels: Vec<String> = std::env::var("CHANNELS")
        .unwrap_or_else(|_| "incoming-messages".to_string())
        .split(',')
        .map(|channel| channel.trim().to_string())
        .filter(|channel| !channel.is_empty())
        .collect();
    let delay_ms: u64 = std::env::var("RESPONSE_DELAY_MS")
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(0);

    let broker_config = BrokerConfig {
        endpoint,
        credential,
        ..Default::default()
    };
    let broker = Arc::new(RedisBroker::connect(broker_config, 10 << 20).await?);

    tracing::info!(channels = ?channels, delay_ms, "echo worker ready");

    for channel in channels {
        let broker = Arc::clone(&broker);
        tokio::spawn(async move {
            if let Err(err) = listen(broker, &channel, delay_ms).await {
                tracing::error!(channel = %channel, error = %err, "listener stopped");
            }
        });
    }

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutting down");
    Ok(())
}

async fn listen(
    broker: Arc<RedisBroker>,
    channel: &str,
    delay_ms: u64,
) -> Result<(), BrokerError> {
    let mut subscription = broker.subscribe(channel).await?;
    subscription.ready().await?;
    tracing::info!(channel, "listening");

    while let Some(message) = subscription.next_message().await? {
        if delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
        }

        let envelope: Envelope = match serde_json::from_slice(&message.payload) {
            Ok(envelope) => envelope,
            Err(err) => {
                tracing::warn!(channel = %message.channel, error = %err, "skipping unparsable message");
                continue;
            }
        };
        let Some(reply_channel) = envelope
            .header
            .get("response_topic")
            .and_then(|value| value.as_str())
        else {
            tracing::warn!(channel = %message.channel, "message carries no response_topic");
            continue;
        };

        let reply = json!({ "body": envelope.body });
        let payload = serde_json::to_vec(&reply).unwrap_or_default();
        if let Err(err) = broker.publish(reply_channel, Bytes::from(payload)).await {
            tracing::error!(reply_channel = %reply_channel, error = %err, "failed to publish reply");
        } else {
            tracing::debug!(reply_channel = %reply_channel, "reply published");
        }
    }
    Ok(())
}
