//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use pubsub_bridge::audit::{AuditSink, OutcomeEvent, StartEvent};
use pubsub_bridge::bridge::{BridgeEngine, BridgeSettings};
use pubsub_bridge::broker::{
    Broker, BrokerError, BrokerMessage, InMemoryBroker, Subscription,
};
use pubsub_bridge::config::BridgeConfig;
use pubsub_bridge::http::HttpServer;
use pubsub_bridge::lifecycle::Shutdown;

/// A bridge server running on an ephemeral port.
pub struct TestBridge {
    pub addr: SocketAddr,
    pub shutdown: Shutdown,
    pub engine: Arc<BridgeEngine>,
    pub server: JoinHandle<()>,
}

impl TestBridge {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }
}

/// Start a bridge over the given broker and audit sink.
pub async fn spawn_bridge(
    config: BridgeConfig,
    broker: Arc<dyn Broker>,
    audit: Arc<dyn AuditSink>,
) -> TestBridge {
    let shutdown = Shutdown::new();
    let force_cancel = Shutdown::new();
    let engine = Arc::new(BridgeEngine::new(
        BridgeSettings::from_config(&config),
        broker,
        audit,
        force_cancel.clone(),
    ));
    let server = HttpServer::new(&config, Arc::clone(&engine), force_cancel);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let run_shutdown = shutdown.clone();
    let server = tokio::spawn(async move {
        let _ = server.run(listener, run_shutdown).await;
    });

    TestBridge {
        addr,
        shutdown,
        engine,
        server,
    }
}

pub fn test_client() -> reqwest::Client {
    reqwest::Client::builder().no_proxy().build().unwrap()
}

/// Subscribe a worker to `channel` that answers every envelope on its
/// embedded reply channel with `make_reply(&envelope)`.
///
/// The subscription is established before this returns, so a request sent
/// afterwards cannot race it.
pub async fn spawn_reply_worker<F>(broker: Arc<InMemoryBroker>, channel: &str, make_reply: F)
where
    F: Fn(&Value) -> Bytes + Send + Sync + 'static,
{
    let mut subscription = broker.subscribe(channel).await.unwrap();
    subscription.ready().await.unwrap();

    tokio::spawn(async move {
        while let Ok(Some(message)) = subscription.next_message().await {
            let envelope: Value = match serde_json::from_slice(&message.payload) {
                Ok(envelope) => envelope,
                Err(_) => continue,
            };
            let Some(reply_channel) = envelope["header"]["response_topic"].as_str() else {
                continue;
            };
            let reply_channel = reply_channel.to_string();
            let payload = make_reply(&envelope);
            let _ = broker.publish(&reply_channel, payload).await;
        }
    });
}

/// Worker that echoes the request body back as `{"ok":true,"echo":<body>}`.
pub async fn spawn_echo_worker(broker: Arc<InMemoryBroker>, channel: &str) {
    spawn_reply_worker(broker, channel, |envelope| {
        let reply = json!({ "body": { "ok": true, "echo": envelope["body"] } });
        Bytes::from(serde_json::to_vec(&reply).unwrap())
    })
    .await;
}

/// Audit sink that records every event for later assertions.
#[derive(Default)]
pub struct RecordingAudit {
    pub starts: Mutex<Vec<StartEvent>>,
    pub outcomes: Mutex<Vec<OutcomeEvent>>,
}

impl RecordingAudit {
    pub fn start_count(&self) -> usize {
        self.starts.lock().unwrap().len()
    }

    pub fn outcomes_for(&self, request_id: &str) -> Vec<OutcomeEvent> {
        self.outcomes
            .lock()
            .unwrap()
            .iter()
            .filter(|event| event.request_id == request_id)
            .cloned()
            .collect()
    }

    pub fn all_outcomes(&self) -> Vec<OutcomeEvent> {
        self.outcomes.lock().unwrap().clone()
    }

    pub fn all_starts(&self) -> Vec<StartEvent> {
        self.starts.lock().unwrap().clone()
    }
}

impl AuditSink for RecordingAudit {
    fn log_start(&self, event: StartEvent) {
        self.starts.lock().unwrap().push(event);
    }

    fn log_outcome(&self, event: OutcomeEvent) {
        self.outcomes.lock().unwrap().push(event);
    }
}

/// One observed broker call, in global order.
#[derive(Debug, Clone)]
pub enum BrokerEvent {
    Subscribe {
        channel: String,
    },
    Ready {
        channel: String,
    },
    Publish {
        channel: String,
        response_topic: Option<String>,
    },
    Close {
        channel: String,
    },
}

/// Broker wrapper that records the order of calls across all bridges.
///
/// `Ready` is recorded after the inner readiness returns and `Publish`
/// before the inner publish starts, so a recorded `Ready < Publish` implies
/// the real ordering held.
pub struct RecordingBroker {
    inner: Arc<InMemoryBroker>,
    pub events: Arc<Mutex<Vec<BrokerEvent>>>,
}

impl RecordingBroker {
    pub fn new(inner: Arc<InMemoryBroker>) -> Self {
        Self {
            inner,
            events: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn events(&self) -> Vec<BrokerEvent> {
        self.events.lock().unwrap().clone()
    }
}

#[async_trait]
impl Broker for RecordingBroker {
    async fn publish(&self, channel: &str, payload: Bytes) -> Result<(), BrokerError> {
        let response_topic = serde_json::from_slice::<Value>(&payload)
            .ok()
            .and_then(|value| {
                value["header"]["response_topic"]
                    .as_str()
                    .map(str::to_string)
            });
        self.events.lock().unwrap().push(BrokerEvent::Publish {
            channel: channel.to_string(),
            response_topic,
        });
        self.inner.publish(channel, payload).await
    }

    async fn subscribe(&self, channel: &str) -> Result<Box<dyn Subscription>, BrokerError> {
        self.events.lock().unwrap().push(BrokerEvent::Subscribe {
            channel: channel.to_string(),
        });
        let inner = self.inner.subscribe(channel).await?;
        Ok(Box::new(RecordingSubscription {
            inner,
            channel: channel.to_string(),
            events: Arc::clone(&self.events),
        }))
    }
}

struct RecordingSubscription {
    inner: Box<dyn Subscription>,
    channel: String,
    events: Arc<Mutex<Vec<BrokerEvent>>>,
}

#[async_trait]
impl Subscription for RecordingSubscription {
    async fn ready(&mut self) -> Result<(), BrokerError> {
        self.inner.ready().await?;
        self.events.lock().unwrap().push(BrokerEvent::Ready {
            channel: self.channel.clone(),
        });
        Ok(())
    }

    async fn next_message(&mut self) -> Result<Option<BrokerMessage>, BrokerError> {
        self.inner.next_message().await
    }

    async fn close(&mut self) -> Result<(), BrokerError> {
        self.events.lock().unwrap().push(BrokerEvent::Close {
            channel: self.channel.clone(),
        });
        self.inner.close().await
    }
}
