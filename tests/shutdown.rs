//! Graceful shutdown behavior.

mod common;

use std::sync::Arc;
use std::time::{Duration, Instant};

use pubsub_bridge::broker::InMemoryBroker;
use pubsub_bridge::config::BridgeConfig;

#[tokio::test]
async fn shutdown_cancels_bridges_after_the_drain_window() {
    let broker = Arc::new(InMemoryBroker::new());
    let audit = Arc::new(common::RecordingAudit::default());

    let mut config = BridgeConfig::default();
    // Nothing will ever reply; the bridge would wait 30s on its own.
    config.response_timeout = Duration::from_secs(30);
    config.http.shutdown_timeout = Duration::from_secs(1);
    let sink: Arc<dyn pubsub_bridge::audit::AuditSink> = Arc::clone(&audit) as Arc<dyn pubsub_bridge::audit::AuditSink>;
    let bridge = common::spawn_bridge(config, broker, sink).await;

    let client = common::test_client();
    let url = bridge.url("/api/slow");
    let request = tokio::spawn(async move { client.post(url).body("{}").send().await });

    // Let the bridge get in flight, then signal shutdown.
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(bridge.engine.in_flight(), 1);
    let started = Instant::now();
    bridge.shutdown.trigger();

    let response = request.await.unwrap().expect("bridge dropped the request");
    let elapsed = started.elapsed();
    assert_eq!(response.status(), 504);
    assert!(
        elapsed >= Duration::from_millis(900),
        "canceled before the drain window: {:?}",
        elapsed
    );
    assert!(
        elapsed <= Duration::from_secs(5),
        "cancelation took too long: {:?}",
        elapsed
    );

    // The canceled bridge still recorded its outcome.
    let outcomes = audit.all_outcomes();
    assert_eq!(outcomes.len(), 1);
    assert_eq!(outcomes[0].status_code, Some(504));

    // And the server itself wound down.
    tokio::time::timeout(Duration::from_secs(5), bridge.server)
        .await
        .expect("server task did not stop")
        .unwrap();
}

#[tokio::test]
async fn shutdown_with_idle_server_is_immediate() {
    let broker = Arc::new(InMemoryBroker::new());
    common::spawn_echo_worker(Arc::clone(&broker), "api:users").await;

    let mut config = BridgeConfig::default();
    config.response_timeout = Duration::from_secs(5);
    config.http.shutdown_timeout = Duration::from_secs(30);
    let bridge = common::spawn_bridge(config, broker, Arc::new(pubsub_bridge::audit::NoopSink)).await;

    let response = common::test_client()
        .post(bridge.url("/api/users"))
        .body("{}")
        .send()
        .await
        .expect("bridge unreachable");
    assert_eq!(response.status(), 200);

    let started = Instant::now();
    bridge.shutdown.trigger();
    tokio::time::timeout(Duration::from_secs(5), bridge.server)
        .await
        .expect("server task did not stop")
        .unwrap();
    // No in-flight bridges, so the drain window is not consumed.
    assert!(started.elapsed() < Duration::from_secs(5));
}
