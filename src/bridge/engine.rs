//! Per-request bridge state machine.
//!
//! # Responsibilities
//! - Read and cap the request body
//! - Build the outbound envelope and resolve channels
//! - Subscribe to the reply channel and confirm readiness BEFORE publishing
//! - Race reply arrival against the response deadline and forced shutdown
//! - Record exactly one audit outcome and write exactly one HTTP response
//!
//! The subscribe-before-publish ordering is the load-bearing invariant: the
//! broker does not retain messages, so a worker may answer faster than a
//! late subscription could catch.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use http_body_util::{BodyExt, Limited};
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

use crate::audit::{preview_of, AuditSink, OutcomeEvent, StartEvent};
use crate::broker::{Broker, BrokerError, Subscription};
use crate::config::BridgeConfig;
use crate::envelope::{self, RequestMeta};
use crate::lifecycle::Shutdown;
use crate::observability::metrics::record_request;
use crate::routing;

/// The slice of configuration the engine needs per request.
#[derive(Debug, Clone)]
pub struct BridgeSettings {
    pub fixed_channel: Option<String>,
    pub respond_immediately_status: Option<StatusCode>,
    pub response_timeout: Duration,
    pub read_timeout: Duration,
    pub max_request_body_bytes: usize,
}

impl BridgeSettings {
    pub fn from_config(config: &BridgeConfig) -> Self {
        Self {
            fixed_channel: config.fixed_channel.clone(),
            respond_immediately_status: config
                .respond_immediately_status
                .and_then(|code| StatusCode::from_u16(code).ok()),
            response_timeout: config.response_timeout,
            read_timeout: config.http.read_timeout,
            max_request_body_bytes: config.http.max_request_body_bytes,
        }
    }
}

/// What the reply listener reported back, when it was not a reply.
#[derive(Debug)]
enum ListenerError {
    Timeout,
    Broker(BrokerError),
}

/// The bridge engine shared by all requests.
pub struct BridgeEngine {
    broker: Arc<dyn Broker>,
    audit: Arc<dyn AuditSink>,
    settings: BridgeSettings,
    force_cancel: Shutdown,
    in_flight: AtomicUsize,
}

impl BridgeEngine {
    pub fn new(
        settings: BridgeSettings,
        broker: Arc<dyn Broker>,
        audit: Arc<dyn AuditSink>,
        force_cancel: Shutdown,
    ) -> Self {
        Self {
            broker,
            audit,
            settings,
            force_cancel,
            in_flight: AtomicUsize::new(0),
        }
    }

    /// Number of bridges currently in flight.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Relaxed)
    }

    /// Run one request through the bridge.
    pub async fn handle(&self, request: Request<Body>) -> Response {
        let _in_flight = InFlightGuard::enter(&self.in_flight);
        let start = Instant::now();
        let request_id = Uuid::new_v4().to_string();

        let (parts, body) = request.into_parts();
        let path = parts.uri.path().to_string();
        let method = parts.method.to_string();
        let query = parts.uri.query().map(str::to_string);

        let outbound_channel =
            routing::resolve_channel(self.settings.fixed_channel.as_deref(), &path);
        let reply_channel = routing::allocate_reply_channel(&outbound_channel);

        tracing::debug!(
            request_id = %request_id,
            method = %method,
            path = %path,
            channel = %outbound_channel,
            reply_channel = %reply_channel,
            "received request"
        );

        let audit = AuditGuard::arm(Arc::clone(&self.audit), request_id.clone(), start);
        let start_event = |body_preview: Option<String>| StartEvent {
            request_id: request_id.clone(),
            method: method.clone(),
            path: path.clone(),
            outbound_channel: outbound_channel.clone(),
            reply_channel: reply_channel.clone(),
            body_preview,
        };

        // BUILD: read the capped body, then fold it into the envelope.
        let body_bytes = match self.read_body(body).await {
            Ok(bytes) => bytes,
            Err((status, message)) => {
                self.audit.log_start(start_event(None));
                return self.respond_error(audit, status, message, None, &method, &outbound_channel);
            }
        };

        let meta = RequestMeta {
            path: &path,
            method: &method,
            request_id: &request_id,
            reply_channel: &reply_channel,
            headers: &parts.headers,
            query: query.as_deref(),
        };
        let built = match envelope::build(&meta, &body_bytes) {
            Ok(built) => built,
            Err(err) => {
                self.audit.log_start(start_event(None));
                return self.respond_error(
                    audit,
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Error creating message",
                    Some(err.to_string()),
                    &method,
                    &outbound_channel,
                );
            }
        };
        self.audit.log_start(start_event(preview_of(&built.body)));

        if let Some(status) = self.settings.respond_immediately_status {
            return self
                .publish_and_respond_immediately(
                    audit,
                    status,
                    &outbound_channel,
                    built.bytes,
                    &method,
                )
                .await;
        }

        self.bridge_sync(audit, &outbound_channel, &reply_channel, built.bytes, &method)
            .await
    }

    /// Fire-and-forget path: publish, answer with the configured status.
    async fn publish_and_respond_immediately(
        &self,
        audit: AuditGuard,
        status: StatusCode,
        outbound_channel: &str,
        envelope_bytes: Vec<u8>,
        method: &str,
    ) -> Response {
        if let Err(err) = self
            .broker
            .publish(outbound_channel, Bytes::from(envelope_bytes))
            .await
        {
            tracing::error!(channel = %outbound_channel, error = %err, "error publishing message");
            return self.respond_error(
                audit,
                StatusCode::INTERNAL_SERVER_ERROR,
                "Error publishing to broker",
                Some(err.to_string()),
                method,
                outbound_channel,
            );
        }

        tracing::debug!(channel = %outbound_channel, status = status.as_u16(), "responding immediately");
        let started = audit.start;
        audit.finish(status, None, None);
        record_request(method, status.as_u16(), outbound_channel, started);
        status.into_response()
    }

    /// Synchronous path: subscribe, confirm readiness, publish, await reply.
    async fn bridge_sync(
        &self,
        audit: AuditGuard,
        outbound_channel: &str,
        reply_channel: &str,
        envelope_bytes: Vec<u8>,
        method: &str,
    ) -> Response {
        let mut subscription = match self.broker.subscribe(reply_channel).await {
            Ok(subscription) => subscription,
            Err(err) => {
                tracing::error!(reply_channel = %reply_channel, error = %err, "error creating subscription");
                return self.respond_error(
                    audit,
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Error connecting to response channel",
                    Some(err.to_string()),
                    method,
                    outbound_channel,
                );
            }
        };

        if let Err(err) = subscription.ready().await {
            tracing::error!(reply_channel = %reply_channel, error = %err, "error establishing subscription");
            let _ = subscription.close().await;
            return self.respond_error(
                audit,
                StatusCode::INTERNAL_SERVER_ERROR,
                "Error connecting to response channel",
                Some(err.to_string()),
                method,
                outbound_channel,
            );
        }

        // The listener owns the subscription from here on and closes it on
        // every exit path, including cancellation.
        let (reply_tx, mut reply_rx) = mpsc::channel::<Bytes>(1);
        let (error_tx, mut error_rx) = mpsc::channel::<ListenerError>(1);
        let (cancel_tx, cancel_rx) = oneshot::channel::<()>();
        tokio::spawn(listen_for_reply(
            subscription,
            self.settings.response_timeout,
            reply_tx,
            error_tx,
            cancel_rx,
        ));

        // Publish strictly after the subscription is live and watched.
        if let Err(err) = self
            .broker
            .publish(outbound_channel, Bytes::from(envelope_bytes))
            .await
        {
            tracing::error!(channel = %outbound_channel, error = %err, "error publishing message");
            drop(cancel_tx);
            return self.respond_error(
                audit,
                StatusCode::INTERNAL_SERVER_ERROR,
                "Error publishing to broker",
                Some(err.to_string()),
                method,
                outbound_channel,
            );
        }

        tracing::debug!(
            reply_channel = %reply_channel,
            timeout_secs = self.settings.response_timeout.as_secs(),
            "waiting for response"
        );

        let mut force_cancel = self.force_cancel.subscribe();
        let response = tokio::select! {
            biased;
            Some(payload) = reply_rx.recv() => {
                self.respond_with_reply(audit, &payload, method, outbound_channel)
            }
            Some(error) = error_rx.recv() => match error {
                ListenerError::Timeout => {
                    tracing::error!(
                        reply_channel = %reply_channel,
                        timeout_secs = self.settings.response_timeout.as_secs(),
                        "response timeout"
                    );
                    self.respond_error(
                        audit,
                        StatusCode::GATEWAY_TIMEOUT,
                        "Response timeout",
                        None,
                        method,
                        outbound_channel,
                    )
                }
                ListenerError::Broker(err) => {
                    tracing::error!(reply_channel = %reply_channel, error = %err, "error receiving response");
                    self.respond_error(
                        audit,
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "Error receiving response",
                        Some(err.to_string()),
                        method,
                        outbound_channel,
                    )
                }
            },
            _ = force_cancel.recv() => {
                tracing::warn!(reply_channel = %reply_channel, "bridge canceled by shutdown");
                self.respond_error(
                    audit,
                    StatusCode::GATEWAY_TIMEOUT,
                    "Server shutting down",
                    None,
                    method,
                    outbound_channel,
                )
            }
            else => {
                self.respond_error(
                    audit,
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Error receiving response",
                    Some("reply listener exited unexpectedly".to_string()),
                    method,
                    outbound_channel,
                )
            }
        };
        drop(cancel_tx);
        response
    }

    /// RESPOND for a received reply: extract, marshal, 200.
    fn respond_with_reply(
        &self,
        audit: AuditGuard,
        payload: &[u8],
        method: &str,
        outbound_channel: &str,
    ) -> Response {
        let value = envelope::extract(payload);
        match serde_json::to_vec(&value) {
            Ok(body) => {
                let started = audit.start;
                audit.finish(StatusCode::OK, preview_of(&value), None);
                record_request(method, 200, outbound_channel, started);
                (
                    StatusCode::OK,
                    [(header::CONTENT_TYPE, "application/json")],
                    body,
                )
                    .into_response()
            }
            Err(err) => self.respond_error(
                audit,
                StatusCode::INTERNAL_SERVER_ERROR,
                "Error parsing response",
                Some(err.to_string()),
                method,
                outbound_channel,
            ),
        }
    }

    /// RESPOND for every failure outcome: short plain-text diagnostic.
    fn respond_error(
        &self,
        audit: AuditGuard,
        status: StatusCode,
        message: &'static str,
        detail: Option<String>,
        method: &str,
        outbound_channel: &str,
    ) -> Response {
        let error = match detail {
            Some(detail) => format!("{}: {}", message, detail),
            None => message.to_string(),
        };
        let started = audit.start;
        audit.finish(status, None, Some(error));
        record_request(method, status.as_u16(), outbound_channel, started);
        (status, message).into_response()
    }

    async fn read_body(&self, body: Body) -> Result<Bytes, (StatusCode, &'static str)> {
        let limited = Limited::new(body, self.settings.max_request_body_bytes);
        match tokio::time::timeout(self.settings.read_timeout, limited.collect()).await {
            Ok(Ok(collected)) => Ok(collected.to_bytes()),
            Ok(Err(err)) => {
                if err.downcast_ref::<http_body_util::LengthLimitError>().is_some() {
                    Err((StatusCode::PAYLOAD_TOO_LARGE, "Request body too large"))
                } else {
                    Err((StatusCode::BAD_REQUEST, "Error reading request body"))
                }
            }
            Err(_) => Err((StatusCode::BAD_REQUEST, "Error reading request body")),
        }
    }
}

/// Watch the subscription for the first reply, racing the deadline.
///
/// Whatever happens, the subscription is closed before the task exits.
/// Later replies on the channel are discarded by construction: only the
/// first is forwarded, then the subscription goes away.
async fn listen_for_reply(
    mut subscription: Box<dyn Subscription>,
    timeout: Duration,
    reply_tx: mpsc::Sender<Bytes>,
    error_tx: mpsc::Sender<ListenerError>,
    cancel_rx: oneshot::Receiver<()>,
) {
    tokio::select! {
        message = subscription.next_message() => match message {
            Ok(Some(message)) => {
                let _ = reply_tx.send(message.payload).await;
            }
            Ok(None) => {
                let _ = error_tx
                    .send(ListenerError::Broker(BrokerError::Unavailable(
                        "reply stream ended".to_string(),
                    )))
                    .await;
            }
            Err(err) => {
                let _ = error_tx.send(ListenerError::Broker(err)).await;
            }
        },
        _ = tokio::time::sleep(timeout) => {
            let _ = error_tx.send(ListenerError::Timeout).await;
        }
        _ = cancel_rx => {}
    }
    if let Err(err) = subscription.close().await {
        tracing::debug!(error = %err, "error closing reply subscription");
    }
}

/// Records the audit outcome exactly once per bridge.
///
/// If the bridge future is dropped before a terminal outcome (the client
/// went away), the drop records the outcome with a "client gone" marker.
struct AuditGuard {
    sink: Arc<dyn AuditSink>,
    request_id: String,
    start: Instant,
    done: bool,
}

impl AuditGuard {
    fn arm(sink: Arc<dyn AuditSink>, request_id: String, start: Instant) -> Self {
        Self {
            sink,
            request_id,
            start,
            done: false,
        }
    }

    fn finish(mut self, status: StatusCode, preview: Option<String>, error: Option<String>) {
        self.done = true;
        self.sink.log_outcome(OutcomeEvent {
            request_id: self.request_id.clone(),
            status_code: Some(status.as_u16()),
            response_preview: preview,
            elapsed: self.start.elapsed(),
            error,
        });
    }
}

impl Drop for AuditGuard {
    fn drop(&mut self) {
        if !self.done {
            self.sink.log_outcome(OutcomeEvent {
                request_id: self.request_id.clone(),
                status_code: None,
                response_preview: None,
                elapsed: self.start.elapsed(),
                error: Some("client gone".to_string()),
            });
        }
    }
}

struct InFlightGuard<'a> {
    counter: &'a AtomicUsize,
}

impl<'a> InFlightGuard<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::Relaxed);
        Self { counter }
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::Relaxed);
    }
}
