//! Bounded in-memory audit log.
//!
//! Events pass through a bounded queue into a worker task that folds
//! start/outcome pairs into entries. The queue never blocks the bridge:
//! when it is full the event is dropped with a warning.

use std::collections::VecDeque;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;

use super::{AuditSink, OutcomeEvent, StartEvent};

const QUEUE_CAPACITY: usize = 100;

/// One request's audit record.
#[derive(Debug, Clone, Serialize)]
pub struct AuditEntry {
    pub request_id: String,
    pub method: String,
    pub path: String,
    pub channel: String,
    pub response_topic: String,
    pub request_preview: Option<String>,
    pub response_preview: Option<String>,
    pub status_code: Option<u16>,
    pub response_time_ms: Option<u64>,
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

enum AuditEvent {
    Start {
        event: StartEvent,
        timestamp: DateTime<Utc>,
    },
    Outcome(OutcomeEvent),
}

/// Queryable store behind the audit log.
pub struct AuditStore {
    entries: RwLock<VecDeque<AuditEntry>>,
    max_entries: usize,
}

impl AuditStore {
    fn new(max_entries: usize) -> Self {
        Self {
            entries: RwLock::new(VecDeque::new()),
            max_entries,
        }
    }

    fn apply(&self, event: AuditEvent) {
        let Ok(mut entries) = self.entries.write() else {
            return;
        };
        match event {
            AuditEvent::Start { event, timestamp } => {
                entries.push_back(AuditEntry {
                    request_id: event.request_id,
                    method: event.method,
                    path: event.path,
                    channel: event.outbound_channel,
                    response_topic: event.reply_channel,
                    request_preview: event.body_preview,
                    response_preview: None,
                    status_code: None,
                    response_time_ms: None,
                    error: None,
                    timestamp,
                });
            }
            AuditEvent::Outcome(event) => {
                let elapsed_ms = event.elapsed.as_millis() as u64;
                match entries.iter_mut().rev().find(|entry| {
                    entry.request_id == event.request_id && entry.response_time_ms.is_none()
                }) {
                    Some(entry) => {
                        entry.status_code = event.status_code;
                        entry.response_preview = event.response_preview;
                        entry.response_time_ms = Some(elapsed_ms);
                        entry.error = event.error;
                    }
                    None => {
                        // The start event was dropped; keep the outcome
                        // anyway so the record is not lost entirely.
                        entries.push_back(AuditEntry {
                            request_id: event.request_id,
                            method: String::new(),
                            path: String::new(),
                            channel: String::new(),
                            response_topic: String::new(),
                            request_preview: None,
                            response_preview: event.response_preview,
                            status_code: event.status_code,
                            response_time_ms: Some(elapsed_ms),
                            error: event.error,
                            timestamp: Utc::now(),
                        });
                    }
                }
            }
        }
        while entries.len() > self.max_entries {
            entries.pop_front();
        }
    }

    /// Latest entries, newest first.
    pub fn recent(&self, limit: usize) -> Vec<AuditEntry> {
        let Ok(entries) = self.entries.read() else {
            return Vec::new();
        };
        entries.iter().rev().take(limit).cloned().collect()
    }

    /// Look up one entry by request id.
    pub fn by_request_id(&self, request_id: &str) -> Option<AuditEntry> {
        let entries = self.entries.read().ok()?;
        entries
            .iter()
            .rev()
            .find(|entry| entry.request_id == request_id)
            .cloned()
    }

    /// All retained entries, oldest first.
    pub fn snapshot(&self) -> Vec<AuditEntry> {
        match self.entries.read() {
            Ok(entries) => entries.iter().cloned().collect(),
            Err(_) => Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|entries| entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn max_entries(&self) -> usize {
        self.max_entries
    }
}

/// Audit sink backed by the in-memory store.
///
/// Must be created inside a Tokio runtime; dropping every clone stops the
/// worker task.
#[derive(Clone)]
pub struct AuditLog {
    tx: mpsc::Sender<AuditEvent>,
    store: Arc<AuditStore>,
}

impl AuditLog {
    pub fn new(max_entries: usize) -> Self {
        let store = Arc::new(AuditStore::new(max_entries));
        let (tx, mut rx) = mpsc::channel(QUEUE_CAPACITY);

        let worker_store = Arc::clone(&store);
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                worker_store.apply(event);
            }
        });

        tracing::info!(max_entries, "audit log started");
        Self { tx, store }
    }

    pub fn store(&self) -> Arc<AuditStore> {
        Arc::clone(&self.store)
    }

    fn enqueue(&self, event: AuditEvent) {
        if let Err(err) = self.tx.try_send(event) {
            let request_id = match err {
                mpsc::error::TrySendError::Full(event)
                | mpsc::error::TrySendError::Closed(event) => match event {
                    AuditEvent::Start { event, .. } => event.request_id,
                    AuditEvent::Outcome(event) => event.request_id,
                },
            };
            tracing::warn!(request_id = %request_id, "audit queue full, dropping event");
        }
    }
}

impl AuditSink for AuditLog {
    fn log_start(&self, event: StartEvent) {
        self.enqueue(AuditEvent::Start {
            event,
            timestamp: Utc::now(),
        });
    }

    fn log_outcome(&self, event: OutcomeEvent) {
        self.enqueue(AuditEvent::Outcome(event));
    }
}
