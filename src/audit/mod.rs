//! Request/response audit.
//!
//! The bridge emits exactly one start event and one outcome event per
//! request through the [`AuditSink`] trait. Sinks must accept the event and
//! return quickly, or drop it; an audit failure never fails the request.

pub mod stats;
pub mod store;

use std::time::Duration;

pub use stats::{Period, RequestStats};
pub use store::{AuditEntry, AuditLog, AuditStore};

/// Emitted when a request enters the bridge and its channels are known.
#[derive(Debug, Clone)]
pub struct StartEvent {
    pub request_id: String,
    pub method: String,
    pub path: String,
    pub outbound_channel: String,
    pub reply_channel: String,
    pub body_preview: Option<String>,
}

/// Emitted when a request reaches its terminal outcome.
///
/// `status_code` is `None` when no response was written, e.g. when the
/// client went away before the bridge finished.
#[derive(Debug, Clone)]
pub struct OutcomeEvent {
    pub request_id: String,
    pub status_code: Option<u16>,
    pub response_preview: Option<String>,
    pub elapsed: Duration,
    pub error: Option<String>,
}

/// Observer for request lifecycles. Both calls are non-blocking.
pub trait AuditSink: Send + Sync {
    fn log_start(&self, event: StartEvent);
    fn log_outcome(&self, event: OutcomeEvent);
}

/// Sink that drops everything.
pub struct NoopSink;

impl AuditSink for NoopSink {
    fn log_start(&self, _event: StartEvent) {}
    fn log_outcome(&self, _event: OutcomeEvent) {}
}

const PREVIEW_BYTES: usize = 200;

/// Render a JSON value as a bounded preview string. Null yields none.
pub fn preview_of(value: &serde_json::Value) -> Option<String> {
    if value.is_null() {
        return None;
    }
    let text = value.to_string();
    Some(truncate_preview(&text))
}

/// Truncate long strings for logging, respecting char boundaries.
pub fn truncate_preview(text: &str) -> String {
    if text.len() <= PREVIEW_BYTES {
        return text.to_string();
    }
    let mut end = PREVIEW_BYTES;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &text[..end])
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn null_has_no_preview() {
        assert_eq!(preview_of(&serde_json::Value::Null), None);
    }

    #[test]
    fn short_values_pass_through() {
        assert_eq!(preview_of(&json!({"a": 1})).unwrap(), r#"{"a":1}"#);
    }

    #[test]
    fn long_values_are_truncated() {
        let long = "x".repeat(500);
        let preview = preview_of(&json!(long)).unwrap();
        assert!(preview.ends_with("..."));
        assert!(preview.len() <= PREVIEW_BYTES + 3);
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        let text = "é".repeat(300);
        let preview = truncate_preview(&text);
        assert!(preview.ends_with("..."));
    }
}
