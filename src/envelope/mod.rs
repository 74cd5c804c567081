//! Envelope codec.
//!
//! # Responsibilities
//! - Build the outbound `{header, body}` envelope from request metadata
//! - Interpret worker replies into a response value
//!
//! Header and query values keep their multiplicity: a single value is a
//! JSON string, repeated values become a JSON array. Reserved keys (`path`,
//! `method`, `request_id`, `response_topic`) are written last so a client
//! header can never mask them.

use axum::http::HeaderMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// The message published to the broker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub header: Map<String, Value>,
    #[serde(default)]
    pub body: Value,
}

/// Errors from envelope construction.
#[derive(Debug, Error)]
pub enum EnvelopeError {
    #[error("error serializing envelope: {0}")]
    Serialize(String),
}

/// Request metadata folded into the envelope header.
pub struct RequestMeta<'a> {
    pub path: &'a str,
    pub method: &'a str,
    pub request_id: &'a str,
    pub reply_channel: &'a str,
    pub headers: &'a HeaderMap,
    pub query: Option<&'a str>,
}

/// A built envelope: the serialized bytes plus the parsed body for
/// previews and audit.
pub struct BuiltEnvelope {
    pub bytes: Vec<u8>,
    pub body: Value,
}

/// Build the outbound envelope for one request.
///
/// The body becomes JSON when it parses as JSON, the raw text otherwise,
/// and null when empty.
pub fn build(meta: &RequestMeta<'_>, body: &[u8]) -> Result<BuiltEnvelope, EnvelopeError> {
    let mut header = Map::new();

    for name in meta.headers.keys() {
        let values: Vec<String> = meta
            .headers
            .get_all(name)
            .iter()
            .map(|value| String::from_utf8_lossy(value.as_bytes()).into_owned())
            .collect();
        header.insert(name.as_str().to_string(), fold_values(values));
    }

    if let Some(query) = meta.query {
        for (key, values) in group_query(query) {
            header.insert(format!("query_{}", key), fold_values(values));
        }
    }

    header.insert("path".to_string(), Value::String(meta.path.to_string()));
    header.insert("method".to_string(), Value::String(meta.method.to_string()));
    header.insert(
        "request_id".to_string(),
        Value::String(meta.request_id.to_string()),
    );
    header.insert(
        "response_topic".to_string(),
        Value::String(meta.reply_channel.to_string()),
    );

    let body = parse_body(body);
    let envelope = Envelope { header, body };
    let bytes =
        serde_json::to_vec(&envelope).map_err(|err| EnvelopeError::Serialize(err.to_string()))?;

    Ok(BuiltEnvelope {
        bytes,
        body: envelope.body,
    })
}

/// Interpret a worker reply.
///
/// Precedence: a JSON object carrying a non-null `body` member yields that
/// member; any other valid JSON yields the whole value; everything else is
/// the raw payload as a string.
pub fn extract(payload: &[u8]) -> Value {
    if let Ok(value) = serde_json::from_slice::<Value>(payload) {
        if let Value::Object(map) = &value {
            if let Some(body) = map.get("body") {
                if !body.is_null() {
                    return body.clone();
                }
            }
        }
        return value;
    }
    Value::String(String::from_utf8_lossy(payload).into_owned())
}

fn parse_body(body: &[u8]) -> Value {
    if body.is_empty() {
        return Value::Null;
    }
    serde_json::from_slice(body)
        .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(body).into_owned()))
}

fn fold_values(mut values: Vec<String>) -> Value {
    if values.len() == 1 {
        Value::String(values.remove(0))
    } else {
        Value::Array(values.into_iter().map(Value::String).collect())
    }
}

fn group_query(query: &str) -> Vec<(String, Vec<String>)> {
    let mut grouped: Vec<(String, Vec<String>)> = Vec::new();
    for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
        match grouped.iter_mut().find(|(name, _)| *name == key) {
            Some((_, values)) => values.push(value.into_owned()),
            None => grouped.push((key.into_owned(), vec![value.into_owned()])),
        }
    }
    grouped
}
