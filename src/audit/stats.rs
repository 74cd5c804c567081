//! Aggregate statistics over the audit log.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::Serialize;

use super::store::AuditEntry;

/// Reporting window for statistics queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Period {
    Hour,
    Day,
    Week,
    Month,
    All,
}

impl Period {
    /// Parse a period name; anything unrecognized falls back to the last
    /// hour.
    pub fn parse(text: &str) -> Self {
        match text {
            "hour" => Period::Hour,
            "day" => Period::Day,
            "week" => Period::Week,
            "month" => Period::Month,
            "all" => Period::All,
            _ => Period::Hour,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Period::Hour => "hour",
            Period::Day => "day",
            Period::Week => "week",
            Period::Month => "month",
            Period::All => "all",
        }
    }

    fn cutoff(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            Period::Hour => Some(now - ChronoDuration::hours(1)),
            Period::Day => Some(now - ChronoDuration::days(1)),
            Period::Week => Some(now - ChronoDuration::days(7)),
            Period::Month => Some(now - ChronoDuration::days(30)),
            Period::All => None,
        }
    }
}

/// Statistics about bridged requests.
#[derive(Debug, Serialize)]
pub struct RequestStats {
    pub timestamp: DateTime<Utc>,
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub timeout_requests: u64,
    pub average_response_time_ms: f64,
    pub min_response_time_ms: u64,
    pub max_response_time_ms: u64,
    pub requests_by_status_code: BTreeMap<u16, u64>,
    pub requests_by_channel: BTreeMap<String, u64>,
    pub period: String,
    pub window_size: usize,
}

/// Compute statistics over the given entries.
///
/// `window_size` bounds the per-channel breakdown to the busiest channels.
pub fn compute(entries: &[AuditEntry], period: Period, window_size: usize) -> RequestStats {
    let now = Utc::now();
    let cutoff = period.cutoff(now);

    let in_window: Vec<&AuditEntry> = entries
        .iter()
        .filter(|entry| cutoff.map(|cut| entry.timestamp >= cut).unwrap_or(true))
        .collect();

    let mut successful = 0u64;
    let mut failed = 0u64;
    let mut timeouts = 0u64;
    let mut by_status: BTreeMap<u16, u64> = BTreeMap::new();
    let mut by_channel: BTreeMap<String, u64> = BTreeMap::new();
    let mut latencies: Vec<u64> = Vec::new();

    for entry in &in_window {
        if let Some(status) = entry.status_code {
            *by_status.entry(status).or_insert(0) += 1;
            if (200..300).contains(&status) {
                successful += 1;
            }
            if status == 504 {
                timeouts += 1;
            }
        }
        let errored = entry.error.is_some();
        if entry.status_code.map(|status| status >= 400).unwrap_or(false) || errored {
            failed += 1;
        }
        if errored
            && entry.status_code != Some(504)
            && entry
                .error
                .as_deref()
                .map(|message| message.contains("timeout"))
                .unwrap_or(false)
        {
            timeouts += 1;
        }
        if !entry.channel.is_empty() {
            *by_channel.entry(entry.channel.clone()).or_insert(0) += 1;
        }
        if let Some(elapsed) = entry.response_time_ms {
            if elapsed > 0 {
                latencies.push(elapsed);
            }
        }
    }

    // Keep only the busiest channels.
    if by_channel.len() > window_size {
        let mut ranked: Vec<(String, u64)> = by_channel.into_iter().collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        ranked.truncate(window_size);
        by_channel = ranked.into_iter().collect();
    }

    let average = if latencies.is_empty() {
        0.0
    } else {
        latencies.iter().sum::<u64>() as f64 / latencies.len() as f64
    };

    RequestStats {
        timestamp: now,
        total_requests: in_window.len() as u64,
        successful_requests: successful,
        failed_requests: failed,
        timeout_requests: timeouts,
        average_response_time_ms: average,
        min_response_time_ms: latencies.iter().copied().min().unwrap_or(0),
        max_response_time_ms: latencies.iter().copied().max().unwrap_or(0),
        requests_by_status_code: by_status,
        requests_by_channel: by_channel,
        period: period.as_str().to_string(),
        window_size,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(channel: &str, status: Option<u16>, elapsed: Option<u64>, error: Option<&str>) -> AuditEntry {
        AuditEntry {
            request_id: uuid::Uuid::new_v4().to_string(),
            method: "POST".to_string(),
            path: format!("/{}", channel.replace(':', "/")),
            channel: channel.to_string(),
            response_topic: format!("{}:response:x", channel),
            request_preview: None,
            response_preview: None,
            status_code: status,
            response_time_ms: elapsed,
            error: error.map(str::to_string),
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn counts_success_failure_and_timeouts() {
        let entries = vec![
            entry("api:users", Some(200), Some(10), None),
            entry("api:users", Some(200), Some(30), None),
            entry("api:orders", Some(500), Some(5), Some("error publishing")),
            entry("api:orders", Some(504), Some(5000), Some("response timeout")),
        ];

        let stats = compute(&entries, Period::All, 10);
        assert_eq!(stats.total_requests, 4);
        assert_eq!(stats.successful_requests, 2);
        assert_eq!(stats.failed_requests, 2);
        assert_eq!(stats.timeout_requests, 1);
        assert_eq!(stats.requests_by_status_code[&200], 2);
        assert_eq!(stats.min_response_time_ms, 5);
        assert_eq!(stats.max_response_time_ms, 5000);
    }

    #[test]
    fn window_size_limits_channel_breakdown() {
        let entries = vec![
            entry("a", Some(200), Some(1), None),
            entry("a", Some(200), Some(1), None),
            entry("b", Some(200), Some(1), None),
            entry("c", Some(200), Some(1), None),
        ];

        let stats = compute(&entries, Period::All, 1);
        assert_eq!(stats.requests_by_channel.len(), 1);
        assert_eq!(stats.requests_by_channel["a"], 2);
    }

    #[test]
    fn old_entries_fall_outside_hour_window() {
        let mut stale = entry("api:users", Some(200), Some(10), None);
        stale.timestamp = Utc::now() - ChronoDuration::hours(2);
        let entries = vec![stale, entry("api:users", Some(200), Some(10), None)];

        let stats = compute(&entries, Period::Hour, 10);
        assert_eq!(stats.total_requests, 1);
    }

    #[test]
    fn unknown_period_defaults_to_hour() {
        assert_eq!(Period::parse("fortnight"), Period::Hour);
        assert_eq!(Period::parse("all"), Period::All);
    }

    #[test]
    fn empty_entries_yield_zeroes() {
        let stats = compute(&[], Period::Day, 10);
        assert_eq!(stats.total_requests, 0);
        assert_eq!(stats.average_response_time_ms, 0.0);
    }
}
