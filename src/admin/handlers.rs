//! Admin API handlers.

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::audit::{stats, Period};

use super::AdminState;

const DEFAULT_LOG_LIMIT: usize = 1000;
const DEFAULT_STATS_WINDOW: usize = 10;

#[derive(Serialize)]
pub struct SystemStatus {
    pub version: &'static str,
    pub status: &'static str,
    pub audit_enabled: bool,
}

pub async fn get_status(State(state): State<AdminState>) -> Json<SystemStatus> {
    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION"),
        status: "operational",
        audit_enabled: state.store.is_some(),
    })
}

#[derive(Deserialize)]
pub struct LogsQuery {
    pub limit: Option<usize>,
    pub request_id: Option<String>,
}

pub async fn get_logs(
    State(state): State<AdminState>,
    Query(query): Query<LogsQuery>,
) -> Response {
    let Some(store) = state.store else {
        return (StatusCode::NOT_FOUND, "Audit log not enabled").into_response();
    };

    if let Some(request_id) = query.request_id {
        return Json(store.by_request_id(&request_id)).into_response();
    }

    let limit = match query.limit {
        Some(limit) if limit > 0 && limit <= store.max_entries() => limit,
        _ => DEFAULT_LOG_LIMIT.min(store.max_entries()),
    };
    Json(store.recent(limit)).into_response()
}

#[derive(Deserialize)]
pub struct StatsQuery {
    pub period: Option<String>,
    pub window_size: Option<usize>,
}

pub async fn get_stats(
    State(state): State<AdminState>,
    Query(query): Query<StatsQuery>,
) -> Response {
    let Some(store) = state.store else {
        return (StatusCode::NOT_FOUND, "Audit log not enabled").into_response();
    };

    let period = Period::parse(query.period.as_deref().unwrap_or("hour"));
    let window_size = match query.window_size {
        Some(window) if window > 0 => window,
        _ => DEFAULT_STATS_WINDOW,
    };

    let entries = store.snapshot();
    Json(stats::compute(&entries, period, window_size)).into_response()
}
