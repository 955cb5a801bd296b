//! Tracked record API handlers.

use std::str::FromStr;
use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};

use seedsync_core::{TorrentRecord, TorrentStatus};

use super::handlers::{api_error, operator_error, store_error, ApiError};
use crate::state::AppState;

// ============================================================================
// Request/Response types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct RecordFilterParams {
    /// Comma-separated statuses, e.g. `pending_staging,in_staging`.
    #[serde(default)]
    pub status: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct RecordListResponse {
    pub records: Vec<TorrentRecord>,
    pub count: usize,
}

// ============================================================================
// Handlers
// ============================================================================

/// GET /api/v1/records
///
/// List tracked records, optionally filtered by status.
pub async fn list_records(
    State(state): State<Arc<AppState>>,
    Query(params): Query<RecordFilterParams>,
) -> Result<Json<RecordListResponse>, ApiError> {
    let statuses = match params.status.as_deref() {
        Some(raw) if !raw.trim().is_empty() => Some(parse_statuses(raw)?),
        _ => None,
    };

    let records = match statuses {
        Some(statuses) => state.store().list_by_status(&statuses),
        None => state.store().list_all(),
    }
    .map_err(store_error)?;

    Ok(Json(RecordListResponse {
        count: records.len(),
        records,
    }))
}

/// GET /api/v1/records/{hash}
pub async fn get_record(
    State(state): State<Arc<AppState>>,
    Path(hash): Path<String>,
) -> Result<Json<TorrentRecord>, ApiError> {
    match state.store().get(&hash).map_err(store_error)? {
        Some(record) => Ok(Json(record)),
        None => Err(api_error(
            StatusCode::NOT_FOUND,
            format!("record not found: {}", hash),
        )),
    }
}

/// POST /api/v1/records/{hash}/retry
///
/// Send a finished or failed record back to `pending_staging`.
pub async fn retry_record(
    State(state): State<Arc<AppState>>,
    Path(hash): Path<String>,
) -> Result<Json<TorrentRecord>, ApiError> {
    state
        .operator()
        .retry(&hash)
        .map(Json)
        .map_err(operator_error)
}

/// DELETE /api/v1/records/{hash}
///
/// Forget a record. Returns the removed record.
pub async fn forget_record(
    State(state): State<Arc<AppState>>,
    Path(hash): Path<String>,
) -> Result<Json<TorrentRecord>, ApiError> {
    state
        .operator()
        .forget(&hash)
        .map(Json)
        .map_err(operator_error)
}

fn parse_statuses(raw: &str) -> Result<Vec<TorrentStatus>, ApiError> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| TorrentStatus::from_str(s).map_err(|e| api_error(StatusCode::BAD_REQUEST, e)))
        .collect()
}
