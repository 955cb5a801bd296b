//! Periodic job API handlers: schedule status, on-demand runs and the
//! last eviction summary.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde_json::Value;

use seedsync_core::{EvictionSummary, SchedulerStatus};

use super::handlers::{api_error, ApiError};
use crate::state::AppState;

/// GET /api/v1/jobs
pub async fn list_jobs(State(state): State<Arc<AppState>>) -> Json<SchedulerStatus> {
    Json(state.scheduler().status().await)
}

/// POST /api/v1/jobs/{name}/run
///
/// Run `scanner`, `staging` or `eviction` now and return its report. A run
/// already holding the job's lock answers 409.
pub async fn run_job(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let (skipped, report) = match name.as_str() {
        "scanner" => {
            let report = state.scanner().run().await;
            (report.skipped_locked, serde_json::to_value(report))
        }
        "staging" => {
            let report = state.staging().run().await;
            (report.skipped_locked, serde_json::to_value(report))
        }
        "eviction" => {
            let summary = state.eviction().run().await;
            (summary.skipped_locked, serde_json::to_value(summary))
        }
        _ => {
            return Err(api_error(
                StatusCode::NOT_FOUND,
                format!("unknown job: {}", name),
            ))
        }
    };

    if skipped {
        return Err(api_error(
            StatusCode::CONFLICT,
            format!("{} is already running", name),
        ));
    }
    report
        .map(Json)
        .map_err(|e| api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))
}

/// GET /api/v1/eviction/summary
pub async fn eviction_summary(
    State(state): State<Arc<AppState>>,
) -> Result<Json<EvictionSummary>, ApiError> {
    state
        .eviction()
        .last_summary()
        .map(Json)
        .ok_or_else(|| api_error(StatusCode::NOT_FOUND, "no eviction run recorded yet"))
}
