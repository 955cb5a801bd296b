//! Manual cleanup API handler.

use std::path::PathBuf;
use std::sync::Arc;

use axum::{extract::State, http::StatusCode, Json};
use serde::Deserialize;

use seedsync_core::CleanupReport;

use super::handlers::{api_error, operator_error, ApiError};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct CleanupRequest {
    pub path: PathBuf,
}

/// POST /api/v1/cleanup
///
/// Delete a local path and prune the parents it leaves empty, within the
/// current library boundary.
pub async fn manual_cleanup(
    State(state): State<Arc<AppState>>,
    Json(request): Json<CleanupRequest>,
) -> Result<Json<CleanupReport>, ApiError> {
    if !request.path.is_absolute() {
        return Err(api_error(
            StatusCode::BAD_REQUEST,
            format!("path must be absolute: {}", request.path.display()),
        ));
    }

    state
        .operator()
        .manual_cleanup(&request.path)
        .await
        .map(Json)
        .map_err(operator_error)
}
