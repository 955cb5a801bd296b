//! Bulk move API handlers.

use std::sync::Arc;

use axum::{extract::State, http::StatusCode, Json};
use serde::{Deserialize, Serialize};

use seedsync_core::{BulkMoveError, MoveItem, MoveStatus};

use super::handlers::{api_error, ApiError};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct StartBulkMoveRequest {
    pub items: Vec<MoveItem>,
}

#[derive(Debug, Serialize)]
pub struct StartBulkMoveResponse {
    pub task_id: String,
    pub total: usize,
}

/// POST /api/v1/bulk-move
///
/// Start a batch. Returns as soon as the worker is spawned.
pub async fn start_bulk_move(
    State(state): State<Arc<AppState>>,
    Json(request): Json<StartBulkMoveRequest>,
) -> Result<(StatusCode, Json<StartBulkMoveResponse>), ApiError> {
    let total = request.items.len();
    match state.bulk_move().start(request.items).await {
        Ok(task_id) => Ok((
            StatusCode::ACCEPTED,
            Json(StartBulkMoveResponse { task_id, total }),
        )),
        Err(e @ BulkMoveError::Busy { .. }) => Err(api_error(StatusCode::CONFLICT, e.to_string())),
        Err(e) => Err(api_error(StatusCode::BAD_REQUEST, e.to_string())),
    }
}

/// GET /api/v1/bulk-move
///
/// Progress of the current or last batch. Completed moves are reported
/// once; failures on every poll.
pub async fn bulk_move_status(State(state): State<Arc<AppState>>) -> Json<MoveStatus> {
    Json(state.bulk_move().status().await)
}
