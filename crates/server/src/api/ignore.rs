//! Ignore set API handlers.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    Json,
};
use serde::Serialize;

use seedsync_core::store::normalize_hash;

use super::handlers::{operator_error, ApiError};
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct IgnoredListResponse {
    pub hashes: Vec<String>,
    pub count: usize,
}

#[derive(Debug, Serialize)]
pub struct IgnoreChangeResponse {
    pub hash: String,
    /// False when the set already had (or lacked) the hash.
    pub changed: bool,
}

/// GET /api/v1/ignored
pub async fn list_ignored(
    State(state): State<Arc<AppState>>,
) -> Result<Json<IgnoredListResponse>, ApiError> {
    let hashes = state.operator().ignored().map_err(operator_error)?;
    Ok(Json(IgnoredListResponse {
        count: hashes.len(),
        hashes,
    }))
}

/// POST /api/v1/ignored/{hash}
pub async fn add_ignored(
    State(state): State<Arc<AppState>>,
    Path(hash): Path<String>,
) -> Result<Json<IgnoreChangeResponse>, ApiError> {
    let changed = state.operator().ignore(&hash).map_err(operator_error)?;
    Ok(Json(IgnoreChangeResponse {
        hash: normalize_hash(&hash),
        changed,
    }))
}

/// DELETE /api/v1/ignored/{hash}
pub async fn remove_ignored(
    State(state): State<Arc<AppState>>,
    Path(hash): Path<String>,
) -> Result<Json<IgnoreChangeResponse>, ApiError> {
    let changed = state.operator().unignore(&hash).map_err(operator_error)?;
    Ok(Json(IgnoreChangeResponse {
        hash: normalize_hash(&hash),
        changed,
    }))
}
