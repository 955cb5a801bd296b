use std::sync::Arc;

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
    Json,
};
use serde::Serialize;

use seedsync_core::cleanup::CleanupError;
use seedsync_core::{OperatorError, SanitizedConfig, StoreError};

use crate::metrics::{collect_dynamic_metrics, encode_metrics};
use crate::state::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// Error half of every fallible handler.
pub type ApiError = (StatusCode, Json<ErrorResponse>);

pub fn api_error(status: StatusCode, message: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: message.into(),
        }),
    )
}

pub fn store_error(e: StoreError) -> ApiError {
    let status = match &e {
        StoreError::NotFound(_) => StatusCode::NOT_FOUND,
        StoreError::LockTimeout { .. } => StatusCode::SERVICE_UNAVAILABLE,
        StoreError::InvalidTransition { .. } | StoreError::RemotePathRequired { .. } => {
            StatusCode::CONFLICT
        }
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    api_error(status, e.to_string())
}

pub fn operator_error(e: OperatorError) -> ApiError {
    match e {
        OperatorError::NotFound(_) => api_error(StatusCode::NOT_FOUND, e.to_string()),
        OperatorError::NotRetryable { .. } => api_error(StatusCode::CONFLICT, e.to_string()),
        OperatorError::Store(e) => store_error(e),
        OperatorError::Cleanup(e) => {
            let status = match &e {
                CleanupError::NotFound(_) => StatusCode::NOT_FOUND,
                CleanupError::LibraryRoot(_)
                | CleanupError::OutsideBoundary(_)
                | CleanupError::NoBoundary => StatusCode::FORBIDDEN,
                CleanupError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
            };
            api_error(status, e.to_string())
        }
    }
}

/// GET /api/v1/health
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// GET /api/v1/config
///
/// Current configuration with credentials redacted.
pub async fn get_config(State(state): State<Arc<AppState>>) -> Json<SanitizedConfig> {
    Json(state.sanitized_config())
}

/// GET /metrics
pub async fn metrics(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    collect_dynamic_metrics(&state).await;
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        encode_metrics(),
    )
}
