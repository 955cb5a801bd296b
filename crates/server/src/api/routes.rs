use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use super::{bulk_move, cleanup, handlers, ignore, jobs, middleware::metrics_middleware, records};
use crate::state::AppState;

pub fn create_router(state: Arc<AppState>) -> Router {
    // API routes
    let api_routes = Router::new()
        // Health and config
        .route("/health", get(handlers::health))
        .route("/config", get(handlers::get_config))
        // Tracked records
        .route("/records", get(records::list_records))
        .route(
            "/records/{hash}",
            get(records::get_record).delete(records::forget_record),
        )
        .route("/records/{hash}/retry", post(records::retry_record))
        // Ignore set
        .route("/ignored", get(ignore::list_ignored))
        .route(
            "/ignored/{hash}",
            post(ignore::add_ignored).delete(ignore::remove_ignored),
        )
        // Manual delete-and-prune
        .route("/cleanup", post(cleanup::manual_cleanup))
        // Bulk moves
        .route(
            "/bulk-move",
            post(bulk_move::start_bulk_move).get(bulk_move::bulk_move_status),
        )
        // Periodic jobs
        .route("/jobs", get(jobs::list_jobs))
        .route("/jobs/{name}/run", post(jobs::run_job))
        .route("/eviction/summary", get(jobs::eviction_summary));

    Router::new()
        .nest("/api/v1", api_routes)
        .route("/metrics", get(handlers::metrics))
        .layer(middleware::from_fn(metrics_middleware))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
