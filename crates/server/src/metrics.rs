//! Prometheus metrics for observability.
//!
//! This module provides the server-side metrics:
//! - HTTP request metrics (latency, counts, in flight)
//! - Record counts by status and bulk move state (collected at scrape time)
//!
//! Core component metrics are registered here too.

use once_cell::sync::Lazy;
use prometheus::{
    self, Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGauge, IntGaugeVec, Opts,
    Registry, TextEncoder,
};
use regex_lite::Regex;
use tracing::warn;

use seedsync_core::TorrentStatus;

use crate::state::AppState;

/// Global metrics registry.
pub static REGISTRY: Lazy<Registry> = Lazy::new(|| {
    let registry = Registry::new();
    register_metrics(&registry);
    registry
});

// =============================================================================
// HTTP Request Metrics
// =============================================================================

/// HTTP request duration in seconds.
pub static HTTP_REQUEST_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "seedsync_http_request_duration_seconds",
            "HTTP request duration in seconds",
        )
        .buckets(vec![
            0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 60.0,
        ]),
        &["method", "path", "status"],
    )
    .unwrap()
});

/// HTTP requests total count.
pub static HTTP_REQUESTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("seedsync_http_requests_total", "Total HTTP requests"),
        &["method", "path", "status"],
    )
    .unwrap()
});

/// HTTP requests currently in flight.
pub static HTTP_REQUESTS_IN_FLIGHT: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "seedsync_http_requests_in_flight",
        "Number of HTTP requests currently being processed",
    )
    .unwrap()
});

// =============================================================================
// State Metrics (collected dynamically)
// =============================================================================

/// Tracked records by status.
pub static RECORDS_BY_STATUS: Lazy<IntGaugeVec> = Lazy::new(|| {
    IntGaugeVec::new(
        Opts::new("seedsync_records_by_status", "Tracked records by status"),
        &["status"],
    )
    .unwrap()
});

/// Ignored hashes.
pub static IGNORED_HASHES: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new("seedsync_ignored_hashes", "Hashes in the ignore set").unwrap()
});

/// Bulk move running state (1 = a batch is running).
pub static BULK_MOVE_RUNNING: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "seedsync_bulk_move_running",
        "Whether a bulk move batch is running (1) or not (0)",
    )
    .unwrap()
});

// =============================================================================
// Registration
// =============================================================================

fn register_metrics(registry: &Registry) {
    // HTTP
    registry
        .register(Box::new(HTTP_REQUEST_DURATION.clone()))
        .unwrap();
    registry
        .register(Box::new(HTTP_REQUESTS_TOTAL.clone()))
        .unwrap();
    registry
        .register(Box::new(HTTP_REQUESTS_IN_FLIGHT.clone()))
        .unwrap();

    // State
    registry
        .register(Box::new(RECORDS_BY_STATUS.clone()))
        .unwrap();
    registry.register(Box::new(IGNORED_HASHES.clone())).unwrap();
    registry
        .register(Box::new(BULK_MOVE_RUNNING.clone()))
        .unwrap();

    // Core metrics (jobs, staging, cleanup, bulk move, eviction)
    for metric in seedsync_core::metrics::all_metrics() {
        registry.register(metric).unwrap();
    }
}

/// Encode all metrics as Prometheus text format.
pub fn encode_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        warn!("Failed to encode metrics: {}", e);
    }
    String::from_utf8_lossy(&buffer).into_owned()
}

/// Refresh the gauges that mirror current state.
pub async fn collect_dynamic_metrics(state: &AppState) {
    match state.store().list_all() {
        Ok(records) => {
            for status in TorrentStatus::ALL {
                let count = records.iter().filter(|r| r.status == status).count();
                RECORDS_BY_STATUS
                    .with_label_values(&[status.as_str()])
                    .set(count as i64);
            }
        }
        Err(e) => warn!("Failed to read records for metrics: {}", e),
    }

    if let Ok(ignored) = state.store().ignored() {
        IGNORED_HASHES.set(ignored.len() as i64);
    }

    let running = state.bulk_move().is_running().await;
    BULK_MOVE_RUNNING.set(if running { 1 } else { 0 });
}

static HASH_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[0-9a-fA-F]{40}").unwrap());
static UUID_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}")
        .unwrap()
});

/// Normalize a path for metric labels (replace hashes and ids with placeholders).
///
/// Everything after `/records/` and `/ignored/` is a hash, whatever its length.
pub fn normalize_path(path: &str) -> String {
    for prefix in ["/api/v1/records/", "/api/v1/ignored/"] {
        if let Some(rest) = path.strip_prefix(prefix) {
            let tail = rest.split_once('/').map(|(_, tail)| tail);
            return match tail {
                Some(tail) => format!("{}{{hash}}/{}", prefix, tail),
                None => format!("{}{{hash}}", prefix),
            };
        }
    }

    let result = UUID_RE.replace_all(path, "{id}");
    HASH_RE.replace_all(&result, "{hash}").into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_path_record_hash() {
        assert_eq!(
            normalize_path("/api/v1/records/abc123/retry"),
            "/api/v1/records/{hash}/retry"
        );
        assert_eq!(
            normalize_path("/api/v1/ignored/a94a8fe5ccb19ba61c4c0873d391e987982fbbd3"),
            "/api/v1/ignored/{hash}"
        );
    }

    #[test]
    fn test_normalize_path_uuid() {
        let path = "/api/v1/bulk-move/550e8400-e29b-41d4-a716-446655440000";
        assert_eq!(normalize_path(path), "/api/v1/bulk-move/{id}");
    }

    #[test]
    fn test_normalize_path_no_ids() {
        assert_eq!(normalize_path("/api/v1/health"), "/api/v1/health");
        assert_eq!(normalize_path("/api/v1/jobs/scanner/run"), "/api/v1/jobs/scanner/run");
    }

    #[test]
    fn test_encode_metrics_returns_prometheus_format() {
        HTTP_REQUESTS_TOTAL
            .with_label_values(&["GET", "/test", "200"])
            .inc();
        RECORDS_BY_STATUS
            .with_label_values(&["pending_staging"])
            .set(0);
        seedsync_core::metrics::JOB_RUNS
            .with_label_values(&["scanner", "completed"])
            .inc();

        let output = encode_metrics();
        assert!(output.contains("# HELP"));
        assert!(output.contains("# TYPE"));
        assert!(output.contains("seedsync_http_requests_total"));
        assert!(output.contains("seedsync_records_by_status"));
        assert!(output.contains("seedsync_job_runs_total"));
    }
}
