//! Prometheus metrics for core components.
//!
//! This module provides metrics for:
//! - Periodic jobs (runs, overlaps, durations)
//! - Scanner, staging and cleanup
//! - Bulk moves and seedbox eviction

use once_cell::sync::Lazy;
use prometheus::{Gauge, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts};

// =============================================================================
// Jobs
// =============================================================================

/// Job runs by job and outcome.
pub static JOB_RUNS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("seedsync_job_runs_total", "Total periodic job runs"),
        &["job", "outcome"], // "completed", "skipped_locked", "failed"
    )
    .unwrap()
});

/// Job duration in seconds.
pub static JOB_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new("seedsync_job_duration_seconds", "Duration of periodic job runs")
            .buckets(vec![0.1, 0.5, 1.0, 5.0, 15.0, 60.0, 300.0, 900.0, 3600.0]),
        &["job"],
    )
    .unwrap()
});

// =============================================================================
// Scanner
// =============================================================================

/// Completed torrents seen by the scanner, by outcome.
pub static SCANNER_TORRENTS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "seedsync_scanner_torrents_total",
            "Completed torrents handled by the scanner",
        ),
        &["outcome"], // "new", "backfilled", "advanced", "unresolved", "ignored"
    )
    .unwrap()
});

// =============================================================================
// Staging
// =============================================================================

/// Record status transitions made by the staging processor.
pub static STAGING_TRANSITIONS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "seedsync_staging_transitions_total",
            "Record status transitions by target status",
        ),
        &["to_status"],
    )
    .unwrap()
});

/// Bytes pulled from the seedbox.
pub static STAGING_BYTES: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "seedsync_staging_bytes_total",
        "Bytes transferred from the seedbox into staging",
    )
    .unwrap()
});

/// Files copied into libraries by manual import.
pub static FILES_IMPORTED: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "seedsync_files_imported_total",
        "Files copied into library folders",
    )
    .unwrap()
});

// =============================================================================
// Cleanup
// =============================================================================

/// Directories deleted by cleanup, by mode.
pub static CLEANUP_DIRS_DELETED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "seedsync_cleanup_deleted_total",
            "Paths deleted (or simulated) by cleanup",
        ),
        &["mode"], // "real", "dry_run"
    )
    .unwrap()
});

/// Why cleanup walks stopped.
pub static CLEANUP_STOPS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("seedsync_cleanup_stops_total", "Cleanup walk stop reasons"),
        &["reason"],
    )
    .unwrap()
});

// =============================================================================
// Bulk moves
// =============================================================================

/// Bulk move items by result.
pub static BULK_MOVE_ITEMS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("seedsync_bulk_move_items_total", "Bulk move items processed"),
        &["result"], // "succeeded", "failed"
    )
    .unwrap()
});

/// Time from move command to source path disappearing.
pub static BULK_MOVE_ITEM_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "seedsync_bulk_move_item_duration_seconds",
            "Duration of a single confirmed move",
        )
        .buckets(vec![5.0, 15.0, 60.0, 300.0, 900.0, 1800.0, 3600.0, 7200.0]),
        &["result"],
    )
    .unwrap()
});

// =============================================================================
// Eviction
// =============================================================================

/// Torrent evictions by mode and result.
pub static EVICTIONS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("seedsync_evictions_total", "Seedbox torrent evictions"),
        &["mode", "result"], // mode: "routine", "emergency"; result: "deleted", "simulated", "failed"
    )
    .unwrap()
});

/// Last measured seedbox disk usage.
pub static SEEDBOX_DISK_USED: Lazy<Gauge> = Lazy::new(|| {
    Gauge::new(
        "seedsync_seedbox_disk_used_percent",
        "Seedbox disk usage at the last measurement",
    )
    .unwrap()
});

/// Get all core metrics for registration.
pub fn all_metrics() -> Vec<Box<dyn prometheus::core::Collector>> {
    vec![
        // Jobs
        Box::new(JOB_RUNS.clone()),
        Box::new(JOB_DURATION.clone()),
        // Scanner / staging
        Box::new(SCANNER_TORRENTS.clone()),
        Box::new(STAGING_TRANSITIONS.clone()),
        Box::new(STAGING_BYTES.clone()),
        Box::new(FILES_IMPORTED.clone()),
        // Cleanup
        Box::new(CLEANUP_DIRS_DELETED.clone()),
        Box::new(CLEANUP_STOPS.clone()),
        // Bulk moves
        Box::new(BULK_MOVE_ITEMS.clone()),
        Box::new(BULK_MOVE_ITEM_DURATION.clone()),
        // Eviction
        Box::new(EVICTIONS.clone()),
        Box::new(SEEDBOX_DISK_USED.clone()),
    ]
}
