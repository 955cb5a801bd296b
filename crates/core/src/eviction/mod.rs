//! Seedbox disk space control.
//!
//! [`SeedboxSpaceController::run`] measures disk usage of the daemon's
//! download directory over SSH and removes torrents (with their data):
//!
//! - **Emergency** (usage at or above the threshold): oldest first, one at
//!   a time, re-measuring after each removal and stopping as soon as usage
//!   is back under the threshold.
//! - **Routine**: every torrent that has reached both the minimum ratio and
//!   the minimum seeding time, in one pass.
//!
//! Every run's summary is persisted for later inspection.

mod controller;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::remote::RemoteError;
use crate::store::StoreError;
use crate::torrent_client::TorrentClientError;

pub use controller::{parse_df_output, SeedboxSpaceController, EVICTION_LOCK};

/// Eviction configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvictionConfig {
    /// Used-space percentage that switches to emergency mode.
    #[serde(default = "default_emergency_threshold")]
    pub emergency_threshold_pct: f64,

    /// Routine mode: minimum share ratio.
    #[serde(default = "default_min_ratio")]
    pub min_ratio: f64,

    /// Routine mode: minimum seeding time in seconds (default: 14 days).
    #[serde(default = "default_min_seed_time")]
    pub min_seed_time_secs: u64,

    /// Log and count removals without performing them.
    #[serde(default)]
    pub dry_run: bool,

    /// Path measured when the daemon does not report its download directory.
    #[serde(default)]
    pub fallback_path: Option<String>,
}

fn default_emergency_threshold() -> f64 {
    90.0
}

fn default_min_ratio() -> f64 {
    2.0
}

fn default_min_seed_time() -> u64 {
    14 * 24 * 60 * 60
}

impl Default for EvictionConfig {
    fn default() -> Self {
        Self {
            emergency_threshold_pct: default_emergency_threshold(),
            min_ratio: default_min_ratio(),
            min_seed_time_secs: default_min_seed_time(),
            dry_run: false,
            fallback_path: None,
        }
    }
}

#[derive(Debug, Error)]
pub enum EvictionError {
    #[error("no monitored path: the daemon reported none and no fallback is configured")]
    NoMonitoredPath,

    #[error("remote error: {0}")]
    Remote(#[from] RemoteError),

    #[error("could not parse disk usage from: {0}")]
    UnparseableUsage(String),

    #[error("torrent client error: {0}")]
    TorrentClient(#[from] TorrentClientError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvictionMode {
    Routine,
    Emergency,
}

impl EvictionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            EvictionMode::Routine => "routine",
            EvictionMode::Emergency => "emergency",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvictionResult {
    Deleted,
    Simulated,
    Failed,
}

impl EvictionResult {
    pub fn as_str(&self) -> &'static str {
        match self {
            EvictionResult::Deleted => "deleted",
            EvictionResult::Simulated => "simulated",
            EvictionResult::Failed => "failed",
        }
    }
}

/// One torrent chosen for removal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvictedTorrent {
    pub hash: String,
    pub name: String,
    pub ratio: f64,
    pub seeding_time_secs: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub added_at: Option<DateTime<Utc>>,
    pub size_bytes: u64,
    pub result: EvictionResult,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Persisted result of one controller run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvictionSummary {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Another run held the lock; nothing was done and nothing persisted.
    #[serde(default)]
    pub skipped_locked: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<EvictionMode>,
    pub dry_run: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub monitored_path: Option<String>,
    pub threshold_pct: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage_before_pct: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage_after_pct: Option<f64>,
    #[serde(default)]
    pub evicted: Vec<EvictedTorrent>,
    #[serde(default)]
    pub errors: Vec<String>,
}

impl EvictionSummary {
    pub fn deleted_count(&self) -> usize {
        self.evicted
            .iter()
            .filter(|t| t.result == EvictionResult::Deleted)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config: EvictionConfig = toml::from_str("dry_run = true").unwrap();
        assert!(config.dry_run);
        assert_eq!(config.emergency_threshold_pct, 90.0);
        assert_eq!(config.min_ratio, 2.0);
        assert_eq!(config.min_seed_time_secs, 1_209_600);
        assert!(config.fallback_path.is_none());
    }

    #[test]
    fn test_mode_serialization() {
        assert_eq!(
            serde_json::to_string(&EvictionMode::Emergency).unwrap(),
            "\"emergency\""
        );
        assert_eq!(EvictionResult::Simulated.as_str(), "simulated");
    }
}
