//! Types for torrent daemon operations.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur during torrent client operations.
#[derive(Debug, Error)]
pub enum TorrentClientError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Torrent not found: {0}")]
    TorrentNotFound(String),

    #[error("API error: {0}")]
    ApiError(String),

    #[error("Request timeout")]
    Timeout,

    #[error("Internal error: {0}")]
    Internal(String),
}

/// State of a torrent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TorrentState {
    /// Downloading from peers.
    Downloading,
    /// Seeding to peers.
    Seeding,
    /// Download or upload is paused.
    Paused,
    /// Checking file integrity or moving data.
    Checking,
    /// Queued for download.
    Queued,
    /// Stalled (no peers).
    Stalled,
    /// Error state.
    Error,
    /// Unknown state.
    Unknown,
}

impl TorrentState {
    /// Returns the string representation for API responses.
    pub fn as_str(&self) -> &'static str {
        match self {
            TorrentState::Downloading => "downloading",
            TorrentState::Seeding => "seeding",
            TorrentState::Paused => "paused",
            TorrentState::Checking => "checking",
            TorrentState::Queued => "queued",
            TorrentState::Stalled => "stalled",
            TorrentState::Error => "error",
            TorrentState::Unknown => "unknown",
        }
    }
}

/// Information about a torrent on the seedbox.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TorrentInfo {
    /// Info hash (lowercase hex).
    pub hash: String,
    /// Torrent name.
    pub name: String,
    /// Current state.
    pub state: TorrentState,
    /// Download progress (0.0 - 1.0).
    pub progress: f64,
    /// Total size in bytes.
    pub size_bytes: u64,
    /// Ratio (uploaded/downloaded).
    pub ratio: f64,
    /// Time spent seeding, in seconds.
    pub seeding_time_secs: u64,
    /// When the torrent was added.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub added_at: Option<DateTime<Utc>>,
    /// When the torrent completed downloading.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// Base download directory.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub save_path: Option<String>,
    /// Absolute path of the torrent's content (file or top folder).
    /// Missing until the daemon has metadata.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_path: Option<String>,
    /// Category/label.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
}

impl TorrentInfo {
    pub fn is_complete(&self) -> bool {
        self.progress >= 1.0
    }

    /// Remote path of the content, if the daemon has reported one.
    pub fn remote_path(&self) -> Option<&str> {
        self.content_path
            .as_deref()
            .map(str::trim)
            .filter(|p| !p.is_empty())
    }
}

/// Filters for listing torrents.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TorrentFilters {
    /// Only torrents whose download has finished.
    #[serde(default)]
    pub completed_only: bool,
}

impl TorrentFilters {
    pub fn completed() -> Self {
        Self {
            completed_only: true,
        }
    }

    /// Check if any filters are set.
    pub fn is_empty(&self) -> bool {
        !self.completed_only
    }
}

/// Trait for torrent daemon backends.
#[async_trait]
pub trait TorrentClient: Send + Sync {
    /// Backend name for logging.
    fn name(&self) -> &str;

    /// List all torrents, optionally filtered.
    async fn list_torrents(
        &self,
        filters: &TorrentFilters,
    ) -> Result<Vec<TorrentInfo>, TorrentClientError>;

    /// Get a specific torrent by hash.
    async fn get_torrent(&self, hash: &str) -> Result<TorrentInfo, TorrentClientError>;

    /// Remove a torrent.
    /// If `delete_files` is true, also delete downloaded files.
    async fn remove_torrent(
        &self,
        hash: &str,
        delete_files: bool,
    ) -> Result<(), TorrentClientError>;

    /// The daemon's default download directory.
    async fn default_save_path(&self) -> Result<String, TorrentClientError>;
}
