//! Mock torrent client for testing.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::torrent_client::{
    TorrentClient, TorrentClientError, TorrentFilters, TorrentInfo, TorrentState,
};

/// A recorded torrent removal for test assertions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedRemoval {
    pub hash: String,
    pub delete_files: bool,
}

/// Mock implementation of the TorrentClient trait.
///
/// Provides controllable behavior for testing:
/// - Pre-populate torrents and change their reported paths
/// - Track removals for assertions
/// - Simulate failures
///
/// # Example
///
/// ```rust,ignore
/// let client = MockTorrentClient::new();
/// client.add_mock_torrent(fixtures::completed_torrent("abc123", "Show.S01E01", "tv", None)).await;
///
/// // Daemon reports the content path on a later poll
/// client.set_content_path("abc123", Some("/seed/Show.S01E01")).await;
/// ```
#[derive(Debug)]
pub struct MockTorrentClient {
    /// Current torrents by hash.
    torrents: Arc<RwLock<HashMap<String, TorrentInfo>>>,
    /// Recorded remove_torrent calls.
    removed: Arc<RwLock<Vec<RecordedRemoval>>>,
    /// If set, the next operation will fail with this error.
    next_error: Arc<RwLock<Option<TorrentClientError>>>,
    /// Reported default save path; `None` simulates a daemon that won't say.
    default_save_path: Arc<RwLock<Option<String>>>,
}

impl Default for MockTorrentClient {
    fn default() -> Self {
        Self::new()
    }
}

impl MockTorrentClient {
    /// Create a new mock torrent client.
    pub fn new() -> Self {
        Self {
            torrents: Arc::new(RwLock::new(HashMap::new())),
            removed: Arc::new(RwLock::new(Vec::new())),
            next_error: Arc::new(RwLock::new(None)),
            default_save_path: Arc::new(RwLock::new(Some("/mock/downloads".to_string()))),
        }
    }

    /// Create a mock client with a custom save path.
    pub fn with_save_path(save_path: impl Into<String>) -> Self {
        Self {
            default_save_path: Arc::new(RwLock::new(Some(save_path.into()))),
            ..Self::new()
        }
    }

    /// Change (or clear) the default save path.
    pub async fn set_default_save_path(&self, path: Option<&str>) {
        *self.default_save_path.write().await = path.map(str::to_string);
    }

    /// Pre-populate a torrent.
    pub async fn add_mock_torrent(&self, info: TorrentInfo) {
        self.torrents.write().await.insert(info.hash.clone(), info);
    }

    /// Set the content path the daemon reports for a torrent.
    pub async fn set_content_path(&self, hash: &str, path: Option<&str>) {
        if let Some(torrent) = self.torrents.write().await.get_mut(hash) {
            torrent.content_path = path.map(str::to_string);
        }
    }

    /// Set the progress for a torrent (0.0 to 1.0).
    ///
    /// When progress reaches 1.0, the torrent state changes to Seeding.
    pub async fn set_progress(&self, hash: &str, progress: f64) {
        if let Some(torrent) = self.torrents.write().await.get_mut(hash) {
            torrent.progress = progress.clamp(0.0, 1.0);
            if torrent.progress >= 1.0 {
                torrent.state = TorrentState::Seeding;
                torrent.completed_at.get_or_insert_with(Utc::now);
            } else {
                torrent.state = TorrentState::Downloading;
            }
        }
    }

    /// Configure the next operation to fail with the given error.
    pub async fn set_next_error(&self, error: TorrentClientError) {
        *self.next_error.write().await = Some(error);
    }

    /// Clear any pending error.
    pub async fn clear_next_error(&self) {
        *self.next_error.write().await = None;
    }

    /// Get all recorded remove_torrent calls.
    pub async fn removed_torrents(&self) -> Vec<RecordedRemoval> {
        self.removed.read().await.clone()
    }

    /// Check if a torrent exists.
    pub async fn has_torrent(&self, hash: &str) -> bool {
        self.torrents.read().await.contains_key(hash)
    }

    /// Get the number of torrents.
    pub async fn torrent_count(&self) -> usize {
        self.torrents.read().await.len()
    }

    /// Take the next error if set.
    async fn take_error(&self) -> Option<TorrentClientError> {
        self.next_error.write().await.take()
    }
}

#[async_trait]
impl TorrentClient for MockTorrentClient {
    fn name(&self) -> &str {
        "mock"
    }

    async fn list_torrents(
        &self,
        filters: &TorrentFilters,
    ) -> Result<Vec<TorrentInfo>, TorrentClientError> {
        if let Some(err) = self.take_error().await {
            return Err(err);
        }

        let torrents = self.torrents.read().await;
        let mut result: Vec<TorrentInfo> = torrents
            .values()
            .filter(|t| !filters.completed_only || t.is_complete())
            .cloned()
            .collect();

        // Deterministic order for assertions
        result.sort_by(|a, b| a.hash.cmp(&b.hash));

        Ok(result)
    }

    async fn get_torrent(&self, hash: &str) -> Result<TorrentInfo, TorrentClientError> {
        if let Some(err) = self.take_error().await {
            return Err(err);
        }

        self.torrents
            .read()
            .await
            .get(hash)
            .cloned()
            .ok_or_else(|| TorrentClientError::TorrentNotFound(hash.to_string()))
    }

    async fn remove_torrent(
        &self,
        hash: &str,
        delete_files: bool,
    ) -> Result<(), TorrentClientError> {
        if let Some(err) = self.take_error().await {
            return Err(err);
        }

        if self.torrents.write().await.remove(hash).is_none() {
            return Err(TorrentClientError::TorrentNotFound(hash.to_string()));
        }
        self.removed.write().await.push(RecordedRemoval {
            hash: hash.to_string(),
            delete_files,
        });
        Ok(())
    }

    async fn default_save_path(&self) -> Result<String, TorrentClientError> {
        if let Some(err) = self.take_error().await {
            return Err(err);
        }

        self.default_save_path
            .read()
            .await
            .clone()
            .ok_or_else(|| TorrentClientError::ApiError("no default save path".to_string()))
    }
}
