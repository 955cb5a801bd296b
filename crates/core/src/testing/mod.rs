//! Testing utilities and mock implementations.
//!
//! This module provides mock implementations of all external service traits,
//! so the pipeline can be exercised end to end without a seedbox, a torrent
//! daemon or catalog services.
//!
//! # Example
//!
//! ```rust,ignore
//! use seedsync_core::testing::{fixtures, MockCatalog, MockRemote, MockTorrentClient};
//!
//! let torrents = MockTorrentClient::new();
//! let remote = MockRemote::new();
//! let sonarr = MockCatalog::new(AppType::Sonarr);
//!
//! remote.add_file("/seed/Show.S01E01/ep.mkv", b"video");
//! torrents.add_mock_torrent(fixtures::completed_torrent("abc", "Show.S01E01", "tv", Some("/seed/Show.S01E01"))).await;
//! ```

mod mock_catalog;
mod mock_remote;
mod mock_torrent_client;

pub use mock_catalog::{CatalogCall, MockCatalog, MockMediaServer};
pub use mock_remote::{df_output, MockRemote, MockRemoteSession};
pub use mock_torrent_client::{MockTorrentClient, RecordedRemoval};

/// Test fixtures and helper functions.
pub mod fixtures {
    use chrono::{Duration, Utc};

    use crate::library::{LibraryEntry, QueueItem};
    use crate::store::{AppType, RecordUpdate, TorrentStatus};
    use crate::torrent_client::{TorrentInfo, TorrentState};

    /// A finished, seeding torrent.
    pub fn completed_torrent(
        hash: &str,
        name: &str,
        label: &str,
        content_path: Option<&str>,
    ) -> TorrentInfo {
        TorrentInfo {
            hash: hash.to_string(),
            name: name.to_string(),
            state: TorrentState::Seeding,
            progress: 1.0,
            size_bytes: 1024 * 1024 * 700, // 700 MB
            ratio: 1.0,
            seeding_time_secs: 3600,
            added_at: Some(Utc::now() - Duration::days(1)),
            completed_at: Some(Utc::now() - Duration::hours(12)),
            save_path: Some("/mock/downloads".to_string()),
            content_path: content_path.map(str::to_string),
            category: Some(label.to_string()),
        }
    }

    /// A seeding torrent with the given age, ratio and seed time.
    pub fn seeding_torrent(hash: &str, age_days: i64, ratio: f64, seeding_days: u64) -> TorrentInfo {
        let mut info = completed_torrent(hash, &format!("Release {}", hash), "tv", None);
        info.added_at = Some(Utc::now() - Duration::days(age_days));
        info.ratio = ratio;
        info.seeding_time_secs = seeding_days * 24 * 3600;
        info
    }

    pub fn library_entry(id: i64, title: &str, year: Option<u32>, path: &str) -> LibraryEntry {
        let root = path
            .trim_end_matches('/')
            .rsplit_once('/')
            .map(|(root, _)| root.to_string());
        LibraryEntry {
            id,
            title: title.to_string(),
            year,
            path: path.to_string(),
            root_folder_path: root,
        }
    }

    pub fn queue_item(id: i64, hash: &str, title: &str) -> QueueItem {
        QueueItem {
            id,
            download_id: hash.to_uppercase(),
            title: title.to_string(),
            status: "completed".to_string(),
        }
    }

    /// Fields of a freshly scanned record.
    pub fn new_record(
        release_name: &str,
        app_type: AppType,
        target_id: i64,
        label: &str,
        remote_path: &str,
    ) -> RecordUpdate {
        let folder = remote_path
            .trim_end_matches('/')
            .rsplit('/')
            .next()
            .filter(|f| !f.is_empty())
            .unwrap_or(release_name);
        RecordUpdate {
            release_name: Some(release_name.to_string()),
            folder_name: Some(folder.to_string()),
            original_name: Some(release_name.to_string()),
            app_type: Some(app_type),
            target_id: Some(target_id),
            label: Some(label.to_string()),
            remote_path: Some(remote_path.to_string()),
            status: Some(TorrentStatus::PendingStaging),
            status_message: Some("discovered".to_string()),
        }
    }
}
