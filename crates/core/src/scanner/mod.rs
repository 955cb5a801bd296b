//! Discovery of finished torrents on the seedbox.
//!
//! Each run lists completed torrents, skips ignored hashes, backfills
//! remote paths the daemon had not reported yet, and seeds a
//! `pending_staging` record for every new arrival that resolves to a
//! catalog entry. Runs never overlap: a second run while one holds the
//! `scanner` run-lock returns immediately.

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::config::LabelsConfig;
use crate::library::matching::extract_external_id;
use crate::library::{Catalogs, LibraryCatalog, LibraryEntry, LibraryError};
use crate::metrics;
use crate::remote::remote_basename;
use crate::run_lock::{RunLockError, RunLocks};
use crate::store::{normalize_hash, RecordUpdate, StateStore, TorrentRecord, TorrentStatus};
use crate::torrent_client::{TorrentClient, TorrentFilters, TorrentInfo};

/// Run-lock name of the scanner.
pub const SCANNER_LOCK: &str = "scanner";

/// What one scanner run did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ScanReport {
    /// Another run held the lock; nothing was done.
    pub skipped_locked: bool,
    /// Completed torrents reported by the daemon.
    pub seen: usize,
    pub ignored: usize,
    pub new_records: usize,
    pub backfilled: usize,
    pub advanced: usize,
    /// New arrivals that matched no catalog entry this cycle.
    pub unresolved: usize,
    /// New arrivals whose label routes to no catalog.
    pub unlabelled: usize,
    pub errors: Vec<String>,
}

pub struct CompletionScanner {
    store: Arc<dyn StateStore>,
    torrents: Arc<dyn TorrentClient>,
    catalogs: Catalogs,
    labels: LabelsConfig,
    locks: RunLocks,
}

impl CompletionScanner {
    pub fn new(
        store: Arc<dyn StateStore>,
        torrents: Arc<dyn TorrentClient>,
        catalogs: Catalogs,
        labels: LabelsConfig,
        locks: RunLocks,
    ) -> Self {
        Self {
            store,
            torrents,
            catalogs,
            labels,
            locks,
        }
    }

    /// Run one scan. Never fails: problems are logged and counted.
    pub async fn run(&self) -> ScanReport {
        let mut report = ScanReport::default();

        let _lock = match self.locks.acquire(SCANNER_LOCK) {
            Ok(lock) => lock,
            Err(RunLockError::Busy { since, .. }) => {
                info!(?since, "Scanner already running, skipping this cycle");
                report.skipped_locked = true;
                return report;
            }
            Err(e) => {
                error!(error = %e, "Failed to take scanner run-lock");
                report.errors.push(e.to_string());
                return report;
            }
        };

        let completed = match self.torrents.list_torrents(&TorrentFilters::completed()).await {
            Ok(list) => list,
            Err(e) => {
                error!(
                    client = self.torrents.name(),
                    error = %e,
                    "Failed to list completed torrents"
                );
                report.errors.push(format!("list torrents: {}", e));
                return report;
            }
        };
        report.seen = completed.len();
        debug!("Scanner sees {} completed torrents", completed.len());

        for torrent in completed {
            let hash = normalize_hash(&torrent.hash);
            if let Err(e) = self.process(&hash, &torrent, &mut report).await {
                warn!(hash = %hash, error = %e, "Failed to process torrent");
                report.errors.push(format!("{}: {}", hash, e));
            }
        }

        info!(
            seen = report.seen,
            new = report.new_records,
            backfilled = report.backfilled,
            advanced = report.advanced,
            unresolved = report.unresolved,
            "Scan finished"
        );
        report
    }

    async fn process(
        &self,
        hash: &str,
        torrent: &TorrentInfo,
        report: &mut ScanReport,
    ) -> Result<(), crate::store::StoreError> {
        if self.store.ignore_contains(hash)? {
            debug!(hash = %hash, "Ignored, skipping");
            report.ignored += 1;
            metrics::SCANNER_TORRENTS.with_label_values(&["ignored"]).inc();
            return Ok(());
        }

        match self.store.get(hash)? {
            Some(record) => self.process_known(hash, torrent, record, report).await,
            None => self.process_new(hash, torrent, report).await,
        }
    }

    async fn process_known(
        &self,
        hash: &str,
        torrent: &TorrentInfo,
        mut record: TorrentRecord,
        report: &mut ScanReport,
    ) -> Result<(), crate::store::StoreError> {
        if !record.has_remote_path() {
            let Some(path) = self.reported_path(hash, torrent).await else {
                debug!(hash = %hash, "Remote path still unknown, retrying next cycle");
                return Ok(());
            };
            record = self
                .store
                .upsert(hash, RecordUpdate::default().with_remote_path(path.clone()))?;
            info!(hash = %hash, path = %path, "Backfilled remote path");
            report.backfilled += 1;
            metrics::SCANNER_TORRENTS
                .with_label_values(&["backfilled"])
                .inc();
        }

        if record.status == TorrentStatus::PendingDownload {
            self.store.set_status(
                hash,
                TorrentStatus::PendingStaging,
                "download complete on seedbox",
            )?;
            info!(hash = %hash, "Download complete, queued for staging");
            report.advanced += 1;
            metrics::SCANNER_TORRENTS.with_label_values(&["advanced"]).inc();
        }

        Ok(())
    }

    async fn process_new(
        &self,
        hash: &str,
        torrent: &TorrentInfo,
        report: &mut ScanReport,
    ) -> Result<(), crate::store::StoreError> {
        let label = torrent.category.as_deref().unwrap_or_default();
        let Some((app_type, _)) = self.labels.classify(label) else {
            debug!(hash = %hash, label = %label, "Label routes to no catalog");
            report.unlabelled += 1;
            return Ok(());
        };

        let Some(catalog) = self.catalogs.for_app(app_type) else {
            debug!(hash = %hash, app = %app_type, "No catalog configured");
            report.unlabelled += 1;
            return Ok(());
        };

        let entry = match resolve_entry(catalog.as_ref(), &torrent.name).await {
            Ok(Some(entry)) => entry,
            Ok(None) => {
                warn!(hash = %hash, name = %torrent.name, app = %app_type, "No catalog match");
                report.unresolved += 1;
                metrics::SCANNER_TORRENTS
                    .with_label_values(&["unresolved"])
                    .inc();
                return Ok(());
            }
            Err(e) => {
                warn!(hash = %hash, name = %torrent.name, error = %e, "Catalog lookup failed");
                report.unresolved += 1;
                metrics::SCANNER_TORRENTS
                    .with_label_values(&["unresolved"])
                    .inc();
                return Ok(());
            }
        };

        let remote_path = torrent.remote_path().unwrap_or_default().to_string();
        let folder_name = if remote_path.is_empty() {
            torrent.name.clone()
        } else {
            remote_basename(&remote_path).to_string()
        };
        let message = if remote_path.is_empty() {
            "discovered; waiting for remote path"
        } else {
            "discovered"
        };

        self.store.upsert(
            hash,
            RecordUpdate {
                release_name: Some(torrent.name.clone()),
                folder_name: Some(folder_name),
                original_name: Some(torrent.name.clone()),
                app_type: Some(app_type),
                target_id: Some(entry.id),
                label: Some(label.to_string()),
                remote_path: Some(remote_path),
                status: Some(TorrentStatus::PendingStaging),
                status_message: Some(message.to_string()),
            },
        )?;

        info!(
            hash = %hash,
            name = %torrent.name,
            app = %app_type,
            target = entry.id,
            "New arrival matched to {}",
            entry.title
        );
        report.new_records += 1;
        metrics::SCANNER_TORRENTS.with_label_values(&["new"]).inc();
        Ok(())
    }

    /// The path the daemon reports now, asking again if the listing had none.
    async fn reported_path(&self, hash: &str, torrent: &TorrentInfo) -> Option<String> {
        if let Some(path) = torrent.remote_path() {
            return Some(path.to_string());
        }
        match self.torrents.get_torrent(&torrent.hash).await {
            Ok(fresh) => fresh.remote_path().map(str::to_string),
            Err(e) => {
                debug!(hash = %hash, error = %e, "Could not refresh torrent details");
                None
            }
        }
    }
}

/// Catalog entry for a release: fuzzy title match first, then any
/// external id tagged in the name.
async fn resolve_entry(
    catalog: &dyn LibraryCatalog,
    release_name: &str,
) -> Result<Option<LibraryEntry>, LibraryError> {
    if let Some(entry) = catalog.resolve_by_name(release_name).await? {
        return Ok(Some(entry));
    }
    let Some(id) = extract_external_id(release_name) else {
        return Ok(None);
    };
    debug!(name = %release_name, id = ?id, "Falling back to external id lookup");
    catalog.find_by_external_id(&id).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::library::ExternalId;
    use crate::store::{AppType, JsonStateStore};
    use crate::testing::{fixtures, MockCatalog, MockTorrentClient};
    use std::time::Duration;
    use tempfile::TempDir;

    struct Harness {
        _temp: TempDir,
        store: Arc<dyn StateStore>,
        torrents: Arc<MockTorrentClient>,
        scanner: CompletionScanner,
        locks: RunLocks,
    }

    fn harness() -> Harness {
        let temp = TempDir::new().unwrap();
        let store: Arc<dyn StateStore> =
            Arc::new(JsonStateStore::new(temp.path(), Duration::from_secs(2)));
        let torrents = Arc::new(MockTorrentClient::new());

        let sonarr = MockCatalog::new(AppType::Sonarr);
        sonarr.add_entry(fixtures::library_entry(
            11,
            "Severance",
            Some(2022),
            "/media/shows/Severance",
        ));
        sonarr.add_external_id(ExternalId::Tvdb(371980), 11);
        let radarr = MockCatalog::new(AppType::Radarr);
        radarr.add_entry(fixtures::library_entry(
            22,
            "Heat",
            Some(1995),
            "/media/movies/Heat (1995)",
        ));
        let catalogs = Catalogs::new(Some(Arc::new(sonarr)), Some(Arc::new(radarr)));

        let locks = RunLocks::new(temp.path().join("locks"), Duration::from_secs(3600));
        let scanner = CompletionScanner::new(
            Arc::clone(&store),
            torrents.clone(),
            catalogs,
            LabelsConfig::default(),
            locks.clone(),
        );
        Harness {
            _temp: temp,
            store,
            torrents,
            scanner,
            locks,
        }
    }

    #[tokio::test]
    async fn test_new_arrival_creates_pending_record() {
        let h = harness();
        h.torrents
            .add_mock_torrent(fixtures::completed_torrent(
                "ABC123",
                "Severance.S02E01.1080p.WEB",
                "tv",
                Some("/seed/Severance.S02E01.1080p.WEB"),
            ))
            .await;

        let report = h.scanner.run().await;
        assert_eq!(report.new_records, 1);

        let record = h.store.get("abc123").unwrap().unwrap();
        assert_eq!(record.status, TorrentStatus::PendingStaging);
        assert_eq!(record.app_type, AppType::Sonarr);
        assert_eq!(record.target_id, 11);
        assert_eq!(record.folder_name, "Severance.S02E01.1080p.WEB");
        assert_eq!(record.remote_path, "/seed/Severance.S02E01.1080p.WEB");
    }

    #[tokio::test]
    async fn test_auto_label_routes_to_catalog() {
        let h = harness();
        h.torrents
            .add_mock_torrent(fixtures::completed_torrent(
                "def456",
                "Heat.1995.2160p.UHD",
                "radarr",
                Some("/seed/Heat.1995.2160p.UHD"),
            ))
            .await;

        h.scanner.run().await;
        let record = h.store.get("def456").unwrap().unwrap();
        assert_eq!(record.app_type, AppType::Radarr);
        assert_eq!(record.target_id, 22);
        assert_eq!(record.label, "radarr");
    }

    #[tokio::test]
    async fn test_empty_path_waits_then_backfills() {
        let h = harness();
        h.torrents
            .add_mock_torrent(fixtures::completed_torrent(
                "abc123",
                "Severance.S01E01",
                "tv",
                None,
            ))
            .await;

        h.scanner.run().await;
        let record = h.store.get("abc123").unwrap().unwrap();
        assert_eq!(record.status, TorrentStatus::PendingStaging);
        assert_eq!(record.remote_path, "");

        // Still no path: nothing changes, no error
        let report = h.scanner.run().await;
        assert!(report.errors.is_empty());
        assert_eq!(report.backfilled, 0);
        assert_eq!(h.store.get("abc123").unwrap().unwrap().remote_path, "");

        h.torrents
            .set_content_path("abc123", Some("/seed/Severance.S01E01"))
            .await;
        let report = h.scanner.run().await;
        assert_eq!(report.backfilled, 1);

        let record = h.store.get("abc123").unwrap().unwrap();
        assert_eq!(record.remote_path, "/seed/Severance.S01E01");
        assert_eq!(record.target_id, 11);
        assert_eq!(record.status, TorrentStatus::PendingStaging);
    }

    #[tokio::test]
    async fn test_ignored_and_unmatched_are_skipped() {
        let h = harness();
        h.torrents
            .add_mock_torrent(fixtures::completed_torrent(
                "aaa",
                "Severance.S01E02",
                "tv",
                Some("/seed/a"),
            ))
            .await;
        h.torrents
            .add_mock_torrent(fixtures::completed_torrent(
                "bbb",
                "Unknown.Show.S01E01",
                "tv",
                Some("/seed/b"),
            ))
            .await;
        h.torrents
            .add_mock_torrent(fixtures::completed_torrent(
                "ccc",
                "Some.Album.FLAC",
                "music",
                Some("/seed/c"),
            ))
            .await;
        h.store.ignore_add("aaa").unwrap();

        let report = h.scanner.run().await;
        assert_eq!(report.ignored, 1);
        assert_eq!(report.unresolved, 1);
        assert_eq!(report.unlabelled, 1);
        assert!(h.store.list_all().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_tagged_external_id_resolves_unmatched_name() {
        let h = harness();
        h.torrents
            .add_mock_torrent(fixtures::completed_torrent(
                "tagged",
                "Sev.2022.{tvdb-371980}.S01E04.1080p",
                "tv",
                Some("/seed/Sev.S01E04"),
            ))
            .await;
        h.torrents
            .add_mock_torrent(fixtures::completed_torrent(
                "unknown",
                "Sev.2022.{tvdb-999}.S01E05.1080p",
                "tv",
                Some("/seed/Sev.S01E05"),
            ))
            .await;

        let report = h.scanner.run().await;
        assert_eq!(report.new_records, 1);
        assert_eq!(report.unresolved, 1);

        let record = h.store.get("tagged").unwrap().unwrap();
        assert_eq!(record.target_id, 11);
        assert_eq!(record.app_type, AppType::Sonarr);
        assert!(h.store.get("unknown").unwrap().is_none());
    }

    #[tokio::test]
    async fn test_pending_download_is_advanced() {
        let h = harness();
        let mut update = fixtures::new_record("Severance.S01E03", AppType::Sonarr, 11, "tv", "/seed/s");
        update.status = Some(TorrentStatus::PendingDownload);
        h.store.upsert("abc", update).unwrap();
        h.torrents
            .add_mock_torrent(fixtures::completed_torrent(
                "abc",
                "Severance.S01E03",
                "tv",
                Some("/seed/s"),
            ))
            .await;

        let report = h.scanner.run().await;
        assert_eq!(report.advanced, 1);
        assert_eq!(
            h.store.get("abc").unwrap().unwrap().status,
            TorrentStatus::PendingStaging
        );
    }

    #[tokio::test]
    async fn test_overlapping_run_is_noop() {
        let h = harness();
        let _held = h.locks.acquire(SCANNER_LOCK).unwrap();
        h.torrents
            .add_mock_torrent(fixtures::completed_torrent(
                "abc",
                "Severance.S01E01",
                "tv",
                Some("/seed/s"),
            ))
            .await;

        let report = h.scanner.run().await;
        assert!(report.skipped_locked);
        assert!(h.store.get("abc").unwrap().is_none());
    }

    #[tokio::test]
    async fn test_list_failure_aborts_run() {
        let h = harness();
        h.torrents
            .set_next_error(crate::torrent_client::TorrentClientError::Timeout)
            .await;
        let report = h.scanner.run().await;
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.seen, 0);
    }
}
