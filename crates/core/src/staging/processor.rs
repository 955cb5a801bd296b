use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::cleanup::{CleanupBoundary, CleanupGuard};
use crate::config::LabelsConfig;
use crate::library::{Catalogs, LibraryCatalog, LibraryError};
use crate::metrics;
use crate::remote::{mirror, RemoteConnector, RemoteSession};
use crate::run_lock::{RunLockError, RunLocks};
use crate::store::{AppType, StateStore, TorrentRecord, TorrentStatus};

use super::import::{collect_video_files, copy_into_library};
use super::{Retryability, StagingConfig, StagingReport, StepError};

/// Run-lock name of the staging processor.
pub const STAGING_LOCK: &str = "staging";

pub struct StagingProcessor {
    store: Arc<dyn StateStore>,
    connector: Arc<dyn RemoteConnector>,
    catalogs: Catalogs,
    guard: CleanupGuard,
    labels: LabelsConfig,
    config: StagingConfig,
    locks: RunLocks,
}

impl StagingProcessor {
    pub fn new(
        store: Arc<dyn StateStore>,
        connector: Arc<dyn RemoteConnector>,
        catalogs: Catalogs,
        guard: CleanupGuard,
        labels: LabelsConfig,
        config: StagingConfig,
        locks: RunLocks,
    ) -> Self {
        Self {
            store,
            connector,
            catalogs,
            guard,
            labels,
            config,
            locks,
        }
    }

    /// Run one staging cycle. Never fails: problems are logged, stored on
    /// the records and counted in the report.
    pub async fn run(&self) -> StagingReport {
        let mut report = StagingReport::default();

        let _lock = match self.locks.acquire(STAGING_LOCK) {
            Ok(lock) => lock,
            Err(RunLockError::Busy { since, .. }) => {
                info!(?since, "Staging already running, skipping this cycle");
                report.skipped_locked = true;
                return report;
            }
            Err(e) => {
                error!(error = %e, "Failed to take staging run-lock");
                report.errors.push(e.to_string());
                return report;
            }
        };

        let records = match self
            .store
            .list_by_status(&[TorrentStatus::PendingStaging, TorrentStatus::InStaging])
        {
            Ok(records) => records,
            Err(e) => {
                error!(error = %e, "Failed to read records");
                report.errors.push(e.to_string());
                return report;
            }
        };

        let mut pending = Vec::new();
        let mut staged = Vec::new();
        for record in records {
            match self.store.ignore_contains(&record.hash) {
                Ok(true) => {
                    debug!(hash = %record.hash, "Ignored, skipping");
                    continue;
                }
                Ok(false) => {}
                Err(e) => {
                    warn!(hash = %record.hash, error = %e, "Failed to check ignore set");
                    report.errors.push(format!("{}: {}", record.hash, e));
                    continue;
                }
            }
            if record.status == TorrentStatus::InStaging {
                staged.push(record);
            } else if record.has_remote_path() {
                pending.push(record);
            } else {
                debug!(hash = %record.hash, "No remote path yet, waiting for the scanner");
                report.waiting_for_path += 1;
            }
        }

        if !pending.is_empty() {
            staged.extend(self.transfer_all(pending, &mut report).await);
        }

        if !staged.is_empty() {
            let boundary = self.staging_boundary().await;
            for record in staged {
                let outcome = self.import(&record, &boundary).await;
                self.apply(&record, outcome, &mut report);
            }
        }

        info!(
            transferred = report.transferred,
            completed_auto = report.completed_auto,
            completed_manual = report.completed_manual,
            held = report.held,
            failed = report.failed,
            "Staging cycle finished"
        );
        report
    }

    /// Transfer every pending record over one session. Returns the records
    /// that reached `in_staging`.
    async fn transfer_all(
        &self,
        pending: Vec<TorrentRecord>,
        report: &mut StagingReport,
    ) -> Vec<TorrentRecord> {
        let session = match self.connector.connect().await {
            Ok(session) => session,
            Err(e) => {
                error!(error = %e, "SFTP connect failed, failing {} pending records", pending.len());
                let message = format!("SFTP connection failed: {}", e);
                for record in &pending {
                    self.apply(
                        record,
                        Err(StepError::terminal(
                            TorrentStatus::ErrorSftpConnection,
                            message.clone(),
                        )),
                        report,
                    );
                }
                return Vec::new();
            }
        };

        let mut staged = Vec::new();
        for record in pending {
            let outcome = self.transfer(session.as_ref(), &record, report).await;
            match self.apply(&record, outcome, report) {
                Some(updated) if updated.status == TorrentStatus::InStaging => staged.push(updated),
                _ => {}
            }
        }
        staged
    }

    async fn transfer(
        &self,
        session: &dyn RemoteSession,
        record: &TorrentRecord,
        report: &mut StagingReport,
    ) -> Result<(TorrentStatus, String), StepError> {
        let local = self.local_path(record);
        info!(
            hash = %record.hash,
            "Transferring {} -> {}",
            record.remote_path,
            local.display()
        );

        match mirror(session, &record.remote_path, &local).await {
            Ok(stats) => {
                report.transferred += 1;
                report.bytes_transferred += stats.bytes;
                metrics::STAGING_BYTES.inc_by(stats.bytes);
                Ok((
                    TorrentStatus::InStaging,
                    format!("transferred {} files ({} bytes)", stats.files, stats.bytes),
                ))
            }
            Err(e) if e.is_not_found() => Err(StepError::terminal(
                TorrentStatus::ErrorMissingPath,
                format!("remote path not found: {}", record.remote_path),
            )),
            Err(e) => Err(StepError::transient(format!("transfer failed: {}", e))),
        }
    }

    async fn import(
        &self,
        record: &TorrentRecord,
        boundary: &CleanupBoundary,
    ) -> Result<(TorrentStatus, String), StepError> {
        let Some(catalog) = self.catalogs.for_app(record.app_type) else {
            return Err(StepError::terminal(
                TorrentStatus::ErrorManualImport,
                format!("no {} catalog configured", record.app_type),
            ));
        };
        let local = self.local_path(record);

        let queued = catalog
            .queue_for_hash(&record.hash)
            .await
            .map_err(|e| StepError::transient(format!("queue lookup failed: {}", e)))?;

        if !queued.is_empty() {
            let path = local.to_string_lossy();
            return match catalog.import_from_path(&path, &record.hash).await {
                Ok(()) => {
                    info!(hash = %record.hash, app = %record.app_type, "Handed to catalog import");
                    Ok((
                        TorrentStatus::CompletedAuto,
                        format!("{} import requested", record.app_type),
                    ))
                }
                Err(e) => Err(StepError::terminal(
                    TorrentStatus::ErrorAutoImport,
                    format!("import trigger failed: {}", e),
                )),
            };
        }

        self.manual_import(catalog.as_ref(), record, &local, boundary)
            .await
    }

    async fn manual_import(
        &self,
        catalog: &dyn LibraryCatalog,
        record: &TorrentRecord,
        local: &Path,
        boundary: &CleanupBoundary,
    ) -> Result<(TorrentStatus, String), StepError> {
        let entry = match catalog.get_entry(record.target_id).await {
            Ok(entry) => entry,
            Err(LibraryError::NotFound(what)) => {
                return Err(StepError::terminal(
                    TorrentStatus::ErrorManualImport,
                    format!("catalog entry not found: {}", what),
                ))
            }
            Err(e) => {
                return Err(StepError::transient(format!("catalog lookup failed: {}", e)))
            }
        };

        let manual_failure =
            |message: String| StepError::terminal(TorrentStatus::ErrorManualImport, message);

        let files = collect_video_files(local, &self.config, self.guard.config())
            .await
            .map_err(|e| manual_failure(e.to_string()))?;
        if files.is_empty() {
            return Err(manual_failure(format!(
                "no video files under {}",
                local.display()
            )));
        }

        let imported = copy_into_library(
            &files,
            Path::new(&entry.path),
            record.app_type == AppType::Sonarr,
            self.config.verify_checksums,
        )
        .await
        .map_err(|e| manual_failure(e.to_string()))?;
        metrics::FILES_IMPORTED.inc_by(imported.len() as u64);
        info!(
            hash = %record.hash,
            "Copied {} files into {}",
            imported.len(),
            entry.path
        );

        self.prune_staged(&imported.iter().map(|f| f.source.clone()).collect::<Vec<_>>(), local, boundary);

        let status = if self.labels.is_auto(&record.label) {
            TorrentStatus::CompletedAuto
        } else {
            TorrentStatus::CompletedManual
        };

        let mut message = format!("imported {} files into {}", imported.len(), entry.path);
        if let Err(e) = catalog.rescan(record.target_id).await {
            warn!(hash = %record.hash, error = %e, "Rescan request failed");
            message.push_str(&format!("; rescan failed: {}", e));
        }

        Ok((status, message))
    }

    /// Remove imported staged files, then prune what is left of the item.
    fn prune_staged(&self, imported: &[PathBuf], item: &Path, boundary: &CleanupBoundary) {
        if self.guard.is_dry_run() {
            info!("[dry-run] Would remove {} staged files", imported.len());
        } else {
            for file in imported {
                if let Err(e) = std::fs::remove_file(file) {
                    warn!("Failed to remove staged file {}: {}", file.display(), e);
                }
            }
        }

        let report = self.guard.cleanup(item, boundary);
        debug!(
            "Staging prune of {} stopped at {} ({})",
            item.display(),
            report.stopped_at.display(),
            report.stop_reason.as_str()
        );
    }

    /// Library roots plus the staging root itself, fetched fresh.
    async fn staging_boundary(&self) -> CleanupBoundary {
        let mut roots: Vec<PathBuf> = self
            .catalogs
            .library_roots()
            .await
            .into_iter()
            .map(PathBuf::from)
            .collect();
        roots.push(self.config.root.clone());
        CleanupBoundary::from_roots(roots)
    }

    fn local_path(&self, record: &TorrentRecord) -> PathBuf {
        self.config.root.join(&record.folder_name)
    }

    /// Persist a step outcome. Returns the updated record when it moved.
    fn apply(
        &self,
        record: &TorrentRecord,
        outcome: Result<(TorrentStatus, String), StepError>,
        report: &mut StagingReport,
    ) -> Option<TorrentRecord> {
        let (status, message) = match outcome {
            Ok(done) => done,
            Err(e) => match e.retryability() {
                Retryability::Hold => {
                    warn!(hash = %record.hash, error = %e, "Step failed, retrying next cycle");
                    report.held += 1;
                    report.errors.push(format!("{}: {}", record.hash, e));
                    return None;
                }
                Retryability::Terminal(status) => {
                    error!(hash = %record.hash, status = %status, error = %e, "Step failed");
                    report.failed += 1;
                    report.errors.push(format!("{}: {}", record.hash, e));
                    (status, e.to_string())
                }
            },
        };

        match self.store.set_status(&record.hash, status, &message) {
            Ok(updated) => {
                metrics::STAGING_TRANSITIONS
                    .with_label_values(&[status.as_str()])
                    .inc();
                match status {
                    TorrentStatus::CompletedAuto => report.completed_auto += 1,
                    TorrentStatus::CompletedManual => report.completed_manual += 1,
                    _ => {}
                }
                Some(updated)
            }
            Err(e) => {
                error!(hash = %record.hash, error = %e, "Failed to store status {}", status);
                report.errors.push(format!("{}: {}", record.hash, e));
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cleanup::CleanupConfig;
    use crate::store::JsonStateStore;
    use crate::testing::{fixtures, CatalogCall, MockCatalog, MockRemote};
    use std::time::Duration;
    use tempfile::TempDir;

    struct Harness {
        temp: TempDir,
        store: Arc<dyn StateStore>,
        remote: MockRemote,
        sonarr: MockCatalog,
        radarr: MockCatalog,
        locks: RunLocks,
    }

    impl Harness {
        fn new() -> Self {
            let temp = TempDir::new().unwrap();
            let store: Arc<dyn StateStore> = Arc::new(JsonStateStore::new(
                temp.path().join("state"),
                Duration::from_secs(2),
            ));
            let shows = temp.path().join("media/shows");
            let movies = temp.path().join("media/movies");
            std::fs::create_dir_all(shows.join("Severance")).unwrap();
            std::fs::create_dir_all(movies.join("Heat (1995)")).unwrap();

            let sonarr = MockCatalog::new(AppType::Sonarr);
            sonarr.add_root_folder(shows.to_str().unwrap());
            sonarr.add_entry(fixtures::library_entry(
                11,
                "Severance",
                Some(2022),
                shows.join("Severance").to_str().unwrap(),
            ));
            let radarr = MockCatalog::new(AppType::Radarr);
            radarr.add_root_folder(movies.to_str().unwrap());
            radarr.add_entry(fixtures::library_entry(
                22,
                "Heat",
                Some(1995),
                movies.join("Heat (1995)").to_str().unwrap(),
            ));

            let locks = RunLocks::new(temp.path().join("locks"), Duration::from_secs(3600));
            Self {
                temp,
                store,
                remote: MockRemote::new(),
                sonarr,
                radarr,
                locks,
            }
        }

        fn staging_root(&self) -> PathBuf {
            self.temp.path().join("staging")
        }

        fn processor(&self) -> StagingProcessor {
            StagingProcessor::new(
                Arc::clone(&self.store),
                Arc::new(self.remote.clone()),
                Catalogs::new(
                    Some(Arc::new(self.sonarr.clone())),
                    Some(Arc::new(self.radarr.clone())),
                ),
                CleanupGuard::new(CleanupConfig::default()),
                LabelsConfig::default(),
                StagingConfig::new(self.staging_root()),
                self.locks.clone(),
            )
        }

        fn status(&self, hash: &str) -> TorrentStatus {
            self.store.get(hash).unwrap().unwrap().status
        }
    }

    #[tokio::test]
    async fn test_transfer_then_manual_import() {
        let h = Harness::new();
        h.remote
            .add_file("/seed/Severance.S01E01/Severance.S01E01.mkv", b"video");
        h.remote.add_file("/seed/Severance.S01E01/info.nfo", b"nfo");
        h.store
            .upsert(
                "abc123",
                fixtures::new_record("Severance.S01E01", AppType::Sonarr, 11, "tv", "/seed/Severance.S01E01"),
            )
            .unwrap();

        let report = h.processor().run().await;
        assert_eq!(report.transferred, 1);
        assert_eq!(report.completed_manual, 1);
        assert_eq!(h.status("abc123"), TorrentStatus::CompletedManual);

        let imported = h
            .temp
            .path()
            .join("media/shows/Severance/Season 01/Severance.S01E01.mkv");
        assert_eq!(std::fs::read(imported).unwrap(), b"video");

        // Staged item only held an .nfo after the copy and is pruned; the
        // staging root survives.
        assert!(!h.staging_root().join("Severance.S01E01").exists());
        assert!(h.staging_root().exists());
        assert!(h.sonarr.calls().contains(&CatalogCall::Rescan(11)));
    }

    #[tokio::test]
    async fn test_transfer_only_when_import_holds() {
        let h = Harness::new();
        h.remote
            .add_file("/seed/Show.S01E01/Show.S01E01.mkv", b"video");
        h.store
            .upsert(
                "abc123",
                fixtures::new_record("Show.S01E01", AppType::Sonarr, 11, "tv", "/seed/Show.S01E01"),
            )
            .unwrap();
        h.sonarr.fail_calls_to("queue_for_hash", "unavailable");

        let report = h.processor().run().await;
        assert_eq!(report.held, 1);
        assert_eq!(h.status("abc123"), TorrentStatus::InStaging);
        assert!(h
            .staging_root()
            .join("Show.S01E01/Show.S01E01.mkv")
            .exists());
    }

    #[tokio::test]
    async fn test_queued_item_uses_catalog_import() {
        let h = Harness::new();
        h.remote.add_file("/seed/Heat.1995.mkv", b"movie");
        h.store
            .upsert(
                "def456",
                fixtures::new_record("Heat.1995", AppType::Radarr, 22, "radarr", "/seed/Heat.1995.mkv"),
            )
            .unwrap();
        h.radarr
            .add_queue_item(fixtures::queue_item(1, "def456", "Heat.1995"));

        let report = h.processor().run().await;
        assert_eq!(report.completed_auto, 1);
        assert_eq!(h.status("def456"), TorrentStatus::CompletedAuto);
        let expected_path = h.staging_root().join("Heat.1995.mkv");
        assert!(h.radarr.calls().contains(&CatalogCall::Import {
            path: expected_path.to_string_lossy().into_owned(),
            hash: "def456".to_string(),
        }));
        // Catalog imports copy from staging; the file stays.
        assert!(expected_path.exists());
    }

    #[tokio::test]
    async fn test_queued_import_failure_is_terminal() {
        let h = Harness::new();
        h.remote.add_file("/seed/Heat.1995.mkv", b"movie");
        h.store
            .upsert(
                "def456",
                fixtures::new_record("Heat.1995", AppType::Radarr, 22, "movies", "/seed/Heat.1995.mkv"),
            )
            .unwrap();
        h.radarr
            .add_queue_item(fixtures::queue_item(1, "def456", "Heat.1995"));
        h.radarr.fail_calls_to("import_from_path", "rejected");

        h.processor().run().await;
        let record = h.store.get("def456").unwrap().unwrap();
        assert_eq!(record.status, TorrentStatus::ErrorAutoImport);
        assert!(record.status_message.contains("rejected"));
    }

    #[tokio::test]
    async fn test_missing_remote_path_is_terminal() {
        let h = Harness::new();
        h.remote.add_dir("/seed");
        h.store
            .upsert(
                "abc",
                fixtures::new_record("Gone", AppType::Sonarr, 11, "tv", "/seed/Gone"),
            )
            .unwrap();

        let report = h.processor().run().await;
        assert_eq!(report.failed, 1);
        assert_eq!(h.status("abc"), TorrentStatus::ErrorMissingPath);
    }

    #[tokio::test]
    async fn test_missing_remote_path_skips_import_of_stale_staging() {
        let h = Harness::new();
        h.remote.add_dir("/seed");
        let stale = h.staging_root().join("Gone");
        std::fs::create_dir_all(&stale).unwrap();
        std::fs::write(stale.join("Gone.S01E01.mkv"), b"old").unwrap();
        h.store
            .upsert(
                "abc",
                fixtures::new_record("Gone", AppType::Sonarr, 11, "tv", "/seed/Gone"),
            )
            .unwrap();

        let report = h.processor().run().await;
        assert_eq!(report.failed, 1);
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.completed_manual, 0);
        assert_eq!(h.status("abc"), TorrentStatus::ErrorMissingPath);
        assert!(h.sonarr.calls().is_empty());
        assert!(stale.join("Gone.S01E01.mkv").exists());
        assert!(!h
            .temp
            .path()
            .join("media/shows/Severance/Season 01/Gone.S01E01.mkv")
            .exists());
    }

    #[tokio::test]
    async fn test_connect_failure_only_touches_pending() {
        let h = Harness::new();
        h.store
            .upsert(
                "pending",
                fixtures::new_record("A", AppType::Sonarr, 11, "tv", "/seed/A"),
            )
            .unwrap();
        h.store
            .upsert(
                "waiting",
                fixtures::new_record("B", AppType::Sonarr, 11, "tv", ""),
            )
            .unwrap();
        h.store
            .upsert(
                "staged",
                fixtures::new_record("C", AppType::Sonarr, 11, "tv", "/seed/C"),
            )
            .unwrap();
        h.store
            .set_status("staged", TorrentStatus::InStaging, "transferred")
            .unwrap();
        h.sonarr.fail_calls_to("queue_for_hash", "down");
        h.remote.fail_connect("refused");

        let report = h.processor().run().await;
        assert_eq!(h.status("pending"), TorrentStatus::ErrorSftpConnection);
        assert_eq!(h.status("waiting"), TorrentStatus::PendingStaging);
        assert_eq!(h.status("staged"), TorrentStatus::InStaging);
        assert_eq!(report.waiting_for_path, 1);
    }

    #[tokio::test]
    async fn test_no_connect_without_transferable_records() {
        let h = Harness::new();
        h.store
            .upsert(
                "waiting",
                fixtures::new_record("B", AppType::Sonarr, 11, "tv", ""),
            )
            .unwrap();

        h.processor().run().await;
        assert_eq!(h.remote.connect_count(), 0);
    }

    #[tokio::test]
    async fn test_manual_import_without_videos_fails() {
        let h = Harness::new();
        h.remote.add_file("/seed/Show.S01E01/readme.txt", b"hi");
        h.store
            .upsert(
                "abc",
                fixtures::new_record("Show.S01E01", AppType::Sonarr, 11, "tv", "/seed/Show.S01E01"),
            )
            .unwrap();

        h.processor().run().await;
        assert_eq!(h.status("abc"), TorrentStatus::ErrorManualImport);
        // No partial cleanup on failure
        assert!(h.staging_root().join("Show.S01E01/readme.txt").exists());
    }

    #[tokio::test]
    async fn test_auto_label_manual_import_completes_auto() {
        let h = Harness::new();
        h.remote.add_file("/seed/Heat.1995.mkv", b"movie");
        h.store
            .upsert(
                "def",
                fixtures::new_record("Heat.1995", AppType::Radarr, 22, "radarr", "/seed/Heat.1995.mkv"),
            )
            .unwrap();
        h.radarr.fail_calls_to("rescan", "busy");

        let report = h.processor().run().await;
        assert_eq!(report.completed_auto, 1);
        let record = h.store.get("def").unwrap().unwrap();
        assert_eq!(record.status, TorrentStatus::CompletedAuto);
        assert!(record.status_message.contains("rescan failed"));
        assert!(h
            .temp
            .path()
            .join("media/movies/Heat (1995)/Heat.1995.mkv")
            .exists());
        assert!(!h.staging_root().join("Heat.1995.mkv").exists());
    }

    #[tokio::test]
    async fn test_ignored_records_are_skipped() {
        let h = Harness::new();
        h.remote.add_file("/seed/A/a.mkv", b"a");
        h.store
            .upsert(
                "abc",
                fixtures::new_record("A", AppType::Sonarr, 11, "tv", "/seed/A"),
            )
            .unwrap();
        h.store.ignore_add("abc").unwrap();

        h.processor().run().await;
        assert_eq!(h.status("abc"), TorrentStatus::PendingStaging);
        assert_eq!(h.remote.connect_count(), 0);
    }

    #[tokio::test]
    async fn test_overlapping_cycle_is_noop() {
        let h = Harness::new();
        let _held = h.locks.acquire(STAGING_LOCK).unwrap();
        let report = h.processor().run().await;
        assert!(report.skipped_locked);
    }
}
