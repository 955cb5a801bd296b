//! Actions an operator takes on tracked transfers.
//!
//! These are the only writes that bypass the forward-only status rule.

use std::path::Path;
use std::sync::Arc;

use thiserror::Error;
use tracing::info;

use crate::cleanup::{CleanupBoundary, CleanupError, CleanupGuard, CleanupReport};
use crate::library::Catalogs;
use crate::store::{normalize_hash, StateStore, StoreError, TorrentRecord, TorrentStatus};

/// Status message stored on a record reset by [`Operator::retry`].
pub const RETRY_MESSAGE: &str = "reset by operator";

#[derive(Debug, Error)]
pub enum OperatorError {
    #[error("record not found: {0}")]
    NotFound(String),

    /// Only finished or failed records can be retried.
    #[error("record {hash} is {status} and still being processed")]
    NotRetryable { hash: String, status: TorrentStatus },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Cleanup(#[from] CleanupError),
}

pub struct Operator {
    store: Arc<dyn StateStore>,
    catalogs: Catalogs,
    guard: CleanupGuard,
}

impl Operator {
    pub fn new(store: Arc<dyn StateStore>, catalogs: Catalogs, guard: CleanupGuard) -> Self {
        Self {
            store,
            catalogs,
            guard,
        }
    }

    /// Send a failed or completed record back to `pending_staging`.
    pub fn retry(&self, hash: &str) -> Result<TorrentRecord, OperatorError> {
        let hash = normalize_hash(hash);
        let record = self
            .store
            .get(&hash)?
            .ok_or_else(|| OperatorError::NotFound(hash.clone()))?;

        if !record.status.is_terminal() {
            return Err(OperatorError::NotRetryable {
                hash,
                status: record.status,
            });
        }

        let record = self
            .store
            .reset_status(&hash, TorrentStatus::PendingStaging, RETRY_MESSAGE)?;
        info!(hash = %hash, "Record reset to pending_staging by operator");
        Ok(record)
    }

    /// Drop a record entirely. The next scan may rediscover the torrent.
    pub fn forget(&self, hash: &str) -> Result<TorrentRecord, OperatorError> {
        let hash = normalize_hash(hash);
        let removed = self
            .store
            .remove(&hash)?
            .ok_or_else(|| OperatorError::NotFound(hash.clone()))?;
        info!(hash = %hash, "Record forgotten by operator");
        Ok(removed)
    }

    /// Returns false if the hash was already ignored.
    pub fn ignore(&self, hash: &str) -> Result<bool, OperatorError> {
        let added = self.store.ignore_add(hash)?;
        if added {
            info!(hash = %normalize_hash(hash), "Hash added to ignore set");
        }
        Ok(added)
    }

    /// Returns false if the hash was not ignored.
    pub fn unignore(&self, hash: &str) -> Result<bool, OperatorError> {
        let removed = self.store.ignore_remove(hash)?;
        if removed {
            info!(hash = %normalize_hash(hash), "Hash removed from ignore set");
        }
        Ok(removed)
    }

    pub fn ignored(&self) -> Result<Vec<String>, OperatorError> {
        Ok(self.store.ignored()?)
    }

    /// Delete `path` and prune emptied parents.
    ///
    /// The boundary comes from the catalogs' root folders as they are
    /// right now.
    pub async fn manual_cleanup(&self, path: &Path) -> Result<CleanupReport, OperatorError> {
        let roots = self.catalogs.library_roots().await;
        let boundary = CleanupBoundary::from_roots(&roots);
        let report = self.guard.remove_path_and_prune(path, &boundary)?;
        info!(
            path = %path.display(),
            deleted = report.deleted.len(),
            dry_run = report.dry_run,
            "Manual cleanup finished"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cleanup::CleanupConfig;
    use crate::store::{AppType, JsonStateStore};
    use crate::testing::{fixtures, MockCatalog};
    use std::time::Duration;
    use tempfile::TempDir;

    fn operator(temp: &TempDir, catalogs: Catalogs) -> (Arc<dyn StateStore>, Operator) {
        let store: Arc<dyn StateStore> = Arc::new(JsonStateStore::new(
            temp.path().join("state"),
            Duration::from_secs(2),
        ));
        let op = Operator::new(
            store.clone(),
            catalogs,
            CleanupGuard::new(CleanupConfig::default()),
        );
        (store, op)
    }

    fn seed(store: &Arc<dyn StateStore>, hash: &str, status: TorrentStatus) {
        store
            .upsert(
                hash,
                fixtures::new_record("Show.S01E01", AppType::Sonarr, 1, "tv", "/seed/Show.S01E01"),
            )
            .unwrap();
        if status != TorrentStatus::PendingStaging {
            store.reset_status(hash, status, "seeded").unwrap();
        }
    }

    #[test]
    fn test_retry_resets_error_record() {
        let temp = TempDir::new().unwrap();
        let (store, op) = operator(&temp, Catalogs::default());
        seed(&store, "abc123", TorrentStatus::ErrorSftpConnection);

        let record = op.retry("ABC123").unwrap();
        assert_eq!(record.status, TorrentStatus::PendingStaging);
        assert_eq!(record.status_message, RETRY_MESSAGE);
        assert_eq!(record.remote_path, "/seed/Show.S01E01");
    }

    #[test]
    fn test_retry_refuses_in_flight_record() {
        let temp = TempDir::new().unwrap();
        let (store, op) = operator(&temp, Catalogs::default());
        seed(&store, "abc123", TorrentStatus::InStaging);

        let err = op.retry("abc123").unwrap_err();
        assert!(matches!(
            err,
            OperatorError::NotRetryable {
                status: TorrentStatus::InStaging,
                ..
            }
        ));
        assert!(matches!(op.retry("missing"), Err(OperatorError::NotFound(_))));
    }

    #[test]
    fn test_forget_and_ignore() {
        let temp = TempDir::new().unwrap();
        let (store, op) = operator(&temp, Catalogs::default());
        seed(&store, "abc123", TorrentStatus::CompletedManual);

        let removed = op.forget("abc123").unwrap();
        assert_eq!(removed.hash, "abc123");
        assert!(store.get("abc123").unwrap().is_none());
        assert!(matches!(op.forget("abc123"), Err(OperatorError::NotFound(_))));

        assert!(op.ignore("DEF456").unwrap());
        assert!(!op.ignore("def456").unwrap());
        assert_eq!(op.ignored().unwrap(), vec!["def456".to_string()]);
        assert!(op.unignore("def456").unwrap());
        assert!(!op.unignore("def456").unwrap());
    }

    #[tokio::test]
    async fn test_manual_cleanup_uses_current_roots() {
        let temp = TempDir::new().unwrap();
        let shows = temp.path().join("media/shows");
        let leftover = shows.join("Old Show/Season 01");
        std::fs::create_dir_all(&leftover).unwrap();
        std::fs::write(leftover.join("old.nfo"), b"x").unwrap();

        let sonarr = MockCatalog::new(AppType::Sonarr);
        sonarr.add_root_folder(shows.to_str().unwrap());
        let catalogs = Catalogs::new(Some(Arc::new(sonarr)), None);
        let (_store, op) = operator(&temp, catalogs);

        let report = op.manual_cleanup(&leftover).await.unwrap();
        assert!(!report.dry_run);
        assert!(!leftover.exists());
        assert!(!shows.join("Old Show").exists());
        assert!(shows.exists());
    }

    #[tokio::test]
    async fn test_manual_cleanup_without_catalogs_is_refused() {
        let temp = TempDir::new().unwrap();
        let target = temp.path().join("anything");
        std::fs::create_dir_all(&target).unwrap();
        let (_store, op) = operator(&temp, Catalogs::default());

        let err = op.manual_cleanup(&target).await.unwrap_err();
        assert!(matches!(err, OperatorError::Cleanup(CleanupError::NoBoundary)));
        assert!(target.exists());
    }
}
