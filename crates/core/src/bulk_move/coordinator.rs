//! Bulk move coordinator implementation.

use std::collections::VecDeque;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use futures::future::join_all;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::library::{moved_path, Catalogs, MediaServer};
use crate::metrics;

use super::types::{BatchState, BulkMoveError, CompletedMove, FailedMove, MoveItem, MoveStatus};
use super::BulkMoveConfig;

/// The batch currently (or last) handled.
struct Batch {
    task_id: String,
    total: usize,
    state: BatchState,
    processed: usize,
    succeeded: usize,
    /// Completions not yet returned by a status poll.
    feed: VecDeque<CompletedMove>,
    failures: Vec<FailedMove>,
    refreshed_sections: Vec<String>,
    started_at: DateTime<Utc>,
    finished_at: Option<DateTime<Utc>>,
}

/// Runs at most one batch of catalog moves at a time.
///
/// `start` returns as soon as the batch is accepted; a background task
/// moves the items one by one and callers follow progress with `status`.
pub struct BulkMoveCoordinator {
    catalogs: Catalogs,
    media_server: Option<Arc<dyn MediaServer>>,
    config: BulkMoveConfig,
    current: Arc<Mutex<Option<Batch>>>,
}

impl BulkMoveCoordinator {
    pub fn new(
        catalogs: Catalogs,
        media_server: Option<Arc<dyn MediaServer>>,
        config: BulkMoveConfig,
    ) -> Self {
        Self {
            catalogs,
            media_server,
            config,
            current: Arc::new(Mutex::new(None)),
        }
    }

    pub async fn is_running(&self) -> bool {
        self.current
            .lock()
            .await
            .as_ref()
            .is_some_and(|b| b.state == BatchState::Running)
    }

    /// Accept a batch and start moving it in the background.
    ///
    /// Fails with [`BulkMoveError::Busy`] while another batch runs; the
    /// running batch is not affected.
    pub async fn start(&self, items: Vec<MoveItem>) -> Result<String, BulkMoveError> {
        if items.is_empty() {
            return Err(BulkMoveError::Empty);
        }
        if let Some(missing) = items
            .iter()
            .find(|item| self.catalogs.for_app(item.app_type).is_none())
        {
            return Err(BulkMoveError::NoCatalog(missing.app_type));
        }

        let mut current = self.current.lock().await;
        if let Some(batch) = current.as_ref() {
            if batch.state == BatchState::Running {
                return Err(BulkMoveError::Busy {
                    task_id: batch.task_id.clone(),
                });
            }
        }

        let task_id = uuid::Uuid::new_v4().to_string();
        *current = Some(Batch {
            task_id: task_id.clone(),
            total: items.len(),
            state: BatchState::Running,
            processed: 0,
            succeeded: 0,
            feed: VecDeque::new(),
            failures: Vec::new(),
            refreshed_sections: Vec::new(),
            started_at: Utc::now(),
            finished_at: None,
        });
        drop(current);

        info!(task_id = %task_id, items = items.len(), "Bulk move accepted");
        self.spawn_worker(task_id.clone(), items);
        Ok(task_id)
    }

    /// Progress of the current batch. Completions are handed out once.
    pub async fn status(&self) -> MoveStatus {
        let mut current = self.current.lock().await;
        let Some(batch) = current.as_mut() else {
            return MoveStatus::default();
        };

        MoveStatus {
            task_id: Some(batch.task_id.clone()),
            state: Some(batch.state),
            running: batch.state == BatchState::Running,
            total: batch.total,
            processed: batch.processed,
            succeeded: batch.succeeded,
            failed: batch.failures.len(),
            completed: batch.feed.drain(..).collect(),
            failures: batch.failures.clone(),
            refreshed_sections: batch.refreshed_sections.clone(),
            started_at: Some(batch.started_at),
            finished_at: batch.finished_at,
        }
    }

    fn spawn_worker(&self, task_id: String, items: Vec<MoveItem>) {
        let worker = Worker {
            catalogs: self.catalogs.clone(),
            media_server: self.media_server.clone(),
            poll_interval: Duration::from_millis(self.config.poll_interval_ms),
            timeout: Duration::from_millis(self.config.timeout_ms),
            current: Arc::clone(&self.current),
        };

        tokio::spawn(async move {
            worker.run(&task_id, items).await;
        });
    }
}

/// Background side of a batch.
struct Worker {
    catalogs: Catalogs,
    media_server: Option<Arc<dyn MediaServer>>,
    poll_interval: Duration,
    timeout: Duration,
    current: Arc<Mutex<Option<Batch>>>,
}

impl Worker {
    async fn run(&self, task_id: &str, items: Vec<MoveItem>) {
        for item in &items {
            let started = Instant::now();
            match self.move_one(item).await {
                Ok(source_path) => {
                    let elapsed = started.elapsed();
                    metrics::BULK_MOVE_ITEMS
                        .with_label_values(&["succeeded"])
                        .inc();
                    metrics::BULK_MOVE_ITEM_DURATION
                        .with_label_values(&["succeeded"])
                        .observe(elapsed.as_secs_f64());
                    info!(
                        task_id = %task_id,
                        media_id = item.media_id,
                        "Moved {} to {} in {:?}",
                        source_path,
                        item.destination_path,
                        elapsed
                    );

                    self.update(|batch| {
                        batch.processed += 1;
                        batch.succeeded += 1;
                        batch.feed.push_back(CompletedMove {
                            media_id: item.media_id,
                            app_type: item.app_type,
                            source_path,
                            destination_path: item.destination_path.clone(),
                            duration_ms: elapsed.as_millis() as u64,
                            completed_at: Utc::now(),
                        });
                    })
                    .await;
                }
                Err((source_path, message)) => {
                    metrics::BULK_MOVE_ITEMS.with_label_values(&["failed"]).inc();
                    metrics::BULK_MOVE_ITEM_DURATION
                        .with_label_values(&["failed"])
                        .observe(started.elapsed().as_secs_f64());
                    error!(
                        task_id = %task_id,
                        media_id = item.media_id,
                        error = %message,
                        "Move failed, stopping batch"
                    );

                    self.update(|batch| {
                        batch.processed += 1;
                        batch.failures.push(FailedMove {
                            media_id: item.media_id,
                            app_type: item.app_type,
                            source_path,
                            error: message,
                        });
                        batch.state = BatchState::Failed;
                        batch.finished_at = Some(Utc::now());
                    })
                    .await;
                    return;
                }
            }
        }

        let refreshed = self.refresh_sections(&items).await;
        self.update(|batch| {
            batch.refreshed_sections = refreshed;
            batch.state = BatchState::Succeeded;
            batch.finished_at = Some(Utc::now());
        })
        .await;
        info!(task_id = %task_id, items = items.len(), "Bulk move finished");
    }

    /// Move one entry and wait for its old folder to disappear. Returns
    /// the old folder, or the old folder (if known) and an error message.
    async fn move_one(&self, item: &MoveItem) -> Result<String, (Option<String>, String)> {
        let catalog = self
            .catalogs
            .for_app(item.app_type)
            .ok_or_else(|| (None, format!("no {} catalog configured", item.app_type)))?;

        let entry = catalog
            .get_entry(item.media_id)
            .await
            .map_err(|e| (None, format!("failed to read entry: {}", e)))?;
        let source = entry.path;

        if moved_path(&source, &item.destination_path) == source.trim_end_matches(['/', '\\']) {
            debug!(media_id = item.media_id, "Already under {}", item.destination_path);
            return Ok(source);
        }

        catalog
            .move_entry(item.media_id, &item.destination_path)
            .await
            .map_err(|e| (Some(source.clone()), format!("move command failed: {}", e)))?;

        let deadline = Instant::now() + self.timeout;
        loop {
            if !tokio::fs::try_exists(Path::new(&source)).await.unwrap_or(true) {
                return Ok(source);
            }
            if Instant::now() >= deadline {
                return Err((
                    Some(source.clone()),
                    format!(
                        "timed out after {:?} waiting for {} to disappear",
                        self.timeout, source
                    ),
                ));
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    /// Refresh each distinct media server section once.
    async fn refresh_sections(&self, items: &[MoveItem]) -> Vec<String> {
        let mut keys: Vec<String> = Vec::new();
        for key in items.iter().filter_map(|i| i.plex_ref_key.as_ref()) {
            if !keys.contains(key) {
                keys.push(key.clone());
            }
        }
        if keys.is_empty() {
            return keys;
        }

        let Some(server) = &self.media_server else {
            info!("No media server configured, skipping refresh of {} sections", keys.len());
            return Vec::new();
        };

        let results = join_all(keys.iter().map(|key| server.refresh_section(key))).await;
        keys.into_iter()
            .zip(results)
            .filter_map(|(key, result)| match result {
                Ok(()) => Some(key),
                Err(e) => {
                    warn!(server = server.name(), section = %key, error = %e, "Section refresh failed");
                    None
                }
            })
            .collect()
    }

    async fn update(&self, f: impl FnOnce(&mut Batch)) {
        if let Some(batch) = self.current.lock().await.as_mut() {
            f(batch);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::AppType;
    use crate::testing::{fixtures, MockCatalog, MockMediaServer};
    use tempfile::TempDir;

    fn fast_config(timeout_ms: u64) -> BulkMoveConfig {
        BulkMoveConfig {
            poll_interval_ms: 10,
            timeout_ms,
        }
    }

    fn item(id: i64, dest: &Path, plex: Option<&str>) -> MoveItem {
        MoveItem {
            media_id: id,
            app_type: AppType::Radarr,
            destination_path: dest.to_string_lossy().into_owned(),
            plex_ref_key: plex.map(str::to_string),
        }
    }

    async fn wait_until_done(coordinator: &BulkMoveCoordinator) {
        for _ in 0..500 {
            if !coordinator.is_running().await {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("batch did not finish");
    }

    fn movie_catalog(temp: &TempDir, ids: &[(i64, &str)]) -> MockCatalog {
        let catalog = MockCatalog::new(AppType::Radarr);
        for (id, folder) in ids {
            let path = temp.path().join("old").join(folder);
            std::fs::create_dir_all(&path).unwrap();
            std::fs::write(path.join("movie.mkv"), b"m").unwrap();
            catalog.add_entry(fixtures::library_entry(*id, folder, None, path.to_str().unwrap()));
        }
        catalog
    }

    #[tokio::test]
    async fn test_batch_moves_sequentially_and_refreshes_once() {
        let temp = TempDir::new().unwrap();
        let catalog = movie_catalog(&temp, &[(1, "Heat (1995)"), (2, "Ronin (1998)")]);
        catalog.move_on_disk(true);
        let plex = Arc::new(MockMediaServer::new());
        let coordinator = BulkMoveCoordinator::new(
            Catalogs::new(None, Some(Arc::new(catalog.clone()))),
            Some(plex.clone()),
            fast_config(2_000),
        );

        let dest = temp.path().join("new");
        coordinator
            .start(vec![item(1, &dest, Some("2")), item(2, &dest, Some("2"))])
            .await
            .unwrap();
        wait_until_done(&coordinator).await;

        let status = coordinator.status().await;
        assert_eq!(status.state, Some(BatchState::Succeeded));
        assert_eq!(status.succeeded, 2);
        assert_eq!(status.completed.len(), 2);
        assert_eq!(status.completed[0].media_id, 1);
        assert!(dest.join("Ronin (1998)/movie.mkv").exists());
        assert_eq!(plex.refreshed_sections(), vec!["2".to_string()]);
    }

    #[tokio::test]
    async fn test_status_drains_completions_once() {
        let temp = TempDir::new().unwrap();
        let catalog = movie_catalog(&temp, &[(1, "Heat (1995)")]);
        catalog.move_on_disk(true);
        let coordinator = BulkMoveCoordinator::new(
            Catalogs::new(None, Some(Arc::new(catalog))),
            None,
            fast_config(2_000),
        );

        coordinator
            .start(vec![item(1, &temp.path().join("new"), None)])
            .await
            .unwrap();
        wait_until_done(&coordinator).await;

        assert_eq!(coordinator.status().await.completed.len(), 1);
        let second = coordinator.status().await;
        assert!(second.completed.is_empty());
        assert_eq!(second.succeeded, 1);
    }

    #[tokio::test]
    async fn test_start_while_running_is_busy() {
        let temp = TempDir::new().unwrap();
        // Moves are accepted but never happen on disk, so the batch waits
        // until its timeout.
        let catalog = movie_catalog(&temp, &[(1, "Heat (1995)"), (2, "Ronin (1998)")]);
        let coordinator = BulkMoveCoordinator::new(
            Catalogs::new(None, Some(Arc::new(catalog.clone()))),
            None,
            fast_config(300),
        );

        let dest = temp.path().join("new");
        let task_id = coordinator.start(vec![item(1, &dest, None)]).await.unwrap();
        let busy = coordinator.start(vec![item(2, &dest, None)]).await;
        match busy {
            Err(BulkMoveError::Busy { task_id: running }) => assert_eq!(running, task_id),
            other => panic!("expected busy, got {:?}", other),
        }

        wait_until_done(&coordinator).await;
        let status = coordinator.status().await;
        assert_eq!(status.task_id.as_deref(), Some(task_id.as_str()));
        assert_eq!(status.total, 1);
        assert_eq!(status.state, Some(BatchState::Failed));
        assert!(status.failures[0].error.contains("timed out"));
    }

    #[tokio::test]
    async fn test_failure_stops_batch() {
        let temp = TempDir::new().unwrap();
        let catalog = movie_catalog(&temp, &[(1, "Heat (1995)"), (2, "Ronin (1998)")]);
        catalog.fail_calls_to("move_entry", "disk full");
        let coordinator = BulkMoveCoordinator::new(
            Catalogs::new(None, Some(Arc::new(catalog.clone()))),
            None,
            fast_config(2_000),
        );

        let dest = temp.path().join("new");
        coordinator
            .start(vec![item(1, &dest, None), item(2, &dest, None)])
            .await
            .unwrap();
        wait_until_done(&coordinator).await;

        let status = coordinator.status().await;
        assert_eq!(status.processed, 1);
        assert_eq!(status.failures.len(), 1);
        assert!(status.failures[0].error.contains("disk full"));
        // Failures are repeated on every poll
        assert_eq!(coordinator.status().await.failures.len(), 1);
        // Second item never attempted
        assert_eq!(catalog.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_start_validation() {
        let coordinator = BulkMoveCoordinator::new(Catalogs::default(), None, fast_config(100));
        assert!(matches!(
            coordinator.start(Vec::new()).await,
            Err(BulkMoveError::Empty)
        ));
        assert!(matches!(
            coordinator
                .start(vec![item(1, Path::new("/new"), None)])
                .await,
            Err(BulkMoveError::NoCatalog(AppType::Radarr))
        ));
        assert!(!coordinator.is_running().await);
    }
}
