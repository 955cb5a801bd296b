use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, error, info, warn};

use crate::metrics;
use crate::remote::{RemoteConnector, RemoteSession};
use crate::run_lock::{RunLockError, RunLocks};
use crate::store::{LockedDocument, StoreError};
use crate::torrent_client::{TorrentClient, TorrentFilters, TorrentInfo};

use super::{
    EvictedTorrent, EvictionConfig, EvictionError, EvictionMode, EvictionResult, EvictionSummary,
};

/// Run-lock name of the space controller.
pub const EVICTION_LOCK: &str = "eviction";

/// Used percentage from `df -P` output: the capacity column of the last
/// data line.
pub fn parse_df_output(output: &str) -> Option<f64> {
    let line = output.lines().rev().find(|l| !l.trim().is_empty())?;
    line.split_whitespace()
        .find_map(|field| field.strip_suffix('%'))
        .and_then(|pct| pct.parse().ok())
}

/// Single-quote `value` for a POSIX shell.
fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

pub struct SeedboxSpaceController {
    torrents: Arc<dyn TorrentClient>,
    connector: Arc<dyn RemoteConnector>,
    config: EvictionConfig,
    summary: LockedDocument<Option<EvictionSummary>>,
    locks: RunLocks,
}

impl SeedboxSpaceController {
    pub fn new(
        torrents: Arc<dyn TorrentClient>,
        connector: Arc<dyn RemoteConnector>,
        config: EvictionConfig,
        summary: LockedDocument<Option<EvictionSummary>>,
        locks: RunLocks,
    ) -> Self {
        Self {
            torrents,
            connector,
            config,
            summary,
            locks,
        }
    }

    /// Summary of the last completed run, if any.
    pub fn last_summary(&self) -> Option<EvictionSummary> {
        self.summary.read()
    }

    /// Measure and evict once. Never fails: errors end up in the summary.
    pub async fn run(&self) -> EvictionSummary {
        let mut summary = EvictionSummary {
            started_at: Utc::now(),
            finished_at: Utc::now(),
            skipped_locked: false,
            mode: None,
            dry_run: self.config.dry_run,
            monitored_path: None,
            threshold_pct: self.config.emergency_threshold_pct,
            usage_before_pct: None,
            usage_after_pct: None,
            evicted: Vec::new(),
            errors: Vec::new(),
        };

        let _lock = match self.locks.acquire(EVICTION_LOCK) {
            Ok(lock) => lock,
            Err(RunLockError::Busy { since, .. }) => {
                info!(?since, "Eviction already running, skipping");
                summary.skipped_locked = true;
                return summary;
            }
            Err(e) => {
                error!(error = %e, "Failed to take eviction run-lock");
                summary.errors.push(e.to_string());
                return summary;
            }
        };

        if let Err(e) = self.evict(&mut summary).await {
            error!(error = %e, "Eviction run failed");
            summary.errors.push(e.to_string());
        }
        summary.finished_at = Utc::now();

        if let Err(e) = self.persist(&summary) {
            error!(error = %e, "Failed to persist eviction summary");
        }
        summary
    }

    async fn evict(&self, summary: &mut EvictionSummary) -> Result<(), EvictionError> {
        let path = self.monitored_path().await?;
        summary.monitored_path = Some(path.clone());

        let session = self.connector.connect().await?;
        let usage = measure(session.as_ref(), &path).await?;
        summary.usage_before_pct = Some(usage);
        summary.usage_after_pct = Some(usage);
        metrics::SEEDBOX_DISK_USED.set(usage);

        let torrents: Vec<TorrentInfo> = self
            .torrents
            .list_torrents(&TorrentFilters::default())
            .await?
            .into_iter()
            .filter(TorrentInfo::is_complete)
            .collect();

        if usage >= self.config.emergency_threshold_pct {
            summary.mode = Some(EvictionMode::Emergency);
            warn!(
                usage,
                threshold = self.config.emergency_threshold_pct,
                "Seedbox disk above emergency threshold"
            );
            self.emergency(session.as_ref(), &path, torrents, summary)
                .await
        } else {
            summary.mode = Some(EvictionMode::Routine);
            info!(usage, "Seedbox disk usage normal, running routine eviction");
            self.routine(session.as_ref(), &path, torrents, summary)
                .await
        }
    }

    /// Oldest first, re-measuring after each removal.
    async fn emergency(
        &self,
        session: &dyn RemoteSession,
        path: &str,
        mut candidates: Vec<TorrentInfo>,
        summary: &mut EvictionSummary,
    ) -> Result<(), EvictionError> {
        // Unknown add times sort last
        candidates.sort_by_key(|t| (t.added_at.is_none(), t.added_at));

        for torrent in candidates {
            self.remove(&torrent, EvictionMode::Emergency, summary)
                .await;

            let usage = measure(session, path).await?;
            summary.usage_after_pct = Some(usage);
            metrics::SEEDBOX_DISK_USED.set(usage);
            if usage < self.config.emergency_threshold_pct {
                info!(usage, "Seedbox disk back under threshold");
                return Ok(());
            }
        }

        warn!("Emergency eviction ran out of candidates");
        Ok(())
    }

    /// Everything past both seeding goals, in one pass.
    async fn routine(
        &self,
        session: &dyn RemoteSession,
        path: &str,
        candidates: Vec<TorrentInfo>,
        summary: &mut EvictionSummary,
    ) -> Result<(), EvictionError> {
        let eligible: Vec<TorrentInfo> = candidates
            .into_iter()
            .filter(|t| {
                t.ratio >= self.config.min_ratio
                    && t.seeding_time_secs >= self.config.min_seed_time_secs
            })
            .collect();
        debug!("{} torrents past seeding goals", eligible.len());
        if eligible.is_empty() {
            return Ok(());
        }

        for torrent in &eligible {
            self.remove(torrent, EvictionMode::Routine, summary).await;
        }

        let usage = measure(session, path).await?;
        summary.usage_after_pct = Some(usage);
        metrics::SEEDBOX_DISK_USED.set(usage);
        Ok(())
    }

    async fn remove(&self, torrent: &TorrentInfo, mode: EvictionMode, summary: &mut EvictionSummary) {
        let (result, error) = if self.config.dry_run {
            info!(
                hash = %torrent.hash,
                mode = mode.as_str(),
                "[dry-run] Would remove {}",
                torrent.name
            );
            (EvictionResult::Simulated, None)
        } else {
            match self.torrents.remove_torrent(&torrent.hash, true).await {
                Ok(()) => {
                    info!(
                        hash = %torrent.hash,
                        mode = mode.as_str(),
                        ratio = torrent.ratio,
                        "Removed {} and its data",
                        torrent.name
                    );
                    (EvictionResult::Deleted, None)
                }
                Err(e) => {
                    warn!(hash = %torrent.hash, error = %e, "Failed to remove torrent");
                    summary.errors.push(format!("{}: {}", torrent.hash, e));
                    (EvictionResult::Failed, Some(e.to_string()))
                }
            }
        };

        metrics::EVICTIONS
            .with_label_values(&[mode.as_str(), result.as_str()])
            .inc();
        summary.evicted.push(EvictedTorrent {
            hash: torrent.hash.clone(),
            name: torrent.name.clone(),
            ratio: torrent.ratio,
            seeding_time_secs: torrent.seeding_time_secs,
            added_at: torrent.added_at,
            size_bytes: torrent.size_bytes,
            result,
            error,
        });
    }

    async fn monitored_path(&self) -> Result<String, EvictionError> {
        match self.torrents.default_save_path().await {
            Ok(path) if !path.trim().is_empty() => return Ok(path),
            Ok(_) => debug!("Daemon reported an empty save path"),
            Err(e) => debug!(error = %e, "Daemon did not report a save path"),
        }
        self.config
            .fallback_path
            .clone()
            .filter(|p| !p.trim().is_empty())
            .ok_or(EvictionError::NoMonitoredPath)
    }

    fn persist(&self, summary: &EvictionSummary) -> Result<(), StoreError> {
        self.summary.update(|doc| {
            *doc = Some(summary.clone());
            Ok(())
        })
    }
}

async fn measure(session: &dyn RemoteSession, path: &str) -> Result<f64, EvictionError> {
    let output = session
        .exec(&format!("df -P {}", shell_quote(path)))
        .await?;
    parse_df_output(&output).ok_or(EvictionError::UnparseableUsage(output))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{df_output, fixtures, MockRemote, MockTorrentClient};
    use std::time::Duration;
    use tempfile::TempDir;

    struct Harness {
        _temp: TempDir,
        torrents: Arc<MockTorrentClient>,
        remote: MockRemote,
        controller: SeedboxSpaceController,
    }

    async fn harness(config: EvictionConfig, torrents: Vec<TorrentInfo>) -> Harness {
        let temp = TempDir::new().unwrap();
        let client = Arc::new(MockTorrentClient::with_save_path("/seed"));
        for t in torrents {
            client.add_mock_torrent(t).await;
        }
        let remote = MockRemote::new();
        let controller = SeedboxSpaceController::new(
            client.clone(),
            Arc::new(remote.clone()),
            config,
            LockedDocument::new(temp.path().join("eviction_summary.json"), Duration::from_secs(2)),
            RunLocks::new(temp.path().join("locks"), Duration::from_secs(3600)),
        );
        Harness {
            _temp: temp,
            torrents: client,
            remote,
            controller,
        }
    }

    fn three_by_age() -> Vec<TorrentInfo> {
        vec![
            fixtures::seeding_torrent("newest", 1, 0.1, 1),
            fixtures::seeding_torrent("oldest", 30, 0.5, 30),
            fixtures::seeding_torrent("middle", 10, 0.2, 10),
        ]
    }

    #[test]
    fn test_parse_df_output() {
        assert_eq!(parse_df_output(&df_output("/seed", 95)), Some(95.0));
        assert_eq!(
            parse_df_output("Filesystem 1024-blocks Used Available Capacity Mounted on\n"),
            None
        );
        assert_eq!(parse_df_output(""), None);
    }

    #[test]
    fn test_shell_quote() {
        assert_eq!(shell_quote("/home/user/it's"), r"'/home/user/it'\''s'");
    }

    #[tokio::test]
    async fn test_emergency_stops_once_under_threshold() {
        let h = harness(EvictionConfig::default(), three_by_age()).await;
        h.remote.push_disk_usage("/seed", 95);
        h.remote.push_disk_usage("/seed", 92);
        h.remote.push_disk_usage("/seed", 85);

        let summary = h.controller.run().await;
        assert_eq!(summary.mode, Some(EvictionMode::Emergency));
        assert_eq!(summary.usage_before_pct, Some(95.0));
        assert_eq!(summary.usage_after_pct, Some(85.0));

        let removed: Vec<String> = h
            .torrents
            .removed_torrents()
            .await
            .into_iter()
            .map(|r| r.hash)
            .collect();
        assert_eq!(removed, vec!["oldest".to_string(), "middle".to_string()]);
        assert!(h.torrents.has_torrent("newest").await);
        assert!(h
            .remote
            .executed_commands()
            .iter()
            .all(|c| c == "df -P '/seed'"));
    }

    #[tokio::test]
    async fn test_routine_removes_all_past_goals() {
        let torrents = vec![
            fixtures::seeding_torrent("done", 40, 2.5, 20),
            fixtures::seeding_torrent("low_ratio", 40, 1.0, 20),
            fixtures::seeding_torrent("too_young", 5, 3.0, 5),
        ];
        let h = harness(EvictionConfig::default(), torrents).await;
        h.remote.push_disk_usage("/seed", 50);
        h.remote.push_disk_usage("/seed", 45);

        let summary = h.controller.run().await;
        assert_eq!(summary.mode, Some(EvictionMode::Routine));
        assert_eq!(summary.deleted_count(), 1);
        assert_eq!(summary.evicted[0].hash, "done");
        assert_eq!(summary.usage_after_pct, Some(45.0));
        assert_eq!(h.torrents.torrent_count().await, 2);
    }

    #[tokio::test]
    async fn test_dry_run_simulates() {
        let config = EvictionConfig {
            dry_run: true,
            ..Default::default()
        };
        let h = harness(config, three_by_age()).await;
        h.remote.push_disk_usage("/seed", 95);

        let summary = h.controller.run().await;
        assert_eq!(summary.evicted.len(), 3);
        assert!(summary
            .evicted
            .iter()
            .all(|t| t.result == EvictionResult::Simulated));
        assert!(h.torrents.removed_torrents().await.is_empty());
    }

    #[tokio::test]
    async fn test_fallback_path_and_persisted_summary() {
        let config = EvictionConfig {
            fallback_path: Some("/data".to_string()),
            ..Default::default()
        };
        let h = harness(config, Vec::new()).await;
        h.torrents.set_default_save_path(None).await;
        h.remote.push_disk_usage("/data", 40);

        let summary = h.controller.run().await;
        assert_eq!(summary.monitored_path.as_deref(), Some("/data"));
        assert!(summary.errors.is_empty());
        assert_eq!(h.controller.last_summary(), Some(summary));
    }

    #[tokio::test]
    async fn test_connect_failure_is_recorded() {
        let h = harness(EvictionConfig::default(), three_by_age()).await;
        h.remote.fail_connect("refused");

        let summary = h.controller.run().await;
        assert_eq!(summary.mode, None);
        assert_eq!(summary.errors.len(), 1);
        assert!(h.torrents.removed_torrents().await.is_empty());
        assert!(h.controller.last_summary().is_some());
    }
}
