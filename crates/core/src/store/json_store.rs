//! JSON-document-backed state store.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::time::Duration;

use chrono::Utc;

use super::{
    merge_record, normalize_hash, LockedDocument, RecordUpdate, StateStore, StoreError,
    TorrentRecord, TorrentStatus, TransitionMode,
};

type RecordMap = BTreeMap<String, TorrentRecord>;
type IgnoreSet = BTreeSet<String>;

/// State store keeping records and the ignore set in two independent
/// documents (`torrents.json`, `ignored.json`), each with its own lock.
pub struct JsonStateStore {
    records: LockedDocument<RecordMap>,
    ignored: LockedDocument<IgnoreSet>,
}

impl JsonStateStore {
    /// Create a store rooted at `dir`. Documents are created on first write.
    pub fn new(dir: impl AsRef<Path>, lock_timeout: Duration) -> Self {
        let dir = dir.as_ref();
        Self {
            records: LockedDocument::new(dir.join("torrents.json"), lock_timeout),
            ignored: LockedDocument::new(dir.join("ignored.json"), lock_timeout),
        }
    }

    fn write_status(
        &self,
        hash: &str,
        status: TorrentStatus,
        message: &str,
        mode: TransitionMode,
    ) -> Result<TorrentRecord, StoreError> {
        let key = normalize_hash(hash);
        self.records.update(|records| {
            let existing = records
                .get(&key)
                .cloned()
                .ok_or_else(|| StoreError::NotFound(key.clone()))?;
            let record = merge_record(
                Some(existing),
                &key,
                RecordUpdate::status(status, message),
                mode,
                Utc::now(),
            )?;
            records.insert(key.clone(), record.clone());
            Ok(record)
        })
    }
}

impl StateStore for JsonStateStore {
    fn get(&self, hash: &str) -> Result<Option<TorrentRecord>, StoreError> {
        Ok(self.records.read().remove(&normalize_hash(hash)))
    }

    fn upsert(&self, hash: &str, update: RecordUpdate) -> Result<TorrentRecord, StoreError> {
        let key = normalize_hash(hash);
        self.records.update(|records| {
            let record = merge_record(
                records.get(&key).cloned(),
                &key,
                update,
                TransitionMode::Forward,
                Utc::now(),
            )?;
            records.insert(key.clone(), record.clone());
            Ok(record)
        })
    }

    fn set_status(
        &self,
        hash: &str,
        status: TorrentStatus,
        message: &str,
    ) -> Result<TorrentRecord, StoreError> {
        self.write_status(hash, status, message, TransitionMode::Forward)
    }

    fn reset_status(
        &self,
        hash: &str,
        status: TorrentStatus,
        message: &str,
    ) -> Result<TorrentRecord, StoreError> {
        self.write_status(hash, status, message, TransitionMode::Reset)
    }

    fn remove(&self, hash: &str) -> Result<Option<TorrentRecord>, StoreError> {
        let key = normalize_hash(hash);
        self.records.update(|records| Ok(records.remove(&key)))
    }

    fn list_all(&self) -> Result<Vec<TorrentRecord>, StoreError> {
        Ok(self.records.read().into_values().collect())
    }

    fn ignore_add(&self, hash: &str) -> Result<bool, StoreError> {
        let key = normalize_hash(hash);
        self.ignored.update(|set| Ok(set.insert(key)))
    }

    fn ignore_contains(&self, hash: &str) -> Result<bool, StoreError> {
        Ok(self.ignored.read().contains(&normalize_hash(hash)))
    }

    fn ignore_remove(&self, hash: &str) -> Result<bool, StoreError> {
        let key = normalize_hash(hash);
        self.ignored.update(|set| Ok(set.remove(&key)))
    }

    fn ignored(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.ignored.read().into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::AppType;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn store(temp: &TempDir) -> JsonStateStore {
        JsonStateStore::new(temp.path(), Duration::from_secs(2))
    }

    fn arrival(remote_path: &str) -> RecordUpdate {
        RecordUpdate {
            release_name: Some("Movie.2020.1080p".to_string()),
            folder_name: Some("Movie.2020.1080p".to_string()),
            original_name: Some("Movie.2020.1080p".to_string()),
            app_type: Some(AppType::Radarr),
            target_id: Some(42),
            label: Some("radarr".to_string()),
            remote_path: Some(remote_path.to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_upsert_and_get() {
        let temp = TempDir::new().unwrap();
        let store = store(&temp);

        let created = store.upsert("ABC123", arrival("/seed/Movie")).unwrap();
        assert_eq!(created.hash, "abc123");
        assert_eq!(created.status, TorrentStatus::PendingStaging);

        let fetched = store.get("abc123").unwrap().unwrap();
        assert_eq!(fetched, created);
        assert!(store.get("missing").unwrap().is_none());
    }

    #[test]
    fn test_documents_live_in_owned_state_dir() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().join("state");
        let store = JsonStateStore::new(dir.clone(), Duration::from_secs(2));

        store.upsert("abc123", arrival("/seed/Movie")).unwrap();
        store.ignore_add("def456").unwrap();
        assert!(dir.join("torrents.json").exists());
        assert!(dir.join("ignored.json").exists());

        let reopened = JsonStateStore::new(&dir, Duration::from_secs(2));
        assert!(reopened.get("abc123").unwrap().is_some());
        assert!(reopened.ignore_contains("def456").unwrap());
    }

    #[test]
    fn test_upsert_never_duplicates_keys() {
        let temp = TempDir::new().unwrap();
        let store = store(&temp);

        store.upsert("abc123", arrival("")).unwrap();
        store
            .upsert("ABC123", RecordUpdate::default().with_remote_path("/seed/Movie"))
            .unwrap();

        let all = store.list_all().unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].remote_path, "/seed/Movie");
        assert_eq!(all[0].target_id, 42);
    }

    #[test]
    fn test_set_status_forward_and_reset() {
        let temp = TempDir::new().unwrap();
        let store = store(&temp);
        store.upsert("h1", arrival("/seed/Movie")).unwrap();

        store
            .set_status("h1", TorrentStatus::InStaging, "transferred")
            .unwrap();
        let err = store
            .set_status("h1", TorrentStatus::PendingStaging, "again")
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidTransition { .. }));

        let reset = store
            .reset_status("h1", TorrentStatus::PendingStaging, "reset by operator")
            .unwrap();
        assert_eq!(reset.status, TorrentStatus::PendingStaging);
        assert_eq!(reset.status_message, "reset by operator");
    }

    #[test]
    fn test_set_status_missing_record() {
        let temp = TempDir::new().unwrap();
        let store = store(&temp);
        assert!(matches!(
            store.set_status("nope", TorrentStatus::InStaging, ""),
            Err(StoreError::NotFound(_))
        ));
    }

    #[test]
    fn test_empty_remote_path_stays_pending_staging() {
        let temp = TempDir::new().unwrap();
        let store = store(&temp);
        store.upsert("h2", arrival("")).unwrap();

        let err = store
            .set_status("h2", TorrentStatus::InStaging, "")
            .unwrap_err();
        assert!(matches!(err, StoreError::RemotePathRequired { .. }));
        assert_eq!(
            store.get("h2").unwrap().unwrap().status,
            TorrentStatus::PendingStaging
        );
    }

    #[test]
    fn test_remove_and_list_by_status() {
        let temp = TempDir::new().unwrap();
        let store = store(&temp);
        store.upsert("a", arrival("/seed/a")).unwrap();
        store.upsert("b", arrival("/seed/b")).unwrap();
        store.set_status("b", TorrentStatus::InStaging, "").unwrap();

        let staged = store.list_by_status(&[TorrentStatus::InStaging]).unwrap();
        assert_eq!(staged.len(), 1);
        assert_eq!(staged[0].hash, "b");

        assert!(store.remove("a").unwrap().is_some());
        assert!(store.remove("a").unwrap().is_none());
        assert_eq!(store.list_all().unwrap().len(), 1);
    }

    #[test]
    fn test_ignore_set_is_independent() {
        let temp = TempDir::new().unwrap();
        let store = store(&temp);

        assert!(store.ignore_add("DEAD").unwrap());
        assert!(!store.ignore_add("dead").unwrap());
        assert!(store.ignore_contains("dead").unwrap());
        assert!(store.list_all().unwrap().is_empty());

        std::fs::write(temp.path().join("torrents.json"), b"garbage").unwrap();
        assert!(store.ignore_contains("dead").unwrap());
        assert!(store.list_all().unwrap().is_empty());

        assert!(store.ignore_remove("dead").unwrap());
        assert!(!store.ignore_remove("dead").unwrap());
        assert!(store.ignored().unwrap().is_empty());
    }

    #[test]
    fn test_concurrent_writers_keep_every_record() {
        let temp = TempDir::new().unwrap();
        let store = Arc::new(store(&temp));

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || {
                    store
                        .upsert(&format!("hash{}", i), arrival(&format!("/seed/{}", i)))
                        .unwrap();
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(store.list_all().unwrap().len(), 8);
    }
}
