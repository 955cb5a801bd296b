//! Mock library catalog and media server for testing.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;

use crate::library::matching::best_match;
use crate::library::{
    moved_path, ExternalId, LibraryCatalog, LibraryEntry, LibraryError, MediaServer, QueueItem,
};
use crate::store::AppType;

/// A call made against the mock catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CatalogCall {
    Import { path: String, hash: String },
    Rescan(i64),
    Move { id: i64, destination_root: String },
}

#[derive(Debug, Default)]
struct CatalogState {
    entries: Vec<LibraryEntry>,
    external_ids: Vec<(ExternalId, i64)>,
    root_folders: Vec<String>,
    queue: Vec<QueueItem>,
    calls: Vec<CatalogCall>,
    /// Consumed by the next call of any method.
    next_error: Option<LibraryError>,
    /// Methods that fail on every call, with their error message.
    failing: HashMap<&'static str, String>,
    move_on_disk: bool,
}

/// Mock Sonarr/Radarr-like catalog.
///
/// Provides controllable behavior for testing:
/// - Entries, root folders and queue items set up front
/// - Imports, rescans and moves recorded for assertions
/// - One-shot (`fail_next`) or persistent (`fail_calls_to`) failures
/// - Optionally performs accepted moves on the local disk
#[derive(Debug, Clone)]
pub struct MockCatalog {
    app_type: AppType,
    state: Arc<Mutex<CatalogState>>,
}

impl MockCatalog {
    pub fn new(app_type: AppType) -> Self {
        Self {
            app_type,
            state: Arc::new(Mutex::new(CatalogState::default())),
        }
    }

    fn state(&self) -> MutexGuard<'_, CatalogState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn add_entry(&self, entry: LibraryEntry) {
        self.state().entries.push(entry);
    }

    pub fn add_external_id(&self, id: ExternalId, entry_id: i64) {
        self.state().external_ids.push((id, entry_id));
    }

    pub fn add_root_folder(&self, path: &str) {
        self.state().root_folders.push(path.to_string());
    }

    pub fn add_queue_item(&self, item: QueueItem) {
        self.state().queue.push(item);
    }

    /// Fail the next call, whatever it is.
    pub fn fail_next(&self, error: LibraryError) {
        self.state().next_error = Some(error);
    }

    /// Fail every call to `method` (e.g. `"import_from_path"`).
    pub fn fail_calls_to(&self, method: &'static str, message: &str) {
        self.state().failing.insert(method, message.to_string());
    }

    pub fn clear_failures(&self) {
        let mut state = self.state();
        state.next_error = None;
        state.failing.clear();
    }

    /// Rename entry folders on disk when a move is accepted.
    pub fn move_on_disk(&self, enabled: bool) {
        self.state().move_on_disk = enabled;
    }

    pub fn calls(&self) -> Vec<CatalogCall> {
        self.state().calls.clone()
    }

    pub fn entry(&self, id: i64) -> Option<LibraryEntry> {
        self.state().entries.iter().find(|e| e.id == id).cloned()
    }

    /// Fail if a one-shot or persistent failure is configured for `method`.
    fn check(&self, method: &'static str) -> Result<(), LibraryError> {
        let mut state = self.state();
        if let Some(err) = state.next_error.take() {
            return Err(err);
        }
        if let Some(message) = state.failing.get(method) {
            return Err(LibraryError::ApiError {
                status: 500,
                message: message.clone(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl LibraryCatalog for MockCatalog {
    fn app_type(&self) -> AppType {
        self.app_type
    }

    async fn resolve_by_name(
        &self,
        release_name: &str,
    ) -> Result<Option<LibraryEntry>, LibraryError> {
        self.check("resolve_by_name")?;
        let state = self.state();
        Ok(best_match(release_name, &state.entries).cloned())
    }

    async fn find_by_external_id(
        &self,
        id: &ExternalId,
    ) -> Result<Option<LibraryEntry>, LibraryError> {
        self.check("find_by_external_id")?;
        let state = self.state();
        Ok(state
            .external_ids
            .iter()
            .find(|(known, _)| known == id)
            .and_then(|(_, entry_id)| state.entries.iter().find(|e| e.id == *entry_id))
            .cloned())
    }

    async fn get_entry(&self, id: i64) -> Result<LibraryEntry, LibraryError> {
        self.check("get_entry")?;
        self.entry(id)
            .ok_or_else(|| LibraryError::NotFound(format!("{} {}", self.app_type, id)))
    }

    async fn root_folders(&self) -> Result<Vec<String>, LibraryError> {
        self.check("root_folders")?;
        Ok(self.state().root_folders.clone())
    }

    async fn queue_for_hash(&self, hash: &str) -> Result<Vec<QueueItem>, LibraryError> {
        self.check("queue_for_hash")?;
        Ok(self
            .state()
            .queue
            .iter()
            .filter(|item| item.download_id.eq_ignore_ascii_case(hash))
            .cloned()
            .collect())
    }

    async fn import_from_path(&self, path: &str, hash: &str) -> Result<(), LibraryError> {
        self.state().calls.push(CatalogCall::Import {
            path: path.to_string(),
            hash: hash.to_string(),
        });
        self.check("import_from_path")
    }

    async fn rescan(&self, id: i64) -> Result<(), LibraryError> {
        self.state().calls.push(CatalogCall::Rescan(id));
        self.check("rescan")
    }

    async fn move_entry(&self, id: i64, destination_root: &str) -> Result<(), LibraryError> {
        self.state().calls.push(CatalogCall::Move {
            id,
            destination_root: destination_root.to_string(),
        });
        self.check("move_entry")?;

        let mut state = self.state();
        let move_on_disk = state.move_on_disk;
        let entry = state
            .entries
            .iter_mut()
            .find(|e| e.id == id)
            .ok_or_else(|| LibraryError::NotFound(format!("{} {}", self.app_type, id)))?;

        let new_path = moved_path(&entry.path, destination_root);
        if move_on_disk {
            std::fs::create_dir_all(destination_root)
                .and_then(|_| std::fs::rename(Path::new(&entry.path), Path::new(&new_path)))
                .map_err(|e| LibraryError::ApiError {
                    status: 500,
                    message: e.to_string(),
                })?;
        }
        entry.path = new_path;
        entry.root_folder_path = Some(destination_root.to_string());
        Ok(())
    }
}

/// Mock Plex-like media server recording refreshed sections.
#[derive(Debug, Clone, Default)]
pub struct MockMediaServer {
    refreshed: Arc<Mutex<Vec<String>>>,
    fail: Arc<Mutex<bool>>,
}

impl MockMediaServer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn refreshed_sections(&self) -> Vec<String> {
        self.refreshed
            .lock()
            .map(|r| r.clone())
            .unwrap_or_default()
    }

    pub fn set_failing(&self, fail: bool) {
        if let Ok(mut flag) = self.fail.lock() {
            *flag = fail;
        }
    }
}

#[async_trait]
impl MediaServer for MockMediaServer {
    fn name(&self) -> &str {
        "mock"
    }

    async fn refresh_section(&self, section_key: &str) -> Result<(), LibraryError> {
        if self.fail.lock().map(|f| *f).unwrap_or(false) {
            return Err(LibraryError::ApiError {
                status: 503,
                message: "refresh failed".to_string(),
            });
        }
        if let Ok(mut refreshed) = self.refreshed.lock() {
            refreshed.push(section_key.to_string());
        }
        Ok(())
    }
}
