//! Downstream library services.
//!
//! - [`LibraryCatalog`]: a Sonarr/Radarr-like catalog that owns series or
//!   movies, their on-disk roots, an import queue and async commands.
//! - [`MediaServer`]: a Plex-like server whose sections can be refreshed.

mod arr;
pub mod matching;
mod plex;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::store::AppType;

pub use arr::{moved_path, ArrClient, ArrConfig};
pub use plex::{PlexClient, PlexConfig};

/// Errors from library services.
#[derive(Debug, Error)]
pub enum LibraryError {
    /// HTTP request failed.
    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    /// Resource not found (404).
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// API returned an error.
    #[error("API error: {status} - {message}")]
    ApiError { status: u16, message: String },

    /// Failed to parse response.
    #[error("Failed to parse response: {0}")]
    ParseError(String),

    /// Client not configured (missing API key, etc.).
    #[error("Client not configured: {0}")]
    NotConfigured(String),
}

/// A series or movie in a catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LibraryEntry {
    pub id: i64,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub year: Option<u32>,
    /// On-disk folder of the entry.
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root_folder_path: Option<String>,
}

/// Identifier of an entry in an external metadata database.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum ExternalId {
    Tvdb(i64),
    Tmdb(i64),
    Imdb(String),
}

/// One item of a catalog's download/import queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueItem {
    pub id: i64,
    /// Download client id; for torrents, the info hash.
    pub download_id: String,
    pub title: String,
    #[serde(default)]
    pub status: String,
}

/// A Sonarr/Radarr-like catalog.
#[async_trait]
pub trait LibraryCatalog: Send + Sync {
    /// Which app type this catalog serves.
    fn app_type(&self) -> AppType;

    /// Find the entry a release belongs to by fuzzy title match.
    async fn resolve_by_name(&self, release_name: &str)
        -> Result<Option<LibraryEntry>, LibraryError>;

    /// Find an entry by external id.
    async fn find_by_external_id(
        &self,
        id: &ExternalId,
    ) -> Result<Option<LibraryEntry>, LibraryError>;

    /// Fetch an entry, including its current on-disk path.
    async fn get_entry(&self, id: i64) -> Result<LibraryEntry, LibraryError>;

    /// Configured library root folders.
    async fn root_folders(&self) -> Result<Vec<String>, LibraryError>;

    /// Queue items whose download id matches `hash`.
    async fn queue_for_hash(&self, hash: &str) -> Result<Vec<QueueItem>, LibraryError>;

    /// Ask the catalog to import a finished download from `path`.
    async fn import_from_path(&self, path: &str, hash: &str) -> Result<(), LibraryError>;

    /// Queue a rescan of one entry.
    async fn rescan(&self, id: i64) -> Result<(), LibraryError>;

    /// Move an entry under a new root folder. Returns once the move is
    /// accepted, not when files have finished moving.
    async fn move_entry(&self, id: i64, destination_root: &str) -> Result<(), LibraryError>;
}

/// A media server with refreshable library sections.
#[async_trait]
pub trait MediaServer: Send + Sync {
    fn name(&self) -> &str;

    async fn refresh_section(&self, section_key: &str) -> Result<(), LibraryError>;
}

/// The configured catalogs, one per app type.
#[derive(Clone, Default)]
pub struct Catalogs {
    pub sonarr: Option<Arc<dyn LibraryCatalog>>,
    pub radarr: Option<Arc<dyn LibraryCatalog>>,
}

impl Catalogs {
    pub fn new(
        sonarr: Option<Arc<dyn LibraryCatalog>>,
        radarr: Option<Arc<dyn LibraryCatalog>>,
    ) -> Self {
        Self { sonarr, radarr }
    }

    pub fn for_app(&self, app_type: AppType) -> Option<&Arc<dyn LibraryCatalog>> {
        match app_type {
            AppType::Sonarr => self.sonarr.as_ref(),
            AppType::Radarr => self.radarr.as_ref(),
        }
    }

    pub fn all(&self) -> impl Iterator<Item = &Arc<dyn LibraryCatalog>> {
        self.sonarr.iter().chain(self.radarr.iter())
    }

    pub fn is_empty(&self) -> bool {
        self.sonarr.is_none() && self.radarr.is_none()
    }

    /// Root folders of every catalog, fetched now.
    ///
    /// A catalog that cannot be reached contributes nothing; its failure
    /// is logged.
    pub async fn library_roots(&self) -> Vec<String> {
        let mut roots = Vec::new();
        for catalog in self.all() {
            match catalog.root_folders().await {
                Ok(folders) => roots.extend(folders),
                Err(e) => warn!(
                    app = %catalog.app_type(),
                    error = %e,
                    "Failed to fetch library root folders"
                ),
            }
        }
        roots.sort();
        roots.dedup();
        roots
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockCatalog;

    #[tokio::test]
    async fn test_catalogs_routing_and_roots() {
        let sonarr = Arc::new(MockCatalog::new(AppType::Sonarr));
        sonarr.add_root_folder("/media/shows");
        let radarr = Arc::new(MockCatalog::new(AppType::Radarr));
        radarr.add_root_folder("/media/movies");
        radarr.add_root_folder("/media/shows");

        let catalogs = Catalogs::new(Some(sonarr), Some(radarr));
        assert_eq!(
            catalogs.for_app(AppType::Radarr).unwrap().app_type(),
            AppType::Radarr
        );
        assert_eq!(
            catalogs.library_roots().await,
            vec!["/media/movies".to_string(), "/media/shows".to_string()]
        );
    }

    #[tokio::test]
    async fn test_unreachable_catalog_contributes_no_roots() {
        let sonarr = Arc::new(MockCatalog::new(AppType::Sonarr));
        sonarr.add_root_folder("/media/shows");
        sonarr.fail_next(LibraryError::NotConfigured("down".to_string()));

        let catalogs = Catalogs::new(Some(sonarr), None);
        assert!(catalogs.library_roots().await.is_empty());
        assert!(catalogs.for_app(AppType::Radarr).is_none());
    }
}
