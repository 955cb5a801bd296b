//! Sonarr/Radarr v3 API client.
//!
//! Both services share the same API shape; the resource name
//! (`series` / `movie`) and command names differ.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;

use crate::store::AppType;

use super::matching::best_match;
use super::{ExternalId, LibraryCatalog, LibraryEntry, LibraryError, QueueItem};

/// Catalog API configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArrConfig {
    /// Base URL, e.g. `http://localhost:8989`.
    pub url: String,
    pub api_key: String,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u32,
}

fn default_timeout() -> u32 {
    30
}

/// Sonarr/Radarr API client.
pub struct ArrClient {
    client: Client,
    base_url: String,
    api_key: String,
    app_type: AppType,
}

impl ArrClient {
    pub fn new(app_type: AppType, config: ArrConfig) -> Result<Self, LibraryError> {
        if config.api_key.is_empty() {
            return Err(LibraryError::NotConfigured(format!(
                "{} API key is required",
                app_type
            )));
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs as u64))
            .build()?;

        Ok(Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
            api_key: config.api_key,
            app_type,
        })
    }

    fn resource(&self) -> &'static str {
        match self.app_type {
            AppType::Sonarr => "series",
            AppType::Radarr => "movie",
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api/v3/{}", self.base_url, path)
    }

    fn authed(&self, request: RequestBuilder) -> RequestBuilder {
        request.header("X-Api-Key", &self.api_key)
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, LibraryError> {
        debug!("{} GET {}", self.app_type, path);
        let response = self.authed(self.client.get(self.url(path))).send().await?;
        let response = check_status(response, path).await?;
        response.json().await.map_err(|e| {
            LibraryError::ParseError(format!("Failed to parse {} response: {}", path, e))
        })
    }

    async fn post_command(&self, body: Value) -> Result<(), LibraryError> {
        debug!("{} command {}", self.app_type, body);
        let response = self
            .authed(self.client.post(self.url("command")))
            .json(&body)
            .send()
            .await?;
        check_status(response, "command").await?;
        Ok(())
    }

    async fn list_entries(&self) -> Result<Vec<ArrEntry>, LibraryError> {
        self.get_json(self.resource()).await
    }
}

async fn check_status(response: Response, what: &str) -> Result<Response, LibraryError> {
    let status = response.status();
    if status == 401 {
        return Err(LibraryError::NotConfigured("Invalid API key".to_string()));
    }
    if status == 404 {
        return Err(LibraryError::NotFound(what.to_string()));
    }
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(LibraryError::ApiError {
            status: status.as_u16(),
            message: body,
        });
    }
    Ok(response)
}

/// Series or movie as returned by the API. Only the fields we use.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ArrEntry {
    id: i64,
    title: String,
    #[serde(default)]
    year: Option<u32>,
    #[serde(default)]
    path: Option<String>,
    #[serde(default)]
    root_folder_path: Option<String>,
    #[serde(default)]
    tvdb_id: Option<i64>,
    #[serde(default)]
    tmdb_id: Option<i64>,
    #[serde(default)]
    imdb_id: Option<String>,
}

impl ArrEntry {
    fn matches(&self, id: &ExternalId) -> bool {
        match id {
            ExternalId::Tvdb(v) => self.tvdb_id == Some(*v),
            ExternalId::Tmdb(v) => self.tmdb_id == Some(*v),
            ExternalId::Imdb(v) => self
                .imdb_id
                .as_deref()
                .is_some_and(|i| i.eq_ignore_ascii_case(v)),
        }
    }
}

impl From<ArrEntry> for LibraryEntry {
    fn from(e: ArrEntry) -> Self {
        LibraryEntry {
            id: e.id,
            title: e.title,
            year: e.year.filter(|y| *y > 0),
            path: e.path.unwrap_or_default(),
            root_folder_path: e.root_folder_path.filter(|p| !p.is_empty()),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RootFolder {
    path: String,
}

#[derive(Debug, Deserialize)]
struct QueuePage {
    #[serde(default)]
    records: Vec<ArrQueueRecord>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ArrQueueRecord {
    id: i64,
    #[serde(default)]
    download_id: Option<String>,
    #[serde(default)]
    title: String,
    #[serde(default)]
    status: String,
}

/// Queue records whose download id is `hash`, case-insensitively.
fn queue_matches(page: QueuePage, hash: &str) -> Vec<QueueItem> {
    page.records
        .into_iter()
        .filter_map(|r| {
            let download_id = r.download_id?;
            if !download_id.eq_ignore_ascii_case(hash) {
                return None;
            }
            Some(QueueItem {
                id: r.id,
                download_id,
                title: r.title,
                status: r.status,
            })
        })
        .collect()
}

/// New `path` for an entry moved under `destination_root`, keeping its
/// folder name.
pub fn moved_path(current_path: &str, destination_root: &str) -> String {
    let folder = current_path
        .trim_end_matches(['/', '\\'])
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default();
    format!("{}/{}", destination_root.trim_end_matches(['/', '\\']), folder)
}

#[async_trait]
impl LibraryCatalog for ArrClient {
    fn app_type(&self) -> AppType {
        self.app_type
    }

    async fn resolve_by_name(
        &self,
        release_name: &str,
    ) -> Result<Option<LibraryEntry>, LibraryError> {
        let entries: Vec<LibraryEntry> = self
            .list_entries()
            .await?
            .into_iter()
            .map(LibraryEntry::from)
            .collect();
        Ok(best_match(release_name, &entries).cloned())
    }

    async fn find_by_external_id(
        &self,
        id: &ExternalId,
    ) -> Result<Option<LibraryEntry>, LibraryError> {
        Ok(self
            .list_entries()
            .await?
            .into_iter()
            .find(|e| e.matches(id))
            .map(LibraryEntry::from))
    }

    async fn get_entry(&self, id: i64) -> Result<LibraryEntry, LibraryError> {
        let entry: ArrEntry = self
            .get_json(&format!("{}/{}", self.resource(), id))
            .await?;
        Ok(entry.into())
    }

    async fn root_folders(&self) -> Result<Vec<String>, LibraryError> {
        let folders: Vec<RootFolder> = self.get_json("rootfolder").await?;
        Ok(folders.into_iter().map(|f| f.path).collect())
    }

    async fn queue_for_hash(&self, hash: &str) -> Result<Vec<QueueItem>, LibraryError> {
        let page: QueuePage = self.get_json("queue?pageSize=1000").await?;
        Ok(queue_matches(page, hash))
    }

    async fn import_from_path(&self, path: &str, hash: &str) -> Result<(), LibraryError> {
        let name = match self.app_type {
            AppType::Sonarr => "DownloadedEpisodesScan",
            AppType::Radarr => "DownloadedMoviesScan",
        };
        self.post_command(json!({
            "name": name,
            "path": path,
            "downloadClientId": hash.to_uppercase(),
            "importMode": "Copy",
        }))
        .await
    }

    async fn rescan(&self, id: i64) -> Result<(), LibraryError> {
        let body = match self.app_type {
            AppType::Sonarr => json!({ "name": "RescanSeries", "seriesId": id }),
            AppType::Radarr => json!({ "name": "RescanMovie", "movieId": id }),
        };
        self.post_command(body).await
    }

    async fn move_entry(&self, id: i64, destination_root: &str) -> Result<(), LibraryError> {
        let path = format!("{}/{}", self.resource(), id);
        let mut body: Value = self.get_json(&path).await?;

        let current = body
            .get("path")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        body["path"] = Value::String(moved_path(&current, destination_root));
        body["rootFolderPath"] = Value::String(destination_root.to_string());

        debug!("{} PUT {} moveFiles=true", self.app_type, path);
        let response = self
            .authed(self.client.put(self.url(&format!("{}?moveFiles=true", path))))
            .json(&body)
            .send()
            .await?;
        check_status(response, &path).await?;
        Ok(())
    }
}
