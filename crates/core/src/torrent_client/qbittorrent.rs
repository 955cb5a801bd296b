//! qBittorrent Web API client.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use reqwest::{Client, RequestBuilder, Response};
use serde::Deserialize;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::config::QBittorrentConfig;

use super::{TorrentClient, TorrentClientError, TorrentFilters, TorrentInfo, TorrentState};

/// qBittorrent client implementation.
pub struct QBittorrentClient {
    client: Client,
    config: QBittorrentConfig,
    /// Set once logged in; cleared when the daemon answers 403.
    session: Arc<RwLock<bool>>,
}

impl QBittorrentClient {
    /// Create a new qBittorrent client.
    pub fn new(config: QBittorrentConfig) -> Result<Self, TorrentClientError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs as u64))
            .cookie_store(true)
            .build()
            .map_err(|e| TorrentClientError::Internal(e.to_string()))?;

        Ok(Self {
            client,
            config,
            session: Arc::new(RwLock::new(false)),
        })
    }

    /// Get the base URL without trailing slash.
    fn base_url(&self) -> &str {
        self.config.url.trim_end_matches('/')
    }

    /// Login; the session cookie lands in the client's cookie jar.
    async fn login(&self) -> Result<(), TorrentClientError> {
        let url = format!("{}/api/v2/auth/login", self.base_url());
        let params = [
            ("username", self.config.username.as_str()),
            ("password", self.config.password.as_str()),
        ];

        let response = self
            .client
            .post(&url)
            .form(&params)
            .send()
            .await
            .map_err(map_reqwest_error)?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();

        if body.contains("Ok.") {
            debug!("qBittorrent login successful");
            *self.session.write().await = true;
            Ok(())
        } else if body.contains("Fails.") || status.as_u16() == 403 {
            Err(TorrentClientError::AuthenticationFailed(
                "Invalid credentials".to_string(),
            ))
        } else {
            Err(TorrentClientError::AuthenticationFailed(format!(
                "Unexpected response: {}",
                body.chars().take(100).collect::<String>()
            )))
        }
    }

    async fn ensure_authenticated(&self) -> Result<(), TorrentClientError> {
        if *self.session.read().await {
            return Ok(());
        }
        self.login().await
    }

    /// Send an authenticated request, logging in again once on 403.
    async fn send(
        &self,
        build: impl Fn(&Client) -> RequestBuilder,
    ) -> Result<String, TorrentClientError> {
        self.ensure_authenticated().await?;

        let mut response = build(&self.client)
            .send()
            .await
            .map_err(map_reqwest_error)?;

        if response.status().as_u16() == 403 {
            warn!("qBittorrent session expired, re-authenticating");
            *self.session.write().await = false;
            self.login().await?;
            response = build(&self.client)
                .send()
                .await
                .map_err(map_reqwest_error)?;
        }

        read_body(response).await
    }

    async fn get(&self, endpoint: &str) -> Result<String, TorrentClientError> {
        let url = format!("{}{}", self.base_url(), endpoint);
        self.send(|client| client.get(&url)).await
    }

    async fn post_form(
        &self,
        endpoint: &str,
        params: &[(&str, &str)],
    ) -> Result<String, TorrentClientError> {
        let url = format!("{}{}", self.base_url(), endpoint);
        self.send(|client| client.post(&url).form(params)).await
    }
}

fn map_reqwest_error(e: reqwest::Error) -> TorrentClientError {
    if e.is_timeout() {
        TorrentClientError::Timeout
    } else if e.is_connect() {
        TorrentClientError::ConnectionFailed(e.to_string())
    } else {
        TorrentClientError::ApiError(e.to_string())
    }
}

async fn read_body(response: Response) -> Result<String, TorrentClientError> {
    let status = response.status();
    if !status.is_success() {
        return Err(TorrentClientError::ApiError(format!("HTTP {}", status)));
    }
    response
        .text()
        .await
        .map_err(|e| TorrentClientError::ApiError(e.to_string()))
}

/// qBittorrent torrent info response.
#[derive(Debug, Deserialize)]
struct QBTorrentInfo {
    hash: String,
    name: String,
    state: String,
    progress: f64,
    #[serde(default)]
    size: i64,
    #[serde(default)]
    ratio: f64,
    #[serde(default)]
    seeding_time: i64,
    #[serde(default)]
    added_on: i64,
    #[serde(default)]
    completion_on: i64,
    #[serde(default)]
    save_path: String,
    #[serde(default)]
    content_path: String,
    #[serde(default)]
    category: String,
}

impl QBTorrentInfo {
    fn into_torrent_info(self) -> TorrentInfo {
        TorrentInfo {
            hash: self.hash.to_lowercase(),
            name: self.name,
            state: parse_qb_state(&self.state),
            progress: self.progress,
            size_bytes: self.size.max(0) as u64,
            ratio: self.ratio,
            seeding_time_secs: self.seeding_time.max(0) as u64,
            added_at: timestamp_to_datetime(self.added_on),
            completed_at: timestamp_to_datetime(self.completion_on),
            save_path: non_empty(self.save_path),
            content_path: non_empty(self.content_path),
            category: non_empty(self.category),
        }
    }
}

fn non_empty(value: String) -> Option<String> {
    if value.trim().is_empty() {
        None
    } else {
        Some(value)
    }
}

/// Parse qBittorrent state string to TorrentState.
fn parse_qb_state(state: &str) -> TorrentState {
    match state {
        "downloading" | "forcedDL" | "metaDL" | "allocating" => TorrentState::Downloading,
        "uploading" | "forcedUP" => TorrentState::Seeding,
        "pausedDL" | "pausedUP" | "stoppedDL" | "stoppedUP" => TorrentState::Paused,
        "checkingDL" | "checkingUP" | "checkingResumeData" | "moving" => TorrentState::Checking,
        "queuedDL" | "queuedUP" => TorrentState::Queued,
        "stalledDL" | "stalledUP" => TorrentState::Stalled,
        "error" | "missingFiles" => TorrentState::Error,
        _ => TorrentState::Unknown,
    }
}

/// Convert Unix timestamp to DateTime<Utc>.
fn timestamp_to_datetime(ts: i64) -> Option<DateTime<Utc>> {
    if ts > 0 {
        Utc.timestamp_opt(ts, 0).single()
    } else {
        None
    }
}

fn parse_torrent_list(body: &str) -> Result<Vec<TorrentInfo>, TorrentClientError> {
    let torrents: Vec<QBTorrentInfo> = serde_json::from_str(body)
        .map_err(|e| TorrentClientError::ApiError(format!("Failed to parse response: {}", e)))?;
    Ok(torrents
        .into_iter()
        .map(QBTorrentInfo::into_torrent_info)
        .collect())
}

#[async_trait]
impl TorrentClient for QBittorrentClient {
    fn name(&self) -> &str {
        "qbittorrent"
    }

    async fn list_torrents(
        &self,
        filters: &TorrentFilters,
    ) -> Result<Vec<TorrentInfo>, TorrentClientError> {
        let endpoint = if filters.completed_only {
            "/api/v2/torrents/info?filter=completed"
        } else {
            "/api/v2/torrents/info"
        };
        parse_torrent_list(&self.get(endpoint).await?)
    }

    async fn get_torrent(&self, hash: &str) -> Result<TorrentInfo, TorrentClientError> {
        let endpoint = format!("/api/v2/torrents/info?hashes={}", hash.to_lowercase());
        parse_torrent_list(&self.get(&endpoint).await?)?
            .into_iter()
            .next()
            .ok_or_else(|| TorrentClientError::TorrentNotFound(hash.to_string()))
    }

    async fn remove_torrent(
        &self,
        hash: &str,
        delete_files: bool,
    ) -> Result<(), TorrentClientError> {
        let hash_lower = hash.to_lowercase();
        let delete_str = if delete_files { "true" } else { "false" };

        self.post_form(
            "/api/v2/torrents/delete",
            &[("hashes", &hash_lower), ("deleteFiles", delete_str)],
        )
        .await?;

        Ok(())
    }

    async fn default_save_path(&self) -> Result<String, TorrentClientError> {
        let body = self.get("/api/v2/app/defaultSavePath").await?;
        let path = body.trim();
        if path.is_empty() {
            return Err(TorrentClientError::ApiError(
                "daemon reported an empty default save path".to_string(),
            ));
        }
        Ok(path.to_string())
    }
}
