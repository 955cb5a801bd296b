//! In-process server fixture for API tests.
//!
//! Builds the real router over the real scanner, staging processor,
//! eviction controller and operator, with the seedbox, daemon and catalogs
//! replaced by the mocks from `seedsync_core::testing`.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::Value;
use tempfile::TempDir;
use tower::ServiceExt;

use seedsync_core::store::{AppType, LockedDocument};
use seedsync_core::testing::{MockCatalog, MockMediaServer, MockRemote, MockTorrentClient};
use seedsync_core::{
    load_config_from_str, open_state_store, BulkMoveCoordinator, Catalogs, CleanupGuard,
    CompletionScanner, Config, MediaServer, Operator, RunLocks, Scheduler, SeedboxSpaceController,
    StagingProcessor, StateStore,
};
use seedsync_server::state::AppState;

pub use seedsync_core::testing::fixtures;

/// Test fixture wiring the API to mock collaborators.
///
/// ```rust,ignore
/// let fixture = TestFixture::new();
/// let response = fixture.get("/api/v1/records").await;
/// assert_eq!(response.status, StatusCode::OK);
/// ```
pub struct TestFixture {
    pub router: Router,
    pub store: Arc<dyn StateStore>,
    pub torrents: Arc<MockTorrentClient>,
    pub remote: MockRemote,
    pub sonarr: MockCatalog,
    pub media_server: Arc<MockMediaServer>,
    pub locks: RunLocks,
    pub config: Config,
    pub temp_dir: TempDir,
}

/// Response from a test request
#[derive(Debug)]
pub struct TestResponse {
    pub status: StatusCode,
    pub body: Value,
}

impl TestFixture {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let config = test_config(temp_dir.path());

        let shows = temp_dir.path().join("media/shows");
        std::fs::create_dir_all(&shows).expect("Failed to create library root");
        let sonarr = MockCatalog::new(AppType::Sonarr);
        sonarr.add_root_folder(shows.to_str().expect("utf-8 temp path"));
        let catalogs = Catalogs::new(Some(Arc::new(sonarr.clone())), None);

        let store = open_state_store(&config.state).expect("Failed to open state store");
        let locks = RunLocks::new(temp_dir.path().join("state/locks"), Duration::from_secs(3600));
        let torrents = Arc::new(MockTorrentClient::with_save_path("/seed"));
        let remote = MockRemote::new();
        let media_server = Arc::new(MockMediaServer::new());

        let scanner = Arc::new(CompletionScanner::new(
            Arc::clone(&store),
            torrents.clone(),
            catalogs.clone(),
            config.labels.clone(),
            locks.clone(),
        ));
        let staging = Arc::new(StagingProcessor::new(
            Arc::clone(&store),
            Arc::new(remote.clone()),
            catalogs.clone(),
            CleanupGuard::new(config.cleanup.clone()),
            config.labels.clone(),
            config.staging.clone(),
            locks.clone(),
        ));
        let eviction = Arc::new(SeedboxSpaceController::new(
            torrents.clone(),
            Arc::new(remote.clone()),
            config.eviction.clone(),
            LockedDocument::new(
                temp_dir.path().join("state/eviction_summary.json"),
                Duration::from_secs(2),
            ),
            locks.clone(),
        ));

        let mut scheduler = Scheduler::new(config.scheduler.clone());
        scheduler.register(scanner.clone(), Duration::from_secs(300));
        scheduler.register(staging.clone(), Duration::from_secs(60));
        scheduler.register(eviction.clone(), Duration::from_secs(3600));

        let operator = Operator::new(
            Arc::clone(&store),
            catalogs.clone(),
            CleanupGuard::new(config.cleanup.clone()),
        );
        let bulk_move = BulkMoveCoordinator::new(
            catalogs,
            Some(media_server.clone() as Arc<dyn MediaServer>),
            config.bulk_move.clone(),
        );

        let state = Arc::new(AppState::new(
            config.clone(),
            Arc::clone(&store),
            scanner,
            staging,
            eviction,
            operator,
            bulk_move,
            Arc::new(scheduler),
        ));
        let router = seedsync_server::api::create_router(state);

        Self {
            router,
            store,
            torrents,
            remote,
            sonarr,
            media_server,
            locks,
            config,
            temp_dir,
        }
    }

    pub fn path(&self, relative: &str) -> PathBuf {
        self.temp_dir.path().join(relative)
    }

    pub async fn get(&self, uri: &str) -> TestResponse {
        self.request("GET", uri, None).await
    }

    pub async fn post(&self, uri: &str, body: Value) -> TestResponse {
        self.request("POST", uri, Some(body)).await
    }

    pub async fn post_empty(&self, uri: &str) -> TestResponse {
        self.request("POST", uri, None).await
    }

    pub async fn delete(&self, uri: &str) -> TestResponse {
        self.request("DELETE", uri, None).await
    }

    /// Raw body of a GET, for non-JSON endpoints.
    pub async fn get_text(&self, uri: &str) -> (StatusCode, String) {
        let request = Request::builder()
            .method("GET")
            .uri(uri)
            .body(Body::empty())
            .unwrap();
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        (status, String::from_utf8_lossy(&bytes).into_owned())
    }

    async fn request(&self, method: &str, uri: &str, body: Option<Value>) -> TestResponse {
        let builder = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(serde_json::to_vec(&body).unwrap()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or_else(|_| {
                Value::String(String::from_utf8_lossy(&bytes).into_owned())
            })
        };

        TestResponse { status, body }
    }
}

/// Minimal configuration rooted in `dir`, scheduler disabled.
pub fn test_config(dir: &Path) -> Config {
    let toml = format!(
        r#"
[seedbox]
host = "seedbox.test"
username = "tester"

[torrent_client.qbittorrent]
url = "http://seedbox.test:8080"
username = "admin"
password = "secret"

[state]
dir = "{state}"

[staging]
root = "{staging}"

[scheduler]
enabled = false

[bulk_move]
poll_interval_ms = 10
timeout_ms = 1000
"#,
        state = dir.join("state").display(),
        staging = dir.join("staging").display(),
    );
    load_config_from_str(&toml).expect("Failed to parse test config")
}
