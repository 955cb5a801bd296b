use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::path::PathBuf;

use crate::bulk_move::BulkMoveConfig;
use crate::cleanup::CleanupConfig;
use crate::eviction::EvictionConfig;
use crate::library::{ArrConfig, PlexConfig};
use crate::scheduler::SchedulerConfig;
use crate::staging::StagingConfig;
use crate::store::AppType;

/// Root configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub state: StateConfig,
    pub seedbox: SeedboxConfig,
    pub torrent_client: TorrentClientConfig,
    #[serde(default)]
    pub catalogs: CatalogsConfig,
    #[serde(default)]
    pub media_server: Option<MediaServerConfig>,
    #[serde(default)]
    pub labels: LabelsConfig,
    pub staging: StagingConfig,
    #[serde(default)]
    pub cleanup: CleanupConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub eviction: EvictionConfig,
    #[serde(default)]
    pub bulk_move: BulkMoveConfig,
}

/// Server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: IpAddr,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

fn default_host() -> IpAddr {
    IpAddr::from([0, 0, 0, 0])
}

fn default_port() -> u16 {
    8080
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct LoggingConfig {
    #[serde(default)]
    pub format: LogFormat,
}

/// Which backend persists torrent records and the ignore set.
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StateBackend {
    /// One JSON document per concern, each behind its own lock file.
    #[default]
    Json,
    /// A single SQLite database.
    Sqlite,
}

/// Persisted state configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StateConfig {
    #[serde(default)]
    pub backend: StateBackend,
    /// Directory holding the state documents, lock files and run-lock markers.
    #[serde(default = "default_state_dir")]
    pub dir: PathBuf,
    /// How long a writer waits for the store lock before giving up.
    #[serde(default = "default_lock_timeout")]
    pub lock_timeout_ms: u64,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            backend: StateBackend::default(),
            dir: default_state_dir(),
            lock_timeout_ms: default_lock_timeout(),
        }
    }
}

fn default_state_dir() -> PathBuf {
    PathBuf::from("state")
}

fn default_lock_timeout() -> u64 {
    5000
}

/// SSH/SFTP access to the seedbox.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SeedboxConfig {
    pub host: String,
    #[serde(default = "default_ssh_port")]
    pub port: u16,
    pub username: String,
    #[serde(default)]
    pub password: Option<String>,
    /// Private key used instead of (or in addition to) the password.
    #[serde(default)]
    pub private_key_path: Option<PathBuf>,
    /// Connect and per-operation timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout_secs: u32,
}

fn default_ssh_port() -> u16 {
    22
}

fn default_timeout() -> u32 {
    30
}

/// Available torrent daemon backends
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TorrentClientBackend {
    #[default]
    #[serde(rename = "qbittorrent")]
    QBittorrent,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TorrentClientConfig {
    #[serde(default)]
    pub backend: TorrentClientBackend,
    #[serde(default)]
    pub qbittorrent: Option<QBittorrentConfig>,
}

/// qBittorrent Web API configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct QBittorrentConfig {
    /// Web UI URL (e.g., "http://seedbox:8080")
    pub url: String,
    pub username: String,
    pub password: String,
    /// Request timeout in seconds (default: 30)
    #[serde(default = "default_timeout")]
    pub timeout_secs: u32,
}

/// Downstream catalog services. Either may be absent.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct CatalogsConfig {
    #[serde(default)]
    pub sonarr: Option<ArrConfig>,
    #[serde(default)]
    pub radarr: Option<ArrConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MediaServerConfig {
    #[serde(default)]
    pub plex: Option<PlexConfig>,
}

/// Torrent labels that route arrivals to a catalog.
///
/// The `*_auto` labels are the ones the catalog services stamp on torrents
/// they grabbed themselves; they are accepted as synonyms and also mark
/// the item as one the catalog would have imported automatically.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LabelsConfig {
    #[serde(default = "default_sonarr_label")]
    pub sonarr: String,
    #[serde(default = "default_sonarr_auto_label")]
    pub sonarr_auto: String,
    #[serde(default = "default_radarr_label")]
    pub radarr: String,
    #[serde(default = "default_radarr_auto_label")]
    pub radarr_auto: String,
}

impl Default for LabelsConfig {
    fn default() -> Self {
        Self {
            sonarr: default_sonarr_label(),
            sonarr_auto: default_sonarr_auto_label(),
            radarr: default_radarr_label(),
            radarr_auto: default_radarr_auto_label(),
        }
    }
}

impl LabelsConfig {
    /// Route a torrent label to its catalog. The second value is true for
    /// the catalogs' own auto-import labels.
    pub fn classify(&self, label: &str) -> Option<(AppType, bool)> {
        let label = label.trim();
        if label.eq_ignore_ascii_case(&self.sonarr_auto) {
            Some((AppType::Sonarr, true))
        } else if label.eq_ignore_ascii_case(&self.radarr_auto) {
            Some((AppType::Radarr, true))
        } else if label.eq_ignore_ascii_case(&self.sonarr) {
            Some((AppType::Sonarr, false))
        } else if label.eq_ignore_ascii_case(&self.radarr) {
            Some((AppType::Radarr, false))
        } else {
            None
        }
    }

    pub fn is_auto(&self, label: &str) -> bool {
        self.classify(label).is_some_and(|(_, auto)| auto)
    }
}

fn default_sonarr_label() -> String {
    "tv".to_string()
}

fn default_sonarr_auto_label() -> String {
    "tv-sonarr".to_string()
}

fn default_radarr_label() -> String {
    "movies".to_string()
}

fn default_radarr_auto_label() -> String {
    "radarr".to_string()
}

/// Sanitized config for API responses (secrets redacted)
#[derive(Debug, Clone, Serialize)]
pub struct SanitizedConfig {
    pub server: ServerConfig,
    pub state: StateConfig,
    pub seedbox: SanitizedSeedboxConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub qbittorrent: Option<SanitizedServiceConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sonarr: Option<SanitizedServiceConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub radarr: Option<SanitizedServiceConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plex: Option<SanitizedServiceConfig>,
    pub labels: LabelsConfig,
    pub staging: StagingConfig,
    pub cleanup: CleanupConfig,
    pub scheduler: SchedulerConfig,
    pub eviction: EvictionConfig,
    pub bulk_move: BulkMoveConfig,
}

#[derive(Debug, Clone, Serialize)]
pub struct SanitizedSeedboxConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password_configured: bool,
    pub private_key_configured: bool,
}

/// A remote service with its credential hidden.
#[derive(Debug, Clone, Serialize)]
pub struct SanitizedServiceConfig {
    pub url: String,
    pub credentials_configured: bool,
}

impl From<&Config> for SanitizedConfig {
    fn from(config: &Config) -> Self {
        let arr = |c: &ArrConfig| SanitizedServiceConfig {
            url: c.url.clone(),
            credentials_configured: !c.api_key.is_empty(),
        };

        Self {
            server: config.server.clone(),
            state: config.state.clone(),
            seedbox: SanitizedSeedboxConfig {
                host: config.seedbox.host.clone(),
                port: config.seedbox.port,
                username: config.seedbox.username.clone(),
                password_configured: config
                    .seedbox
                    .password
                    .as_ref()
                    .is_some_and(|p| !p.is_empty()),
                private_key_configured: config.seedbox.private_key_path.is_some(),
            },
            qbittorrent: config.torrent_client.qbittorrent.as_ref().map(|q| {
                SanitizedServiceConfig {
                    url: q.url.clone(),
                    credentials_configured: !q.password.is_empty(),
                }
            }),
            sonarr: config.catalogs.sonarr.as_ref().map(arr),
            radarr: config.catalogs.radarr.as_ref().map(arr),
            plex: config
                .media_server
                .as_ref()
                .and_then(|m| m.plex.as_ref())
                .map(|p| SanitizedServiceConfig {
                    url: p.url.clone(),
                    credentials_configured: !p.token.is_empty(),
                }),
            labels: config.labels.clone(),
            staging: config.staging.clone(),
            cleanup: config.cleanup.clone(),
            scheduler: config.scheduler.clone(),
            eviction: config.eviction.clone(),
            bulk_move: config.bulk_move.clone(),
        }
    }
}
