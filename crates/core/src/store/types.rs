//! Torrent record types and the status state machine.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::StoreError;

/// Which downstream catalog owns an item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppType {
    /// Series catalog (Sonarr-like).
    Sonarr,
    /// Movie catalog (Radarr-like).
    Radarr,
}

impl AppType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AppType::Sonarr => "sonarr",
            AppType::Radarr => "radarr",
        }
    }
}

impl fmt::Display for AppType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AppType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sonarr" => Ok(AppType::Sonarr),
            "radarr" => Ok(AppType::Radarr),
            other => Err(format!("unknown app type: {}", other)),
        }
    }
}

/// Status of a tracked transfer.
///
/// ```text
/// pending_download -> pending_staging -> in_staging -> completed_* | error_*
/// ```
///
/// Transitions only move forward; going back requires an explicit
/// operator reset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TorrentStatus {
    PendingDownload,
    PendingStaging,
    InStaging,
    CompletedAuto,
    CompletedManual,
    ErrorMissingPath,
    ErrorAutoImport,
    ErrorManualImport,
    ErrorSftpConnection,
}

impl TorrentStatus {
    pub const ALL: [TorrentStatus; 9] = [
        TorrentStatus::PendingDownload,
        TorrentStatus::PendingStaging,
        TorrentStatus::InStaging,
        TorrentStatus::CompletedAuto,
        TorrentStatus::CompletedManual,
        TorrentStatus::ErrorMissingPath,
        TorrentStatus::ErrorAutoImport,
        TorrentStatus::ErrorManualImport,
        TorrentStatus::ErrorSftpConnection,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TorrentStatus::PendingDownload => "pending_download",
            TorrentStatus::PendingStaging => "pending_staging",
            TorrentStatus::InStaging => "in_staging",
            TorrentStatus::CompletedAuto => "completed_auto",
            TorrentStatus::CompletedManual => "completed_manual",
            TorrentStatus::ErrorMissingPath => "error_missing_path",
            TorrentStatus::ErrorAutoImport => "error_auto_import",
            TorrentStatus::ErrorManualImport => "error_manual_import",
            TorrentStatus::ErrorSftpConnection => "error_sftp_connection",
        }
    }

    /// Position in the forward-only order. Terminal statuses share a rank.
    fn rank(&self) -> u8 {
        match self {
            TorrentStatus::PendingDownload => 0,
            TorrentStatus::PendingStaging => 1,
            TorrentStatus::InStaging => 2,
            _ => 3,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.rank() == 3
    }

    pub fn is_error(&self) -> bool {
        matches!(
            self,
            TorrentStatus::ErrorMissingPath
                | TorrentStatus::ErrorAutoImport
                | TorrentStatus::ErrorManualImport
                | TorrentStatus::ErrorSftpConnection
        )
    }

    /// Whether moving from `self` to `next` is a forward transition.
    ///
    /// Staying in the same status is allowed (message refresh). Moving
    /// between two terminal statuses is not.
    pub fn can_advance_to(&self, next: TorrentStatus) -> bool {
        if *self == next {
            return true;
        }
        !self.is_terminal() && next.rank() > self.rank()
    }
}

impl fmt::Display for TorrentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TorrentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TorrentStatus::ALL
            .iter()
            .find(|status| status.as_str() == s)
            .copied()
            .ok_or_else(|| format!("unknown torrent status: {}", s))
    }
}

/// One tracked transfer, keyed by torrent content hash.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TorrentRecord {
    /// Lowercase info hash.
    pub hash: String,
    pub release_name: String,
    pub folder_name: String,
    pub original_name: String,
    pub app_type: AppType,
    /// Catalog entry (series or movie) this transfer belongs to.
    pub target_id: i64,
    pub label: String,
    /// Absolute path on the seedbox. Empty until the daemon reports it.
    #[serde(default)]
    pub remote_path: String,
    pub status: TorrentStatus,
    #[serde(default)]
    pub status_message: String,
    pub added_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TorrentRecord {
    pub fn has_remote_path(&self) -> bool {
        !self.remote_path.trim().is_empty()
    }
}

/// Partial update merged field by field into a record.
#[derive(Debug, Clone, Default)]
pub struct RecordUpdate {
    pub release_name: Option<String>,
    pub folder_name: Option<String>,
    pub original_name: Option<String>,
    pub app_type: Option<AppType>,
    pub target_id: Option<i64>,
    pub label: Option<String>,
    pub remote_path: Option<String>,
    pub status: Option<TorrentStatus>,
    pub status_message: Option<String>,
}

impl RecordUpdate {
    pub fn status(status: TorrentStatus, message: impl Into<String>) -> Self {
        Self {
            status: Some(status),
            status_message: Some(message.into()),
            ..Default::default()
        }
    }

    pub fn with_remote_path(mut self, path: impl Into<String>) -> Self {
        self.remote_path = Some(path.into());
        self
    }
}

/// How strictly a status change is checked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionMode {
    /// Pipeline transitions: forward only.
    Forward,
    /// Operator resets: any status.
    Reset,
}

/// Normalise a hash into its store key.
pub fn normalize_hash(hash: &str) -> String {
    hash.trim().to_lowercase()
}

/// Merge `update` into `existing` (or a new record) and check invariants.
///
/// Shared by every store backend so the rules live in one place:
/// - a new record needs an app type and a target id;
/// - status changes must be forward unless `mode` is `Reset`;
/// - a record without a remote path can only be `pending_staging`.
pub fn merge_record(
    existing: Option<TorrentRecord>,
    hash: &str,
    update: RecordUpdate,
    mode: TransitionMode,
    now: DateTime<Utc>,
) -> Result<TorrentRecord, StoreError> {
    let mut record = match existing {
        Some(record) => record,
        None => {
            let app_type = update
                .app_type
                .ok_or_else(|| StoreError::MissingField {
                    hash: hash.to_string(),
                    field: "app_type",
                })?;
            let target_id = update
                .target_id
                .ok_or_else(|| StoreError::MissingField {
                    hash: hash.to_string(),
                    field: "target_id",
                })?;
            TorrentRecord {
                hash: hash.to_string(),
                release_name: String::new(),
                folder_name: String::new(),
                original_name: String::new(),
                app_type,
                target_id,
                label: String::new(),
                remote_path: String::new(),
                status: update.status.unwrap_or(TorrentStatus::PendingStaging),
                status_message: String::new(),
                added_at: now,
                updated_at: now,
            }
        }
    };

    if let Some(next) = update.status {
        if mode == TransitionMode::Forward && !record.status.can_advance_to(next) {
            return Err(StoreError::InvalidTransition {
                hash: hash.to_string(),
                from: record.status,
                to: next,
            });
        }
        record.status = next;
    }

    if let Some(v) = update.release_name {
        record.release_name = v;
    }
    if let Some(v) = update.folder_name {
        record.folder_name = v;
    }
    if let Some(v) = update.original_name {
        record.original_name = v;
    }
    if let Some(v) = update.app_type {
        record.app_type = v;
    }
    if let Some(v) = update.target_id {
        record.target_id = v;
    }
    if let Some(v) = update.label {
        record.label = v;
    }
    if let Some(v) = update.remote_path {
        record.remote_path = v;
    }
    if let Some(v) = update.status_message {
        record.status_message = v;
    }

    if !record.has_remote_path() && record.status != TorrentStatus::PendingStaging {
        return Err(StoreError::RemotePathRequired {
            hash: hash.to_string(),
            status: record.status,
        });
    }

    record.updated_at = now;
    Ok(record)
}
