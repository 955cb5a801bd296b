//! Types for bulk moves.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::store::AppType;

/// Errors returned when starting a batch.
#[derive(Debug, Error)]
pub enum BulkMoveError {
    /// Another batch is still running.
    #[error("bulk move {task_id} is already running")]
    Busy { task_id: String },

    /// The batch has no items.
    #[error("bulk move needs at least one item")]
    Empty,

    /// An item targets an app with no configured catalog.
    #[error("no {0} catalog configured")]
    NoCatalog(AppType),
}

/// One catalog entry to move.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoveItem {
    /// Series or movie id in its catalog.
    pub media_id: i64,
    pub app_type: AppType,
    /// New root folder.
    pub destination_path: String,
    /// Media server section to refresh once the batch succeeds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plex_ref_key: Option<String>,
}

/// Lifecycle of a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchState {
    Running,
    Succeeded,
    Failed,
}

/// A move confirmed by its source folder disappearing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompletedMove {
    pub media_id: i64,
    pub app_type: AppType,
    pub source_path: String,
    pub destination_path: String,
    pub duration_ms: u64,
    pub completed_at: DateTime<Utc>,
}

/// A move that failed and stopped its batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedMove {
    pub media_id: i64,
    pub app_type: AppType,
    /// Folder recorded before the move, if it was read.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_path: Option<String>,
    pub error: String,
}

/// Answer to a status poll.
///
/// `completed` holds only moves finished since the previous poll;
/// `failures` is always complete.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MoveStatus {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<BatchState>,
    pub running: bool,
    pub total: usize,
    pub processed: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub completed: Vec<CompletedMove>,
    pub failures: Vec<FailedMove>,
    /// Media server sections refreshed after success.
    pub refreshed_sections: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}
