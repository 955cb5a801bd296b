//! Durable record of every tracked transfer plus the ignore set.
//!
//! Two backends implement [`StateStore`]:
//! - [`JsonStateStore`]: one JSON document per concern, each behind an
//!   exclusive lock file. A damaged document reads as empty.
//! - [`SqliteStateStore`]: a single SQLite database. A damaged database is
//!   moved aside and recreated empty.
//!
//! Either way the store degrades to "empty" instead of failing: losing
//! the cache only means the next scan rediscovers finished torrents.

mod document;
mod json_store;
mod sqlite_store;
mod types;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

pub use document::LockedDocument;
pub use json_store::JsonStateStore;
pub use sqlite_store::SqliteStateStore;
pub use types::{
    merge_record, normalize_hash, AppType, RecordUpdate, TorrentRecord, TorrentStatus,
    TransitionMode,
};

use crate::config::{StateBackend, StateConfig};

/// Errors from the state store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The store lock was not acquired within the configured wait.
    #[error("timed out after {waited_ms}ms waiting for lock {path}")]
    LockTimeout { path: PathBuf, waited_ms: u64 },

    #[error("record not found: {0}")]
    NotFound(String),

    #[error("cannot move {hash} from {from} to {to}")]
    InvalidTransition {
        hash: String,
        from: TorrentStatus,
        to: TorrentStatus,
    },

    #[error("record {hash} has no remote path and cannot be {status}")]
    RemotePathRequired { hash: String, status: TorrentStatus },

    #[error("new record {hash} is missing {field}")]
    MissingField { hash: String, field: &'static str },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("database error: {0}")]
    Database(String),
}

/// Storage contract shared by all backends.
///
/// Every mutating call is a locked read-modify-write of the whole record
/// set, so concurrent writers from other processes never interleave.
pub trait StateStore: Send + Sync {
    /// Get a record by hash.
    fn get(&self, hash: &str) -> Result<Option<TorrentRecord>, StoreError>;

    /// Merge `update` into the record for `hash`, creating it if needed.
    fn upsert(&self, hash: &str, update: RecordUpdate) -> Result<TorrentRecord, StoreError>;

    /// Move a record forward to `status`.
    fn set_status(
        &self,
        hash: &str,
        status: TorrentStatus,
        message: &str,
    ) -> Result<TorrentRecord, StoreError>;

    /// Operator reset: set `status` regardless of the current one.
    fn reset_status(
        &self,
        hash: &str,
        status: TorrentStatus,
        message: &str,
    ) -> Result<TorrentRecord, StoreError>;

    /// Hard delete. Returns the removed record, if any.
    fn remove(&self, hash: &str) -> Result<Option<TorrentRecord>, StoreError>;

    /// All records, ordered by hash.
    fn list_all(&self) -> Result<Vec<TorrentRecord>, StoreError>;

    /// Records whose status is in `statuses`.
    fn list_by_status(
        &self,
        statuses: &[TorrentStatus],
    ) -> Result<Vec<TorrentRecord>, StoreError> {
        Ok(self
            .list_all()?
            .into_iter()
            .filter(|r| statuses.contains(&r.status))
            .collect())
    }

    /// Add a hash to the ignore set. Returns false if it was already there.
    fn ignore_add(&self, hash: &str) -> Result<bool, StoreError>;

    fn ignore_contains(&self, hash: &str) -> Result<bool, StoreError>;

    /// Remove a hash from the ignore set. Returns false if it was absent.
    fn ignore_remove(&self, hash: &str) -> Result<bool, StoreError>;

    /// All ignored hashes, sorted.
    fn ignored(&self) -> Result<Vec<String>, StoreError>;
}

/// Open the configured backend under `config.dir`.
pub fn open_state_store(config: &StateConfig) -> Result<Arc<dyn StateStore>, StoreError> {
    let timeout = Duration::from_millis(config.lock_timeout_ms);
    std::fs::create_dir_all(&config.dir)?;
    let store: Arc<dyn StateStore> = match config.backend {
        StateBackend::Json => Arc::new(JsonStateStore::new(&config.dir, timeout)),
        StateBackend::Sqlite => Arc::new(SqliteStateStore::new(
            &config.dir.join("seedsync.db"),
            timeout,
        )?),
    };
    Ok(store)
}
