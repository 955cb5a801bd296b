//! SQLite-backed state store implementation.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, TransactionBehavior};
use tracing::error;

use super::{
    merge_record, normalize_hash, AppType, RecordUpdate, StateStore, StoreError, TorrentRecord,
    TorrentStatus, TransitionMode,
};

const RECORD_COLUMNS: &str = "hash, release_name, folder_name, original_name, app_type, \
     target_id, label, remote_path, status, status_message, added_at, updated_at";

/// SQLite-backed state store.
pub struct SqliteStateStore {
    conn: Mutex<Connection>,
    path: PathBuf,
}

impl SqliteStateStore {
    /// Open (or create) the database at `path`.
    ///
    /// A file that is not a usable database is renamed to
    /// `<name>.corrupt-<timestamp>` and a fresh database is created.
    pub fn new(path: &Path, lock_timeout: Duration) -> Result<Self, StoreError> {
        let conn = match Self::open(path, lock_timeout) {
            Ok(conn) => conn,
            Err(e) if is_corruption(&e) => {
                let backup = corrupt_backup_path(path);
                error!(
                    path = %path.display(),
                    error = %e,
                    "State database is corrupt, moving it to {} and starting empty",
                    backup.display()
                );
                std::fs::rename(path, &backup)?;
                Self::open(path, lock_timeout).map_err(|e| map_sqlite_error(e, path))?
            }
            Err(e) => return Err(map_sqlite_error(e, path)),
        };

        Ok(Self {
            conn: Mutex::new(conn),
            path: path.to_path_buf(),
        })
    }

    fn open(path: &Path, lock_timeout: Duration) -> rusqlite::Result<Connection> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(lock_timeout)?;
        Self::initialize_schema(&conn)?;
        Ok(conn)
    }

    fn initialize_schema(conn: &Connection) -> rusqlite::Result<()> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS torrents (
                hash TEXT PRIMARY KEY,
                release_name TEXT NOT NULL,
                folder_name TEXT NOT NULL,
                original_name TEXT NOT NULL,
                app_type TEXT NOT NULL,
                target_id INTEGER NOT NULL,
                label TEXT NOT NULL,
                remote_path TEXT NOT NULL DEFAULT '',
                status TEXT NOT NULL,
                status_message TEXT NOT NULL DEFAULT '',
                added_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_torrents_status ON torrents(status);

            CREATE TABLE IF NOT EXISTS ignored (
                hash TEXT PRIMARY KEY
            );
            "#,
        )
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn
            .lock()
            .map_err(|_| StoreError::Database("connection mutex poisoned".to_string()))
    }

    fn sql_err(&self, e: rusqlite::Error) -> StoreError {
        map_sqlite_error(e, &self.path)
    }

    /// Read-modify-write of one record inside an immediate transaction.
    fn modify(
        &self,
        hash: &str,
        update: RecordUpdate,
        mode: TransitionMode,
        must_exist: bool,
    ) -> Result<TorrentRecord, StoreError> {
        let key = normalize_hash(hash);
        let mut conn = self.conn()?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(|e| self.sql_err(e))?;

        let existing = tx
            .query_row(
                &format!("SELECT {} FROM torrents WHERE hash = ?", RECORD_COLUMNS),
                params![key],
                RawRecord::from_row,
            )
            .optional()
            .map_err(|e| self.sql_err(e))?
            .map(RawRecord::into_record)
            .transpose()?;

        if must_exist && existing.is_none() {
            return Err(StoreError::NotFound(key));
        }

        let record = merge_record(existing, &key, update, mode, Utc::now())?;

        tx.execute(
            &format!(
                "INSERT OR REPLACE INTO torrents ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                RECORD_COLUMNS
            ),
            params![
                record.hash,
                record.release_name,
                record.folder_name,
                record.original_name,
                record.app_type.as_str(),
                record.target_id,
                record.label,
                record.remote_path,
                record.status.as_str(),
                record.status_message,
                record.added_at.to_rfc3339(),
                record.updated_at.to_rfc3339(),
            ],
        )
        .map_err(|e| self.sql_err(e))?;
        tx.commit().map_err(|e| self.sql_err(e))?;

        Ok(record)
    }
}

impl StateStore for SqliteStateStore {
    fn get(&self, hash: &str) -> Result<Option<TorrentRecord>, StoreError> {
        let conn = self.conn()?;
        conn.query_row(
            &format!("SELECT {} FROM torrents WHERE hash = ?", RECORD_COLUMNS),
            params![normalize_hash(hash)],
            RawRecord::from_row,
        )
        .optional()
        .map_err(|e| self.sql_err(e))?
        .map(RawRecord::into_record)
        .transpose()
    }

    fn upsert(&self, hash: &str, update: RecordUpdate) -> Result<TorrentRecord, StoreError> {
        self.modify(hash, update, TransitionMode::Forward, false)
    }

    fn set_status(
        &self,
        hash: &str,
        status: TorrentStatus,
        message: &str,
    ) -> Result<TorrentRecord, StoreError> {
        self.modify(
            hash,
            RecordUpdate::status(status, message),
            TransitionMode::Forward,
            true,
        )
    }

    fn reset_status(
        &self,
        hash: &str,
        status: TorrentStatus,
        message: &str,
    ) -> Result<TorrentRecord, StoreError> {
        self.modify(
            hash,
            RecordUpdate::status(status, message),
            TransitionMode::Reset,
            true,
        )
    }

    fn remove(&self, hash: &str) -> Result<Option<TorrentRecord>, StoreError> {
        let key = normalize_hash(hash);
        let mut conn = self.conn()?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(|e| self.sql_err(e))?;

        let existing = tx
            .query_row(
                &format!("SELECT {} FROM torrents WHERE hash = ?", RECORD_COLUMNS),
                params![key],
                RawRecord::from_row,
            )
            .optional()
            .map_err(|e| self.sql_err(e))?;

        if existing.is_some() {
            tx.execute("DELETE FROM torrents WHERE hash = ?", params![key])
                .map_err(|e| self.sql_err(e))?;
        }
        tx.commit().map_err(|e| self.sql_err(e))?;

        existing.map(RawRecord::into_record).transpose()
    }

    fn list_all(&self) -> Result<Vec<TorrentRecord>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {} FROM torrents ORDER BY hash",
                RECORD_COLUMNS
            ))
            .map_err(|e| self.sql_err(e))?;

        let rows = stmt
            .query_map([], RawRecord::from_row)
            .map_err(|e| self.sql_err(e))?;

        let mut records = Vec::new();
        for row in rows {
            records.push(row.map_err(|e| self.sql_err(e))?.into_record()?);
        }
        Ok(records)
    }

    fn list_by_status(
        &self,
        statuses: &[TorrentStatus],
    ) -> Result<Vec<TorrentRecord>, StoreError> {
        if statuses.is_empty() {
            return Ok(Vec::new());
        }

        let placeholders = vec!["?"; statuses.len()].join(", ");
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {} FROM torrents WHERE status IN ({}) ORDER BY hash",
                RECORD_COLUMNS, placeholders
            ))
            .map_err(|e| self.sql_err(e))?;

        let names: Vec<&str> = statuses.iter().map(|s| s.as_str()).collect();
        let rows = stmt
            .query_map(rusqlite::params_from_iter(names), RawRecord::from_row)
            .map_err(|e| self.sql_err(e))?;

        let mut records = Vec::new();
        for row in rows {
            records.push(row.map_err(|e| self.sql_err(e))?.into_record()?);
        }
        Ok(records)
    }

    fn ignore_add(&self, hash: &str) -> Result<bool, StoreError> {
        let conn = self.conn()?;
        let inserted = conn
            .execute(
                "INSERT OR IGNORE INTO ignored (hash) VALUES (?)",
                params![normalize_hash(hash)],
            )
            .map_err(|e| self.sql_err(e))?;
        Ok(inserted > 0)
    }

    fn ignore_contains(&self, hash: &str) -> Result<bool, StoreError> {
        let conn = self.conn()?;
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM ignored WHERE hash = ?",
                params![normalize_hash(hash)],
                |row| row.get(0),
            )
            .map_err(|e| self.sql_err(e))?;
        Ok(count > 0)
    }

    fn ignore_remove(&self, hash: &str) -> Result<bool, StoreError> {
        let conn = self.conn()?;
        let removed = conn
            .execute(
                "DELETE FROM ignored WHERE hash = ?",
                params![normalize_hash(hash)],
            )
            .map_err(|e| self.sql_err(e))?;
        Ok(removed > 0)
    }

    fn ignored(&self) -> Result<Vec<String>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare("SELECT hash FROM ignored ORDER BY hash")
            .map_err(|e| self.sql_err(e))?;
        let rows = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .map_err(|e| self.sql_err(e))?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| self.sql_err(e))
    }
}

/// Row as stored, before enum and timestamp parsing.
struct RawRecord {
    hash: String,
    release_name: String,
    folder_name: String,
    original_name: String,
    app_type: String,
    target_id: i64,
    label: String,
    remote_path: String,
    status: String,
    status_message: String,
    added_at: String,
    updated_at: String,
}

impl RawRecord {
    fn from_row(row: &rusqlite::Row) -> rusqlite::Result<Self> {
        Ok(Self {
            hash: row.get(0)?,
            release_name: row.get(1)?,
            folder_name: row.get(2)?,
            original_name: row.get(3)?,
            app_type: row.get(4)?,
            target_id: row.get(5)?,
            label: row.get(6)?,
            remote_path: row.get(7)?,
            status: row.get(8)?,
            status_message: row.get(9)?,
            added_at: row.get(10)?,
            updated_at: row.get(11)?,
        })
    }

    fn into_record(self) -> Result<TorrentRecord, StoreError> {
        let app_type = self
            .app_type
            .parse::<AppType>()
            .map_err(StoreError::Database)?;
        let status = self
            .status
            .parse::<TorrentStatus>()
            .map_err(StoreError::Database)?;

        Ok(TorrentRecord {
            hash: self.hash,
            release_name: self.release_name,
            folder_name: self.folder_name,
            original_name: self.original_name,
            app_type,
            target_id: self.target_id,
            label: self.label,
            remote_path: self.remote_path,
            status,
            status_message: self.status_message,
            added_at: parse_timestamp(&self.added_at),
            updated_at: parse_timestamp(&self.updated_at),
        })
    }
}

fn parse_timestamp(value: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn is_corruption(e: &rusqlite::Error) -> bool {
    matches!(
        e.sqlite_error_code(),
        Some(ErrorCode::NotADatabase) | Some(ErrorCode::DatabaseCorrupt)
    )
}

fn map_sqlite_error(e: rusqlite::Error, path: &Path) -> StoreError {
    match e.sqlite_error_code() {
        Some(ErrorCode::DatabaseBusy) | Some(ErrorCode::DatabaseLocked) => {
            StoreError::LockTimeout {
                path: path.to_path_buf(),
                waited_ms: 0,
            }
        }
        _ => StoreError::Database(e.to_string()),
    }
}

fn corrupt_backup_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(format!(".corrupt-{}", Utc::now().format("%Y%m%d%H%M%S")));
    path.with_file_name(name)
}
