//! Named run-locks that keep periodic jobs from overlapping.
//!
//! A lock is a marker file `<dir>/<name>.running` created with
//! `create_new`. Whoever creates it owns the run; everyone else sees
//! [`RunLockError::Busy`] and returns without doing anything. The marker
//! is removed when the [`RunLock`] guard drops.

use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum RunLockError {
    #[error("{name} is already running (since {since:?})")]
    Busy {
        name: String,
        since: Option<DateTime<Utc>>,
    },

    #[error("run-lock I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Contents of a marker file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunLockMarker {
    pub pid: u32,
    pub started_at: DateTime<Utc>,
}

/// Factory for run-locks sharing a directory and staleness limit.
#[derive(Debug, Clone)]
pub struct RunLocks {
    dir: PathBuf,
    stale_after: Duration,
}

impl RunLocks {
    pub fn new(dir: impl Into<PathBuf>, stale_after: Duration) -> Self {
        Self {
            dir: dir.into(),
            stale_after,
        }
    }

    /// Try to take the lock called `name`.
    ///
    /// A marker older than the staleness limit is left over from a crashed
    /// run and is reclaimed.
    pub fn acquire(&self, name: &str) -> Result<RunLock, RunLockError> {
        fs::create_dir_all(&self.dir)?;
        let path = self.dir.join(format!("{}.running", name));

        match create_marker(&path) {
            Ok(lock) => return Ok(lock),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {}
            Err(e) => return Err(e.into()),
        }

        let since = marker_started_at(&path);
        let age = since
            .map(|started| (Utc::now() - started).to_std().unwrap_or_default())
            .unwrap_or_default();

        if since.is_some() && age > self.stale_after {
            warn!(
                lock = %name,
                age_secs = age.as_secs(),
                "Reclaiming stale run-lock left by an earlier run"
            );
            match fs::remove_file(&path) {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
            return match create_marker(&path) {
                Ok(lock) => Ok(lock),
                Err(e) if e.kind() == ErrorKind::AlreadyExists => Err(RunLockError::Busy {
                    name: name.to_string(),
                    since: marker_started_at(&path),
                }),
                Err(e) => Err(e.into()),
            };
        }

        Err(RunLockError::Busy {
            name: name.to_string(),
            since,
        })
    }
}

/// Held run-lock. Dropping it removes the marker.
#[derive(Debug)]
pub struct RunLock {
    path: PathBuf,
}

impl RunLock {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            warn!("Failed to remove run-lock {}: {}", self.path.display(), e);
        } else {
            debug!("Released run-lock {}", self.path.display());
        }
    }
}

fn create_marker(path: &Path) -> std::io::Result<RunLock> {
    let mut file = OpenOptions::new().write(true).create_new(true).open(path)?;
    let marker = RunLockMarker {
        pid: std::process::id(),
        started_at: Utc::now(),
    };
    let body = serde_json::to_vec(&marker)?;
    file.write_all(&body)?;
    Ok(RunLock {
        path: path.to_path_buf(),
    })
}

/// Start time of an existing marker. Falls back to the file's mtime when
/// the marker body is unreadable.
fn marker_started_at(path: &Path) -> Option<DateTime<Utc>> {
    if let Ok(bytes) = fs::read(path) {
        if let Ok(marker) = serde_json::from_slice::<RunLockMarker>(&bytes) {
            return Some(marker.started_at);
        }
    }
    fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .map(DateTime::<Utc>::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_second_acquire_is_busy() {
        let temp = TempDir::new().unwrap();
        let locks = RunLocks::new(temp.path(), Duration::from_secs(3600));

        let held = locks.acquire("scanner").unwrap();
        assert!(held.path().exists());
        assert!(matches!(
            locks.acquire("scanner"),
            Err(RunLockError::Busy { .. })
        ));

        // Different names do not contend
        let _other = locks.acquire("staging").unwrap();
    }

    #[test]
    fn test_drop_releases() {
        let temp = TempDir::new().unwrap();
        let locks = RunLocks::new(temp.path(), Duration::from_secs(3600));

        let held = locks.acquire("scanner").unwrap();
        let path = held.path().to_path_buf();
        drop(held);
        assert!(!path.exists());
        assert!(locks.acquire("scanner").is_ok());
    }

    #[test]
    fn test_stale_marker_is_reclaimed() {
        let temp = TempDir::new().unwrap();
        let locks = RunLocks::new(temp.path(), Duration::from_secs(60));

        let marker = RunLockMarker {
            pid: 1,
            started_at: Utc::now() - chrono::Duration::hours(2),
        };
        fs::write(
            temp.path().join("eviction.running"),
            serde_json::to_vec(&marker).unwrap(),
        )
        .unwrap();

        let lock = locks.acquire("eviction").unwrap();
        let body: RunLockMarker =
            serde_json::from_slice(&fs::read(lock.path()).unwrap()).unwrap();
        assert_eq!(body.pid, std::process::id());
    }

    #[test]
    fn test_fresh_foreign_marker_is_respected() {
        let temp = TempDir::new().unwrap();
        let locks = RunLocks::new(temp.path(), Duration::from_secs(3600));
        let marker = RunLockMarker {
            pid: 1,
            started_at: Utc::now(),
        };
        fs::write(
            temp.path().join("staging.running"),
            serde_json::to_vec(&marker).unwrap(),
        )
        .unwrap();

        match locks.acquire("staging") {
            Err(RunLockError::Busy { since, .. }) => assert!(since.is_some()),
            other => panic!("expected busy, got {:?}", other.map(|l| l.path().to_path_buf())),
        }
    }
}
