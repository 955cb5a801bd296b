//! Seedbox filesystem access over SSH/SFTP.
//!
//! A [`RemoteConnector`] opens one [`RemoteSession`] per job cycle. The
//! session is not pooled: each cycle connects, works and drops it.

mod mirror;
mod ssh;

use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use mirror::{mirror, MirrorStats};
pub use ssh::{SshConnector, SshSession};

/// Errors from the remote side.
#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("connection failed: {0}")]
    Connect(String),

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("remote path not found: {0}")]
    NotFound(String),

    #[error("sftp error: {0}")]
    Sftp(String),

    #[error("remote command `{command}` exited with {status}: {output}")]
    CommandFailed {
        command: String,
        status: i32,
        output: String,
    },

    #[error("local I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl RemoteError {
    /// The server positively said the path does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, RemoteError::NotFound(_))
    }
}

/// Kind of a remote filesystem entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemoteKind {
    File,
    Dir,
}

/// One entry of a remote directory listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteEntry {
    pub name: String,
    /// Absolute remote path.
    pub path: String,
    pub kind: RemoteKind,
    pub size: u64,
}

/// Opens sessions to the seedbox.
#[async_trait]
pub trait RemoteConnector: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn RemoteSession>, RemoteError>;
}

/// An open SSH/SFTP session.
#[async_trait]
pub trait RemoteSession: Send + Sync {
    /// Kind of the entry at `path`, or `None` if it does not exist.
    async fn stat(&self, path: &str) -> Result<Option<RemoteKind>, RemoteError>;

    /// Entries of the directory at `path` (without `.` and `..`).
    async fn list_dir(&self, path: &str) -> Result<Vec<RemoteEntry>, RemoteError>;

    /// Copy a remote file to `local`, creating parent directories.
    /// Returns the number of bytes written.
    async fn download_file(&self, remote: &str, local: &Path) -> Result<u64, RemoteError>;

    /// Run a shell command and return its stdout.
    async fn exec(&self, command: &str) -> Result<String, RemoteError>;
}

/// Join a remote directory and a child name with `/`.
pub fn join_remote(dir: &str, name: &str) -> String {
    format!("{}/{}", dir.trim_end_matches('/'), name.trim_start_matches('/'))
}

/// Final path component of a remote path.
pub fn remote_basename(path: &str) -> &str {
    let trimmed = path.trim_end_matches('/');
    trimmed.rsplit('/').next().unwrap_or(trimmed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_remote() {
        assert_eq!(join_remote("/seed/", "Show"), "/seed/Show");
        assert_eq!(join_remote("/seed", "/a.mkv"), "/seed/a.mkv");
    }

    #[test]
    fn test_remote_basename() {
        assert_eq!(remote_basename("/seed/Show.S01E01/"), "Show.S01E01");
        assert_eq!(remote_basename("/seed/movie.mkv"), "movie.mkv");
        assert_eq!(remote_basename("single"), "single");
    }
}
