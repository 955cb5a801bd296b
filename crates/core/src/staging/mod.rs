//! The staging pipeline.
//!
//! [`StagingProcessor`] drives each record through
//! `pending_staging -> in_staging -> completed_* | error_*`:
//!
//! 1. **Transfer**: mirror the remote path into `staging.root/<folder_name>`
//!    over one SFTP session shared by the whole cycle.
//! 2. **Import**: if the catalog's queue knows the hash, ask the catalog to
//!    import from the staged path; otherwise copy the video files into the
//!    entry's folder ourselves, prune the staging tree and request a rescan.
//!
//! Each step returns a [`StepError`] whose [`Retryability`] decides whether
//! the record is held for the next cycle or moved to a terminal error.

mod import;
mod processor;

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::store::TorrentStatus;

pub use import::{
    collect_video_files, copy_into_library, destination_for, season_folder, ImportError,
    ImportedFile,
};
pub use processor::{StagingProcessor, STAGING_LOCK};

/// Staging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StagingConfig {
    /// Local directory receiving transfers. Treated as a library root by
    /// cleanup, so it is never deleted itself.
    pub root: PathBuf,

    /// File extensions (leading dot) that count as video.
    #[serde(default = "default_video_extensions")]
    pub video_extensions: Vec<String>,

    /// Hash each manual-import copy and compare it with its source.
    #[serde(default)]
    pub verify_checksums: bool,
}

fn default_video_extensions() -> Vec<String> {
    [
        ".mkv", ".mp4", ".avi", ".m4v", ".mov", ".wmv", ".ts", ".m2ts", ".webm", ".mpg",
        ".mpeg",
    ]
    .into_iter()
    .map(str::to_string)
    .collect()
}

impl StagingConfig {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            video_extensions: default_video_extensions(),
            verify_checksums: false,
        }
    }

    pub fn is_video(&self, name: &str) -> bool {
        let lower = name.to_lowercase();
        self.video_extensions
            .iter()
            .any(|ext| lower.ends_with(&ext.to_lowercase()))
    }
}

/// What to do with a record after a failed step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Retryability {
    /// Leave the record as it is; the next cycle tries again.
    Hold,
    /// Move the record to this error status.
    Terminal(TorrentStatus),
}

/// Failure of one pipeline step for one record.
#[derive(Debug, Error)]
pub enum StepError {
    #[error("{0}")]
    Transient(String),

    #[error("{message}")]
    Terminal {
        status: TorrentStatus,
        message: String,
    },
}

impl StepError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient(message.into())
    }

    pub fn terminal(status: TorrentStatus, message: impl Into<String>) -> Self {
        Self::Terminal {
            status,
            message: message.into(),
        }
    }

    pub fn retryability(&self) -> Retryability {
        match self {
            StepError::Transient(_) => Retryability::Hold,
            StepError::Terminal { status, .. } => Retryability::Terminal(*status),
        }
    }
}

/// What one staging cycle did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StagingReport {
    /// Another cycle held the lock; nothing was done.
    pub skipped_locked: bool,
    /// `pending_staging` records still waiting for a remote path.
    pub waiting_for_path: usize,
    pub transferred: usize,
    pub bytes_transferred: u64,
    pub completed_auto: usize,
    pub completed_manual: usize,
    /// Records left unchanged after a transient failure.
    pub held: usize,
    /// Records moved to an `error_*` status this cycle.
    pub failed: usize,
    pub errors: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_video() {
        let config = StagingConfig::new("/data/staging");
        assert!(config.is_video("Show.S01E01.MKV"));
        assert!(config.is_video("movie.m2ts"));
        assert!(!config.is_video("movie.nfo"));
        assert!(!config.is_video("mkv"));
    }

    #[test]
    fn test_step_error_retryability() {
        assert_eq!(
            StepError::transient("timeout").retryability(),
            Retryability::Hold
        );
        assert_eq!(
            StepError::terminal(TorrentStatus::ErrorMissingPath, "gone").retryability(),
            Retryability::Terminal(TorrentStatus::ErrorMissingPath)
        );
    }

    #[test]
    fn test_config_defaults_from_toml() {
        let config: StagingConfig = toml::from_str(r#"root = "/data/staging""#).unwrap();
        assert_eq!(config.root, PathBuf::from("/data/staging"));
        assert!(!config.verify_checksums);
        assert!(config.video_extensions.contains(&".mkv".to_string()));
    }
}
