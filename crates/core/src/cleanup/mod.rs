//! Conservative pruning of emptied directories.
//!
//! [`CleanupGuard::cleanup`] walks upward from a path, deleting each
//! directory that holds nothing but orphan files (`.nfo`, `Thumbs.db`, ...)
//! and stopping at the first directory that:
//! - is a library root,
//! - lies outside every guard path of the [`CleanupBoundary`],
//! - still holds real content.
//!
//! The boundary is derived from the catalogs' current root folders on
//! every call; nothing here caches it.

mod boundary;
mod guard;

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use boundary::{normalize_path, CleanupBoundary};
pub use guard::CleanupGuard;

/// Cleanup configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CleanupConfig {
    /// File names or extensions (leading dot) that never count as content.
    #[serde(default = "default_orphan_extensions")]
    pub orphan_extensions: Vec<String>,

    /// Maximum number of levels walked upward, and maximum nesting
    /// examined when deciding whether a directory is ignorable.
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,

    /// Only report what would be deleted.
    #[serde(default)]
    pub dry_run: bool,
}

fn default_orphan_extensions() -> Vec<String> {
    [
        ".nfo", ".txt", ".jpg", ".jpeg", ".png", ".sfv", ".srr", ".url", ".nzb", ".srt",
        ".sub", ".idx", "Thumbs.db", ".DS_Store",
    ]
    .into_iter()
    .map(str::to_string)
    .collect()
}

fn default_max_depth() -> usize {
    5
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            orphan_extensions: default_orphan_extensions(),
            max_depth: default_max_depth(),
            dry_run: false,
        }
    }
}

impl CleanupConfig {
    /// Whether a file called `name` is an orphan.
    pub fn is_orphan(&self, name: &str) -> bool {
        let lower = name.to_lowercase();
        self.orphan_extensions.iter().any(|pattern| {
            let pattern = pattern.to_lowercase();
            lower == pattern || (pattern.starts_with('.') && lower.ends_with(&pattern))
        })
    }
}

/// Errors from operator-driven deletes.
#[derive(Debug, Error)]
pub enum CleanupError {
    #[error("path does not exist: {0}")]
    NotFound(PathBuf),

    #[error("refusing to delete library root {0}")]
    LibraryRoot(PathBuf),

    #[error("refusing to delete {0}: outside every library volume")]
    OutsideBoundary(PathBuf),

    #[error("no library roots known; refusing to delete anything")]
    NoBoundary,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Why an upward walk stopped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", content = "detail", rename_all = "snake_case")]
pub enum StopReason {
    NotADirectory,
    LibraryRoot,
    OutsideGuard,
    HasContent,
    MaxDepth,
    FilesystemRoot,
    Error(String),
}

impl StopReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            StopReason::NotADirectory => "not_a_directory",
            StopReason::LibraryRoot => "library_root",
            StopReason::OutsideGuard => "outside_guard",
            StopReason::HasContent => "has_content",
            StopReason::MaxDepth => "max_depth",
            StopReason::FilesystemRoot => "filesystem_root",
            StopReason::Error(_) => "error",
        }
    }
}

/// Outcome of one cleanup walk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CleanupReport {
    pub dry_run: bool,
    /// Directories deleted, or that would be deleted in dry-run, in order.
    pub deleted: Vec<PathBuf>,
    /// Last path examined.
    pub stopped_at: PathBuf,
    pub stop_reason: StopReason,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_orphan() {
        let config = CleanupConfig::default();
        assert!(config.is_orphan("movie.NFO"));
        assert!(config.is_orphan("Thumbs.db"));
        assert!(config.is_orphan(".DS_Store"));
        assert!(!config.is_orphan("movie.mkv"));
        assert!(!config.is_orphan("nfo"));
    }

    #[test]
    fn test_config_defaults_from_toml() {
        let config: CleanupConfig = toml::from_str("dry_run = true").unwrap();
        assert!(config.dry_run);
        assert_eq!(config.max_depth, 5);
        assert!(config.orphan_extensions.contains(&".nfo".to_string()));
    }
}
