use std::collections::HashSet;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::metrics;

use super::{normalize_path, CleanupBoundary, CleanupConfig, CleanupError, CleanupReport, StopReason};

/// Deletes emptied directories inside a [`CleanupBoundary`].
///
/// Real and dry-run mode run the same walk. In dry-run, paths that would
/// be deleted are remembered and treated as absent for the rest of the
/// walk, so both modes make identical decisions.
#[derive(Debug, Clone)]
pub struct CleanupGuard {
    config: CleanupConfig,
}

/// Mutable state of one walk.
struct Walk {
    dry_run: bool,
    removed: HashSet<PathBuf>,
    deleted: Vec<PathBuf>,
}

impl Walk {
    fn finish(self, stopped_at: PathBuf, stop_reason: StopReason) -> CleanupReport {
        metrics::CLEANUP_STOPS
            .with_label_values(&[stop_reason.as_str()])
            .inc();
        CleanupReport {
            dry_run: self.dry_run,
            deleted: self.deleted,
            stopped_at,
            stop_reason,
        }
    }

    fn exists(&self, path: &Path) -> bool {
        !self.removed.contains(path) && path.symlink_metadata().is_ok()
    }
}

impl CleanupGuard {
    pub fn new(config: CleanupConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &CleanupConfig {
        &self.config
    }

    pub fn is_dry_run(&self) -> bool {
        self.config.dry_run
    }

    /// Prune `path` and its ancestors while they hold nothing but orphans.
    pub fn cleanup(&self, path: &Path, boundary: &CleanupBoundary) -> CleanupReport {
        let walk = Walk {
            dry_run: self.config.dry_run,
            removed: HashSet::new(),
            deleted: Vec::new(),
        };
        self.walk(walk, normalize_path(path), 0, boundary)
    }

    /// Operator delete: remove `path` whatever it contains, then prune its
    /// parents like [`cleanup`](Self::cleanup).
    ///
    /// Refused when no boundary is known, when `path` is or holds a library
    /// root and when it lies outside every guard path.
    pub fn remove_path_and_prune(
        &self,
        path: &Path,
        boundary: &CleanupBoundary,
    ) -> Result<CleanupReport, CleanupError> {
        if boundary.guard_paths.is_empty() {
            return Err(CleanupError::NoBoundary);
        }

        let path = normalize_path(path);
        if boundary.is_library_root(&path) || boundary.contains_library_root(&path) {
            return Err(CleanupError::LibraryRoot(path));
        }
        if !boundary.within_guard(&path) {
            warn!(
                "Refusing operator delete of {}: outside library volumes",
                path.display()
            );
            return Err(CleanupError::OutsideBoundary(path));
        }

        let meta = match path.symlink_metadata() {
            Ok(meta) => meta,
            Err(e) if e.kind() == ErrorKind::NotFound => return Err(CleanupError::NotFound(path)),
            Err(e) => return Err(e.into()),
        };

        let mut walk = Walk {
            dry_run: self.config.dry_run,
            removed: HashSet::new(),
            deleted: Vec::new(),
        };

        if walk.dry_run {
            info!("[dry-run] Would delete {}", path.display());
        } else {
            if meta.is_dir() {
                fs::remove_dir_all(&path)?;
            } else {
                fs::remove_file(&path)?;
            }
            info!("Deleted {}", path.display());
        }
        self.record_delete(&mut walk, path.clone());

        let Some(parent) = path.parent().map(Path::to_path_buf) else {
            return Ok(walk.finish(path, StopReason::FilesystemRoot));
        };
        Ok(self.walk(walk, parent, 1, boundary))
    }

    fn record_delete(&self, walk: &mut Walk, path: PathBuf) {
        let mode = if walk.dry_run { "dry_run" } else { "real" };
        metrics::CLEANUP_DIRS_DELETED.with_label_values(&[mode]).inc();
        walk.removed.insert(path.clone());
        walk.deleted.push(path);
    }

    fn walk(
        &self,
        mut walk: Walk,
        mut current: PathBuf,
        mut depth: usize,
        boundary: &CleanupBoundary,
    ) -> CleanupReport {
        loop {
            if walk.exists(&current) {
                if !current.is_dir() || current.is_symlink() {
                    return walk.finish(current, StopReason::NotADirectory);
                }

                if boundary.is_library_root(&current) {
                    debug!("Cleanup reached library root {}", current.display());
                    return walk.finish(current, StopReason::LibraryRoot);
                }
                if boundary.contains_library_root(&current) {
                    debug!("Cleanup reached {}, which holds a library root", current.display());
                    return walk.finish(current, StopReason::LibraryRoot);
                }

                if !boundary.within_guard(&current) {
                    warn!(
                        "Refusing to clean up {}: not inside any library volume {:?}",
                        current.display(),
                        boundary.guard_paths
                    );
                    return walk.finish(current, StopReason::OutsideGuard);
                }

                match self.is_ignorable(&current, 0, &walk.removed, boundary) {
                    Ok(true) => {}
                    Ok(false) => return walk.finish(current, StopReason::HasContent),
                    Err(e) => {
                        warn!("Failed to inspect {}: {}", current.display(), e);
                        return walk.finish(current, StopReason::Error(e.to_string()));
                    }
                }

                if walk.dry_run {
                    info!("[dry-run] Would delete directory {}", current.display());
                } else if let Err(e) = fs::remove_dir_all(&current) {
                    warn!("Failed to delete {}: {}", current.display(), e);
                    return walk.finish(current, StopReason::Error(e.to_string()));
                } else {
                    info!("Deleted directory {}", current.display());
                }
                self.record_delete(&mut walk, current.clone());
            }

            let parent = match current.parent() {
                Some(parent) if parent != current => parent.to_path_buf(),
                _ => return walk.finish(current, StopReason::FilesystemRoot),
            };
            if depth >= self.config.max_depth {
                return walk.finish(current, StopReason::MaxDepth);
            }
            current = parent;
            depth += 1;
        }
    }

    /// Whether everything under `dir` is an orphan file or an ignorable
    /// subdirectory, looking at most `max_depth` levels down. A library
    /// root is never ignorable, even when empty.
    fn is_ignorable(
        &self,
        dir: &Path,
        level: usize,
        removed: &HashSet<PathBuf>,
        boundary: &CleanupBoundary,
    ) -> std::io::Result<bool> {
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let path = entry.path();
            if removed.contains(&path) {
                continue;
            }

            let file_type = entry.file_type()?;
            if file_type.is_dir() {
                if boundary.is_library_root(&path) {
                    return Ok(false);
                }
                if level + 1 >= self.config.max_depth {
                    return Ok(false);
                }
                if !self.is_ignorable(&path, level + 1, removed, boundary)? {
                    return Ok(false);
                }
            } else if file_type.is_file() {
                if !self.config.is_orphan(&entry.file_name().to_string_lossy()) {
                    return Ok(false);
                }
            } else {
                return Ok(false);
            }
        }
        Ok(true)
    }
}
