use std::path::{Component, Path, PathBuf};

use serde::Serialize;

/// Library roots that must never be deleted, and the guard paths that
/// every deletion must lie under.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CleanupBoundary {
    pub library_roots: Vec<PathBuf>,
    pub guard_paths: Vec<PathBuf>,
}

impl CleanupBoundary {
    /// Build a boundary from library root folders.
    ///
    /// Each root's guard path is its volume: the drive root when the path
    /// has a drive prefix, otherwise its first path segment
    /// (`/media/shows` guards under `/media`). Relative roots and the
    /// filesystem root itself are ignored.
    pub fn from_roots<I, P>(roots: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        let mut library_roots = Vec::new();
        let mut guard_paths = Vec::new();

        for root in roots {
            let root = normalize_path(root.as_ref());
            if !root.is_absolute() {
                continue;
            }
            if let Some(guard) = guard_for(&root) {
                if !guard_paths.contains(&guard) {
                    guard_paths.push(guard);
                }
                if !library_roots.contains(&root) {
                    library_roots.push(root);
                }
            }
        }

        Self {
            library_roots,
            guard_paths,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.library_roots.is_empty() && self.guard_paths.is_empty()
    }

    pub fn is_library_root(&self, path: &Path) -> bool {
        let path = normalize_path(path);
        self.library_roots.iter().any(|root| *root == path)
    }

    /// Whether some library root lies strictly below `path`.
    pub fn contains_library_root(&self, path: &Path) -> bool {
        let path = normalize_path(path);
        self.library_roots
            .iter()
            .any(|root| *root != path && root.starts_with(&path))
    }

    /// Whether `path` is a guard path or nested under one. An empty guard
    /// set puts no restriction on the path.
    pub fn within_guard(&self, path: &Path) -> bool {
        if self.guard_paths.is_empty() {
            return true;
        }
        let path = normalize_path(path);
        self.guard_paths.iter().any(|guard| path.starts_with(guard))
    }
}

fn guard_for(root: &Path) -> Option<PathBuf> {
    let mut guard = PathBuf::new();
    let mut has_prefix = false;
    for component in root.components() {
        match component {
            Component::Prefix(_) => {
                has_prefix = true;
                guard.push(component.as_os_str());
            }
            Component::RootDir => {
                guard.push(component.as_os_str());
                if has_prefix {
                    return Some(guard);
                }
            }
            Component::Normal(_) => {
                guard.push(component.as_os_str());
                return Some(guard);
            }
            Component::CurDir | Component::ParentDir => return None,
        }
    }
    None
}

/// Lexically clean a path: drop `.` and resolve `..` without touching the
/// filesystem.
pub fn normalize_path(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push(component.as_os_str());
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}
