use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::debug;

use super::{join_remote, RemoteError, RemoteKind, RemoteSession};

/// What a mirror run copied.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MirrorStats {
    pub files: usize,
    pub dirs: usize,
    pub bytes: u64,
}

/// Copy the remote entry at `remote` to `local`.
///
/// A directory is mirrored recursively (`local` becomes the directory);
/// a file is copied to `local` directly. A missing `remote` fails with
/// [`RemoteError::NotFound`].
pub async fn mirror(
    session: &dyn RemoteSession,
    remote: &str,
    local: &Path,
) -> Result<MirrorStats, RemoteError> {
    let mut stats = MirrorStats::default();

    match session.stat(remote).await? {
        None => return Err(RemoteError::NotFound(remote.to_string())),
        Some(RemoteKind::File) => {
            stats.bytes += session.download_file(remote, local).await?;
            stats.files += 1;
            return Ok(stats);
        }
        Some(RemoteKind::Dir) => {}
    }

    let mut pending: Vec<(String, PathBuf)> = vec![(remote.to_string(), local.to_path_buf())];
    while let Some((remote_dir, local_dir)) = pending.pop() {
        tokio::fs::create_dir_all(&local_dir).await?;
        stats.dirs += 1;

        for entry in session.list_dir(&remote_dir).await? {
            let remote_child = join_remote(&remote_dir, &entry.name);
            let local_child = local_dir.join(&entry.name);
            match entry.kind {
                RemoteKind::Dir => pending.push((remote_child, local_child)),
                RemoteKind::File => {
                    debug!("Mirroring {} -> {}", remote_child, local_child.display());
                    stats.bytes += session.download_file(&remote_child, &local_child).await?;
                    stats.files += 1;
                }
            }
        }
    }

    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockRemote;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_mirror_directory_tree() {
        let remote = MockRemote::new();
        remote.add_file("/seed/Show/ep1.mkv", b"video");
        remote.add_file("/seed/Show/Subs/ep1.srt", b"subs");
        let session = remote.session();

        let temp = TempDir::new().unwrap();
        let target = temp.path().join("Show");
        let stats = mirror(&session, "/seed/Show", &target).await.unwrap();

        assert_eq!(stats.files, 2);
        assert_eq!(stats.bytes, 9);
        assert_eq!(std::fs::read(target.join("ep1.mkv")).unwrap(), b"video");
        assert!(target.join("Subs/ep1.srt").exists());
    }

    #[tokio::test]
    async fn test_mirror_single_file() {
        let remote = MockRemote::new();
        remote.add_file("/seed/movie.mkv", b"movie");
        let session = remote.session();

        let temp = TempDir::new().unwrap();
        let target = temp.path().join("movie.mkv");
        let stats = mirror(&session, "/seed/movie.mkv", &target).await.unwrap();
        assert_eq!(stats.files, 1);
        assert_eq!(std::fs::read(target).unwrap(), b"movie");
    }

    #[tokio::test]
    async fn test_mirror_missing_path() {
        let remote = MockRemote::new();
        let session = remote.session();
        let temp = TempDir::new().unwrap();

        let err = mirror(&session, "/seed/gone", temp.path()).await.unwrap_err();
        assert!(err.is_not_found());
    }
}
