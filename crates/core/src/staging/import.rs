//! Manual import: copy staged video files into a catalog entry's folder.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex_lite::Regex;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::fs::{self, File};
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufReader, BufWriter};
use tracing::debug;

use crate::cleanup::CleanupConfig;

use super::StagingConfig;

const BUFFER_SIZE: usize = 1024 * 1024;

#[derive(Debug, Error)]
pub enum ImportError {
    #[error("no video files under {0}")]
    NoVideoFiles(PathBuf),

    #[error("staged item not found: {0}")]
    SourceNotFound(PathBuf),

    #[error("failed to copy {from} to {to}: {error}")]
    CopyFailed {
        from: PathBuf,
        to: PathBuf,
        #[source]
        error: std::io::Error,
    },

    #[error("checksum mismatch after copying to {0}")]
    ChecksumMismatch(PathBuf),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ImportError {
    fn copy_failed(source: &Path, destination: &Path, error: std::io::Error) -> Self {
        Self::CopyFailed {
            from: source.to_path_buf(),
            to: destination.to_path_buf(),
            error,
        }
    }
}

/// One file copied into the library.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportedFile {
    pub source: PathBuf,
    pub destination: PathBuf,
    pub size_bytes: u64,
}

fn episode_marker() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)S(\d{1,2})E\d{1,3}").unwrap())
}

fn cross_marker() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b(\d{1,2})x\d{2}\b").unwrap())
}

/// `Season NN` folder for an episode file name, if it carries a season marker.
pub fn season_folder(file_name: &str) -> Option<String> {
    let caps = episode_marker()
        .captures(file_name)
        .or_else(|| cross_marker().captures(file_name))?;
    let season: u32 = caps.get(1)?.as_str().parse().ok()?;
    Some(format!("Season {:02}", season))
}

/// Every video file under `item` (or `item` itself when it is one).
pub async fn collect_video_files(
    item: &Path,
    staging: &StagingConfig,
    cleanup: &CleanupConfig,
) -> Result<Vec<PathBuf>, ImportError> {
    let meta = match fs::metadata(item).await {
        Ok(meta) => meta,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(ImportError::SourceNotFound(item.to_path_buf()))
        }
        Err(e) => return Err(e.into()),
    };

    let wanted = |path: &Path| {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        staging.is_video(&name) && !cleanup.is_orphan(&name)
    };

    if meta.is_file() {
        return Ok(if wanted(item) {
            vec![item.to_path_buf()]
        } else {
            Vec::new()
        });
    }

    let mut found = Vec::new();
    let mut pending = vec![item.to_path_buf()];
    while let Some(dir) = pending.pop() {
        let mut entries = fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let file_type = entry.file_type().await?;
            if file_type.is_dir() {
                pending.push(path);
            } else if file_type.is_file() && wanted(&path) {
                found.push(path);
            }
        }
    }
    found.sort();
    Ok(found)
}

/// Where `source` lands under `library_dir`. Episodes go into their season
/// folder when `seasons` is set.
pub fn destination_for(source: &Path, library_dir: &Path, seasons: bool) -> PathBuf {
    let name = source.file_name().unwrap_or(source.as_os_str());
    let season = seasons
        .then(|| season_folder(&name.to_string_lossy()))
        .flatten();
    match season {
        Some(season) => library_dir.join(season).join(name),
        None => library_dir.join(name),
    }
}

/// Copy every file in `files` into `library_dir`, stopping at the first
/// failure. Sources are never removed here.
pub async fn copy_into_library(
    files: &[PathBuf],
    library_dir: &Path,
    seasons: bool,
    verify: bool,
) -> Result<Vec<ImportedFile>, ImportError> {
    let mut imported = Vec::with_capacity(files.len());
    for source in files {
        let destination = destination_for(source, library_dir, seasons);
        if let Some(parent) = destination.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| ImportError::copy_failed(source, &destination, e))?;
        }

        let (size_bytes, source_digest) = copy_file(source, &destination, verify).await?;
        if let Some(expected) = source_digest {
            if sha256_file(&destination).await? != expected {
                return Err(ImportError::ChecksumMismatch(destination));
            }
        }

        debug!(
            "Imported {} -> {} ({} bytes)",
            source.display(),
            destination.display(),
            size_bytes
        );
        imported.push(ImportedFile {
            source: source.clone(),
            destination,
            size_bytes,
        });
    }
    Ok(imported)
}

/// Buffered copy, hashing the bytes read when `digest` is set.
async fn copy_file(
    source: &Path,
    destination: &Path,
    digest: bool,
) -> Result<(u64, Option<String>), ImportError> {
    let source_file = File::open(source).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            ImportError::SourceNotFound(source.to_path_buf())
        } else {
            ImportError::copy_failed(source, destination, e)
        }
    })?;
    let dest_file = File::create(destination)
        .await
        .map_err(|e| ImportError::copy_failed(source, destination, e))?;

    let mut reader = BufReader::with_capacity(BUFFER_SIZE, source_file);
    let mut writer = BufWriter::with_capacity(BUFFER_SIZE, dest_file);
    let mut hasher = digest.then(Sha256::new);
    let mut buffer = vec![0u8; BUFFER_SIZE];
    let mut total = 0u64;

    loop {
        let read = reader
            .read(&mut buffer)
            .await
            .map_err(|e| ImportError::copy_failed(source, destination, e))?;
        if read == 0 {
            break;
        }
        if let Some(h) = hasher.as_mut() {
            h.update(&buffer[..read]);
        }
        writer
            .write_all(&buffer[..read])
            .await
            .map_err(|e| ImportError::copy_failed(source, destination, e))?;
        total += read as u64;
    }
    writer
        .flush()
        .await
        .map_err(|e| ImportError::copy_failed(source, destination, e))?;

    Ok((total, hasher.map(|h| format!("{:x}", h.finalize()))))
}

async fn sha256_file(path: &Path) -> Result<String, ImportError> {
    let mut reader = BufReader::with_capacity(BUFFER_SIZE, File::open(path).await?);
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; BUFFER_SIZE];
    loop {
        let read = reader.read(&mut buffer).await?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn staging_config(root: &Path) -> StagingConfig {
        StagingConfig::new(root)
    }

    #[test]
    fn test_season_folder() {
        assert_eq!(season_folder("Show.S01E02.1080p.mkv").as_deref(), Some("Season 01"));
        assert_eq!(season_folder("show.s10e100.mkv").as_deref(), Some("Season 10"));
        assert_eq!(season_folder("Show - 3x07 - Title.avi").as_deref(), Some("Season 03"));
        assert_eq!(season_folder("Movie.1920x1080.mkv"), None);
        assert_eq!(season_folder("Heat.1995.mkv"), None);
    }

    #[test]
    fn test_destination_for() {
        let lib = Path::new("/media/shows/Severance");
        assert_eq!(
            destination_for(Path::new("/staging/x/Severance.S02E03.mkv"), lib, true),
            PathBuf::from("/media/shows/Severance/Season 02/Severance.S02E03.mkv")
        );
        assert_eq!(
            destination_for(Path::new("/staging/x/Severance.S02E03.mkv"), lib, false),
            PathBuf::from("/media/shows/Severance/Severance.S02E03.mkv")
        );
    }

    #[tokio::test]
    async fn test_collect_video_files_skips_extras() {
        let temp = TempDir::new().unwrap();
        let item = temp.path().join("Show.S01");
        std::fs::create_dir_all(item.join("Subs")).unwrap();
        std::fs::write(item.join("Show.S01E01.mkv"), b"a").unwrap();
        std::fs::write(item.join("Show.S01E02.MP4"), b"b").unwrap();
        std::fs::write(item.join("show.nfo"), b"n").unwrap();
        std::fs::write(item.join("Subs/en.srt"), b"s").unwrap();

        let files = collect_video_files(&item, &staging_config(temp.path()), &CleanupConfig::default())
            .await
            .unwrap();
        assert_eq!(files.len(), 2);
        assert!(files.iter().all(|f| f.parent() == Some(item.as_path())));
    }

    #[tokio::test]
    async fn test_collect_missing_item() {
        let temp = TempDir::new().unwrap();
        let result = collect_video_files(
            &temp.path().join("gone"),
            &staging_config(temp.path()),
            &CleanupConfig::default(),
        )
        .await;
        assert!(matches!(result, Err(ImportError::SourceNotFound(_))));
    }

    #[tokio::test]
    async fn test_copy_with_verification_keeps_source() {
        let temp = TempDir::new().unwrap();
        let source = temp.path().join("staging/Show.S01E01.mkv");
        std::fs::create_dir_all(source.parent().unwrap()).unwrap();
        std::fs::write(&source, b"episode bytes").unwrap();
        let library = temp.path().join("library/Show");

        let imported = copy_into_library(&[source.clone()], &library, true, true)
            .await
            .unwrap();
        assert_eq!(imported.len(), 1);
        assert_eq!(imported[0].size_bytes, 13);
        assert!(source.exists());
        assert_eq!(
            std::fs::read(library.join("Season 01/Show.S01E01.mkv")).unwrap(),
            b"episode bytes"
        );
    }

    #[tokio::test]
    async fn test_copy_stops_at_first_failure() {
        let temp = TempDir::new().unwrap();
        let present = temp.path().join("a.mkv");
        std::fs::write(&present, b"a").unwrap();
        let missing = temp.path().join("b.mkv");

        let result = copy_into_library(
            &[missing, present],
            &temp.path().join("lib"),
            false,
            false,
        )
        .await;
        assert!(matches!(result, Err(ImportError::SourceNotFound(_))));
        assert!(!temp.path().join("lib/a.mkv").exists());
    }
}
