//! A JSON document guarded by an exclusive lock file.

use std::fs::{self, File, OpenOptions, TryLockError};
use std::io::Write;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use serde::{de::DeserializeOwned, Serialize};
use tokio::runtime::RuntimeFlavor;
use tracing::{error, warn};

use super::StoreError;

const LOCK_RETRY_INTERVAL: Duration = Duration::from_millis(25);

/// A single structured document with locked read-modify-write.
///
/// Reads are lock-free: writes replace the file with a rename, so a
/// reader always sees a whole document. A missing, unreadable or corrupt
/// document reads as `T::default()`.
#[derive(Debug)]
pub struct LockedDocument<T> {
    path: PathBuf,
    lock_path: PathBuf,
    timeout: Duration,
    _marker: PhantomData<fn() -> T>,
}

/// Releases the lock when dropped, on every exit path.
struct LockGuard {
    file: File,
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        let _ = self.file.unlock();
    }
}

enum Loaded<T> {
    Ok(T),
    Missing,
    Corrupt,
}

impl<T> LockedDocument<T>
where
    T: Serialize + DeserializeOwned + Default,
{
    /// `path` is the document; its lock lives next to it with a `.lock`
    /// extension.
    pub fn new(path: impl Into<PathBuf>, timeout: Duration) -> Self {
        let path = path.into();
        let lock_path = path.with_extension("lock");
        Self {
            path,
            lock_path,
            timeout,
            _marker: PhantomData,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current document contents.
    pub fn read(&self) -> T {
        match self.load() {
            Loaded::Ok(doc) => doc,
            Loaded::Missing | Loaded::Corrupt => T::default(),
        }
    }

    /// Lock, load, apply `f`, save, unlock.
    ///
    /// Nothing is written if `f` fails.
    pub fn update<R>(
        &self,
        f: impl FnOnce(&mut T) -> Result<R, StoreError>,
    ) -> Result<R, StoreError> {
        let _guard = self.lock()?;

        let mut doc = match self.load() {
            Loaded::Ok(doc) => doc,
            Loaded::Missing => T::default(),
            Loaded::Corrupt => {
                self.set_aside_corrupt();
                T::default()
            }
        };

        let result = f(&mut doc)?;
        self.save(&doc)?;
        Ok(result)
    }

    fn load(&self) -> Loaded<T> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Loaded::Missing,
            Err(e) => {
                error!(
                    path = %self.path.display(),
                    error = %e,
                    "State document unreadable, treating as empty"
                );
                return Loaded::Corrupt;
            }
        };

        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Loaded::Missing;
        }

        match serde_json::from_slice(&bytes) {
            Ok(doc) => Loaded::Ok(doc),
            Err(e) => {
                error!(
                    path = %self.path.display(),
                    error = %e,
                    "State document is corrupt, treating as empty"
                );
                Loaded::Corrupt
            }
        }
    }

    fn set_aside_corrupt(&self) {
        let backup = self.path.with_extension("corrupt");
        match fs::rename(&self.path, &backup) {
            Ok(()) => warn!(
                "Moved corrupt state document to {}",
                backup.display()
            ),
            Err(e) => warn!(
                "Failed to move corrupt state document {} aside: {}",
                self.path.display(),
                e
            ),
        }
    }

    fn save(&self, doc: &T) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        let tmp = self.path.with_extension("tmp");
        {
            let mut file = File::create(&tmp)?;
            serde_json::to_writer_pretty(&mut file, doc)?;
            file.write_all(b"\n")?;
            file.sync_all()?;
        }
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    fn lock(&self) -> Result<LockGuard, StoreError> {
        if let Some(parent) = self.lock_path.parent() {
            fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&self.lock_path)?;

        match file.try_lock() {
            Ok(()) => return Ok(LockGuard { file }),
            Err(TryLockError::WouldBlock) => {}
            Err(TryLockError::Error(e)) => return Err(StoreError::Io(e)),
        }

        // Contended: the wait sleeps the calling thread for up to `timeout`.
        // On a multi-threaded runtime the worker hands its queued tasks off
        // first so they keep running.
        let wait = || self.wait_for_lock(file);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) if handle.runtime_flavor() == RuntimeFlavor::MultiThread => {
                tokio::task::block_in_place(wait)
            }
            _ => wait(),
        }
    }

    fn wait_for_lock(&self, file: File) -> Result<LockGuard, StoreError> {
        let started = Instant::now();
        loop {
            match file.try_lock() {
                Ok(()) => return Ok(LockGuard { file }),
                Err(TryLockError::WouldBlock) => {
                    if started.elapsed() >= self.timeout {
                        return Err(StoreError::LockTimeout {
                            path: self.lock_path.clone(),
                            waited_ms: started.elapsed().as_millis() as u64,
                        });
                    }
                    std::thread::sleep(LOCK_RETRY_INTERVAL);
                }
                Err(TryLockError::Error(e)) => return Err(StoreError::Io(e)),
            }
        }
    }
}
