//! In-memory seedbox filesystem for testing.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;

use crate::remote::{
    join_remote, RemoteConnector, RemoteEntry, RemoteError, RemoteKind, RemoteSession,
};

#[derive(Debug, Default)]
struct RemoteState {
    files: BTreeMap<String, Vec<u8>>,
    dirs: BTreeSet<String>,
    /// Scripted `df` outputs, consumed front to back; the last one repeats.
    df_outputs: VecDeque<String>,
    executed: Vec<String>,
    connect_error: Option<String>,
    connects: usize,
}

/// Mock seedbox reachable over "SSH".
///
/// Files and directories live in memory. `df` commands answer from a
/// script so disk usage can change between measurements.
///
/// # Example
///
/// ```rust,ignore
/// let remote = MockRemote::new();
/// remote.add_file("/seed/Show/ep1.mkv", b"video");
/// remote.push_disk_usage("/seed", 95);
/// remote.push_disk_usage("/seed", 85);
/// ```
#[derive(Debug, Clone, Default)]
pub struct MockRemote {
    state: Arc<Mutex<RemoteState>>,
}

impl MockRemote {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, RemoteState> {
        lock(&self.state)
    }

    /// Add a file, creating its parent directories.
    pub fn add_file(&self, path: &str, contents: &[u8]) {
        let path = clean(path);
        let mut state = self.state();
        let mut parent = parent_of(&path);
        while let Some(dir) = parent {
            state.dirs.insert(dir.clone());
            parent = parent_of(&dir);
        }
        state.files.insert(path, contents.to_vec());
    }

    /// Add an empty directory.
    pub fn add_dir(&self, path: &str) {
        let path = clean(path);
        let mut state = self.state();
        let mut current = Some(path);
        while let Some(dir) = current {
            current = parent_of(&dir);
            state.dirs.insert(dir);
        }
    }

    /// Remove a file or a whole directory tree.
    pub fn remove(&self, path: &str) {
        let path = clean(path);
        let prefix = format!("{}/", path);
        let mut state = self.state();
        state
            .files
            .retain(|p, _| *p != path && !p.starts_with(&prefix));
        state.dirs.retain(|p| *p != path && !p.starts_with(&prefix));
    }

    pub fn exists(&self, path: &str) -> bool {
        let path = clean(path);
        let state = self.state();
        state.files.contains_key(&path) || state.dirs.contains(&path)
    }

    /// Queue a raw `df` output.
    pub fn push_df_output(&self, output: impl Into<String>) {
        self.state().df_outputs.push_back(output.into());
    }

    /// Queue a `df -P` answer reporting `used_pct` for `mount`.
    pub fn push_disk_usage(&self, mount: &str, used_pct: u32) {
        self.push_df_output(df_output(mount, used_pct));
    }

    /// Make every following connect attempt fail.
    pub fn fail_connect(&self, message: &str) {
        self.state().connect_error = Some(message.to_string());
    }

    pub fn connect_count(&self) -> usize {
        self.state().connects
    }

    /// Commands passed to `exec`, in order.
    pub fn executed_commands(&self) -> Vec<String> {
        self.state().executed.clone()
    }

    /// A session over this filesystem, bypassing the connect counter.
    pub fn session(&self) -> MockRemoteSession {
        MockRemoteSession {
            state: Arc::clone(&self.state),
        }
    }
}

/// `df -P` style output for one filesystem.
pub fn df_output(mount: &str, used_pct: u32) -> String {
    let total: u64 = 1_000_000;
    let used = total * used_pct as u64 / 100;
    format!(
        "Filesystem     1024-blocks      Used Available Capacity Mounted on\n\
         /dev/sda1      {:>11} {:>9} {:>9} {:>7}% {}\n",
        total,
        used,
        total - used,
        used_pct,
        mount
    )
}

#[async_trait]
impl RemoteConnector for MockRemote {
    async fn connect(&self) -> Result<Box<dyn RemoteSession>, RemoteError> {
        let mut state = self.state();
        if let Some(message) = &state.connect_error {
            return Err(RemoteError::Connect(message.clone()));
        }
        state.connects += 1;
        drop(state);
        Ok(Box::new(self.session()))
    }
}

/// Session handed out by [`MockRemote`].
#[derive(Debug, Clone)]
pub struct MockRemoteSession {
    state: Arc<Mutex<RemoteState>>,
}

#[async_trait]
impl RemoteSession for MockRemoteSession {
    async fn stat(&self, path: &str) -> Result<Option<RemoteKind>, RemoteError> {
        let path = clean(path);
        let state = lock(&self.state);
        if state.files.contains_key(&path) {
            Ok(Some(RemoteKind::File))
        } else if state.dirs.contains(&path) {
            Ok(Some(RemoteKind::Dir))
        } else {
            Ok(None)
        }
    }

    async fn list_dir(&self, path: &str) -> Result<Vec<RemoteEntry>, RemoteError> {
        let path = clean(path);
        let state = lock(&self.state);
        if !state.dirs.contains(&path) {
            return Err(RemoteError::NotFound(path));
        }

        let child_name = |child: &str| -> Option<String> {
            let rest = child.strip_prefix(path.as_str())?.strip_prefix('/')?;
            (!rest.is_empty() && !rest.contains('/')).then(|| rest.to_string())
        };

        let mut entries: Vec<RemoteEntry> = state
            .dirs
            .iter()
            .filter_map(|d| child_name(d))
            .map(|name| RemoteEntry {
                path: join_remote(&path, &name),
                name,
                kind: RemoteKind::Dir,
                size: 0,
            })
            .collect();
        entries.extend(state.files.iter().filter_map(|(f, bytes)| {
            child_name(f).map(|name| RemoteEntry {
                path: join_remote(&path, &name),
                name,
                kind: RemoteKind::File,
                size: bytes.len() as u64,
            })
        }));
        Ok(entries)
    }

    async fn download_file(&self, remote: &str, local: &Path) -> Result<u64, RemoteError> {
        let remote = clean(remote);
        let contents = lock(&self.state)
            .files
            .get(&remote)
            .cloned()
            .ok_or(RemoteError::NotFound(remote))?;

        if let Some(parent) = local.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(local, &contents).await?;
        Ok(contents.len() as u64)
    }

    async fn exec(&self, command: &str) -> Result<String, RemoteError> {
        let mut state = lock(&self.state);
        state.executed.push(command.to_string());

        if command.trim_start().starts_with("df") {
            let output = if state.df_outputs.len() > 1 {
                state.df_outputs.pop_front()
            } else {
                state.df_outputs.front().cloned()
            };
            if let Some(output) = output {
                return Ok(output);
            }
        }

        Err(RemoteError::CommandFailed {
            command: command.to_string(),
            status: 127,
            output: "command not scripted".to_string(),
        })
    }
}

fn lock(state: &Mutex<RemoteState>) -> MutexGuard<'_, RemoteState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn clean(path: &str) -> String {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else {
        trimmed.to_string()
    }
}

fn parent_of(path: &str) -> Option<String> {
    let (parent, _) = path.rsplit_once('/')?;
    if parent.is_empty() {
        None
    } else {
        Some(parent.to_string())
    }
}
