//! `ssh2`-backed implementation. libssh2 is blocking, so every call runs
//! on tokio's blocking pool.

use std::fs::File;
use std::io::Read;
use std::net::{TcpStream, ToSocketAddrs};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use ssh2::{ErrorCode, Session, Sftp};
use tracing::{debug, info};

use crate::config::SeedboxConfig;

use super::{RemoteConnector, RemoteEntry, RemoteError, RemoteKind, RemoteSession};

/// libssh2 `LIBSSH2_FX_NO_SUCH_FILE`.
const SFTP_NO_SUCH_FILE: i32 = 2;

/// Connects to the seedbox described by [`SeedboxConfig`].
pub struct SshConnector {
    config: SeedboxConfig,
}

impl SshConnector {
    pub fn new(config: SeedboxConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl RemoteConnector for SshConnector {
    async fn connect(&self) -> Result<Box<dyn RemoteSession>, RemoteError> {
        let config = self.config.clone();
        let session = tokio::task::spawn_blocking(move || open_session(&config))
            .await
            .map_err(|e| RemoteError::Internal(e.to_string()))??;
        Ok(Box::new(session))
    }
}

struct Connection {
    session: Session,
    sftp: Sftp,
}

/// An authenticated SSH session with an SFTP channel.
pub struct SshSession {
    conn: Arc<Mutex<Connection>>,
}

fn open_session(config: &SeedboxConfig) -> Result<SshSession, RemoteError> {
    let timeout = Duration::from_secs(config.timeout_secs as u64);
    let addr = (config.host.as_str(), config.port)
        .to_socket_addrs()
        .map_err(|e| RemoteError::Connect(format!("{}: {}", config.host, e)))?
        .next()
        .ok_or_else(|| RemoteError::Connect(format!("{}: no address", config.host)))?;

    let tcp = TcpStream::connect_timeout(&addr, timeout)
        .map_err(|e| RemoteError::Connect(format!("{}: {}", addr, e)))?;

    let mut session = Session::new().map_err(|e| RemoteError::Connect(e.to_string()))?;
    session.set_tcp_stream(tcp);
    session.set_timeout(timeout.as_millis() as u32);
    session
        .handshake()
        .map_err(|e| RemoteError::Connect(e.to_string()))?;

    let auth = if let Some(key) = &config.private_key_path {
        session.userauth_pubkey_file(&config.username, None, key, None)
    } else if let Some(password) = &config.password {
        session.userauth_password(&config.username, password)
    } else {
        session.userauth_agent(&config.username)
    };
    auth.map_err(|e| RemoteError::Auth(e.to_string()))?;
    if !session.authenticated() {
        return Err(RemoteError::Auth(format!(
            "server rejected user {}",
            config.username
        )));
    }

    let sftp = session
        .sftp()
        .map_err(|e| RemoteError::Sftp(e.to_string()))?;

    info!(host = %config.host, port = config.port, "Connected to seedbox");
    Ok(SshSession {
        conn: Arc::new(Mutex::new(Connection { session, sftp })),
    })
}

fn map_sftp_error(e: ssh2::Error, path: &str) -> RemoteError {
    match e.code() {
        ErrorCode::SFTP(SFTP_NO_SUCH_FILE) => RemoteError::NotFound(path.to_string()),
        _ => RemoteError::Sftp(format!("{}: {}", path, e)),
    }
}

fn kind_of(stat: &ssh2::FileStat) -> RemoteKind {
    if stat.is_dir() {
        RemoteKind::Dir
    } else {
        RemoteKind::File
    }
}

impl SshSession {
    /// Run `f` against the connection on the blocking pool.
    async fn blocking<T, F>(&self, f: F) -> Result<T, RemoteError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, RemoteError> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let guard = conn
                .lock()
                .map_err(|_| RemoteError::Internal("ssh session mutex poisoned".to_string()))?;
            f(&guard)
        })
        .await
        .map_err(|e| RemoteError::Internal(e.to_string()))?
    }
}

#[async_trait]
impl RemoteSession for SshSession {
    async fn stat(&self, path: &str) -> Result<Option<RemoteKind>, RemoteError> {
        let path = path.to_string();
        self.blocking(move |conn| match conn.sftp.stat(Path::new(&path)) {
            Ok(stat) => Ok(Some(kind_of(&stat))),
            Err(e) => match map_sftp_error(e, &path) {
                RemoteError::NotFound(_) => Ok(None),
                other => Err(other),
            },
        })
        .await
    }

    async fn list_dir(&self, path: &str) -> Result<Vec<RemoteEntry>, RemoteError> {
        let path = path.to_string();
        self.blocking(move |conn| {
            let entries = conn
                .sftp
                .readdir(Path::new(&path))
                .map_err(|e| map_sftp_error(e, &path))?;

            Ok(entries
                .into_iter()
                .filter_map(|(child, stat)| {
                    let name = child.file_name()?.to_string_lossy().into_owned();
                    if name == "." || name == ".." {
                        return None;
                    }
                    Some(RemoteEntry {
                        path: child.to_string_lossy().into_owned(),
                        name,
                        kind: kind_of(&stat),
                        size: stat.size.unwrap_or(0),
                    })
                })
                .collect())
        })
        .await
    }

    async fn download_file(&self, remote: &str, local: &Path) -> Result<u64, RemoteError> {
        let remote = remote.to_string();
        let local: PathBuf = local.to_path_buf();
        self.blocking(move |conn| {
            let mut source = conn
                .sftp
                .open(Path::new(&remote))
                .map_err(|e| map_sftp_error(e, &remote))?;
            if let Some(parent) = local.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let mut target = File::create(&local)?;
            let bytes = std::io::copy(&mut source, &mut target)?;
            target.sync_all()?;
            debug!("Downloaded {} ({} bytes)", remote, bytes);
            Ok(bytes)
        })
        .await
    }

    async fn exec(&self, command: &str) -> Result<String, RemoteError> {
        let command = command.to_string();
        self.blocking(move |conn| {
            let mut channel = conn
                .session
                .channel_session()
                .map_err(|e| RemoteError::Sftp(e.to_string()))?;
            channel
                .exec(&command)
                .map_err(|e| RemoteError::Sftp(e.to_string()))?;

            let mut output = String::new();
            channel.read_to_string(&mut output)?;
            channel
                .wait_close()
                .map_err(|e| RemoteError::Sftp(e.to_string()))?;
            let status = channel
                .exit_status()
                .map_err(|e| RemoteError::Sftp(e.to_string()))?;

            if status != 0 {
                return Err(RemoteError::CommandFailed {
                    command,
                    status,
                    output,
                });
            }
            Ok(output)
        })
        .await
    }
}
