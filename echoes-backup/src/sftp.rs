//! SFTP implementation of [`RemoteStore`] over `ssh2`.
//!
//! Every call opens its own session and closes it when done. libssh2 is blocking,
//! so each call runs on the blocking thread pool.

use std::fs::File;
use std::io::{self, Write};
use std::net::TcpStream;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use echoes_backup_core::contract::RemoteStore;
use echoes_backup_core::error::TransferError;
use ssh2::{ErrorCode, FileStat, OpenFlags, OpenType, Session, Sftp};
use tracing::{debug, error, info};

use crate::load_config::SftpSection;

const SESSION_TIMEOUT_MS: u32 = 60_000;
const DIR_MODE: i32 = 0o755;
const FILE_MODE: i32 = 0o644;
/// `LIBSSH2_FX_NO_SUCH_FILE`
const SFTP_NO_SUCH_FILE: i32 = 2;

fn ssh_err(e: ssh2::Error) -> TransferError {
    TransferError::Ssh(e.to_string())
}

/// Maps a `stat` result to existence. Only "no such file" means absent; any
/// other failure is an error, so callers never truncate a file they could not see.
fn exists_from(stat: Result<FileStat, ssh2::Error>) -> Result<bool, TransferError> {
    match stat {
        Ok(_) => Ok(true),
        Err(e) if matches!(e.code(), ErrorCode::SFTP(SFTP_NO_SUCH_FILE)) => Ok(false),
        Err(e) => Err(ssh_err(e)),
    }
}

pub struct SftpClient {
    config: SftpSection,
}

impl SftpClient {
    pub fn new(config: SftpSection) -> Self {
        info!(address = %config.address(), username = %config.username, "Initialized SftpClient");
        Self { config }
    }

    fn connect(config: &SftpSection) -> Result<(Session, Sftp), TransferError> {
        let address = config.address();
        let connect_err = |message: String| TransferError::Connect {
            address: address.clone(),
            message,
        };

        let tcp = TcpStream::connect(&address).map_err(|e| connect_err(e.to_string()))?;
        let mut session = Session::new().map_err(|e| connect_err(e.to_string()))?;
        session.set_tcp_stream(tcp);
        session.set_timeout(SESSION_TIMEOUT_MS);
        session.handshake().map_err(|e| connect_err(e.to_string()))?;
        session
            .userauth_password(&config.username, &config.password)
            .map_err(|e| connect_err(format!("authentication failed: {e}")))?;
        let sftp = session.sftp().map_err(ssh_err)?;
        debug!(address = %address, "SFTP session opened");
        Ok((session, sftp))
    }

    /// Runs `op` against a fresh session on the blocking pool.
    async fn with_sftp<T, F>(&self, op: &'static str, f: F) -> Result<T, TransferError>
    where
        T: Send + 'static,
        F: FnOnce(&Sftp) -> Result<T, TransferError> + Send + 'static,
    {
        let config = self.config.clone();
        let result = tokio::task::spawn_blocking(move || {
            let (session, sftp) = Self::connect(&config)?;
            let result = f(&sftp);
            drop(sftp);
            if let Err(e) = session.disconnect(None, "done", None) {
                debug!(error = %e, "Error ending SFTP session");
            }
            result
        })
        .await
        .map_err(|e| TransferError::Worker(e.to_string()))?;

        if let Err(e) = &result {
            error!(op, error = %e, "SFTP operation failed");
        }
        result
    }
}

/// `mkdir -p` over SFTP.
fn create_dir_all(sftp: &Sftp, dir: &Path) -> Result<(), TransferError> {
    let mut current = PathBuf::new();
    for component in dir.components() {
        current.push(component);
        if exists_from(sftp.stat(&current))? {
            continue;
        }
        if let Err(e) = sftp.mkdir(&current, DIR_MODE) {
            // Lost a race with another writer, or the directory is not ours to create.
            if !exists_from(sftp.stat(&current))? {
                return Err(ssh_err(e));
            }
        }
    }
    Ok(())
}

fn write_all(mut remote: ssh2::File, content: &[u8]) -> Result<(), TransferError> {
    remote.write_all(content)?;
    remote.flush()?;
    Ok(())
}

#[async_trait]
impl RemoteStore for SftpClient {
    async fn upload_file(&self, local: &Path, remote_dir: &str) -> Result<(), TransferError> {
        let local = local.to_path_buf();
        let remote_dir = PathBuf::from(remote_dir);
        let file_name = local
            .file_name()
            .ok_or_else(|| {
                TransferError::Io(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("{local:?} has no file name"),
                ))
            })?
            .to_owned();

        self.with_sftp("upload_file", move |sftp| {
            create_dir_all(sftp, &remote_dir)?;
            let target = remote_dir.join(&file_name);
            let mut input = File::open(&local)?;
            let mut remote = sftp.create(&target).map_err(ssh_err)?;
            let bytes = io::copy(&mut input, &mut remote)?;
            remote.flush()?;
            info!(local = %local.display(), remote = %target.display(), bytes, "Uploaded file to server");
            Ok(())
        })
        .await
    }

    async fn file_exists(&self, remote_file: &str) -> Result<bool, TransferError> {
        let remote_file = PathBuf::from(remote_file);
        self.with_sftp("file_exists", move |sftp| exists_from(sftp.stat(&remote_file)))
            .await
    }

    async fn append_to_file(&self, remote_file: &str, content: &str) -> Result<(), TransferError> {
        let remote_file = PathBuf::from(remote_file);
        let content = content.to_string();
        self.with_sftp("append_to_file", move |sftp| {
            let remote = sftp
                .open_mode(
                    &remote_file,
                    OpenFlags::WRITE | OpenFlags::APPEND | OpenFlags::CREATE,
                    FILE_MODE,
                    OpenType::File,
                )
                .map_err(ssh_err)?;
            write_all(remote, content.as_bytes())?;
            debug!(remote = %remote_file.display(), bytes = content.len(), "Appended to remote file");
            Ok(())
        })
        .await
    }

    async fn create_file(&self, remote_file: &str, content: &str) -> Result<(), TransferError> {
        let remote_file = PathBuf::from(remote_file);
        let content = content.to_string();
        self.with_sftp("create_file", move |sftp| {
            if let Some(parent) = remote_file.parent() {
                create_dir_all(sftp, parent)?;
            }
            let remote = sftp.create(&remote_file).map_err(ssh_err)?;
            write_all(remote, content.as_bytes())?;
            info!(remote = %remote_file.display(), "Created remote file");
            Ok(())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stat() -> FileStat {
        FileStat {
            size: Some(42),
            uid: None,
            gid: None,
            perm: None,
            atime: None,
            mtime: None,
        }
    }

    #[test]
    fn only_no_such_file_means_absent() {
        assert!(exists_from(Ok(stat())).unwrap());
        let missing = ssh2::Error::new(ErrorCode::SFTP(SFTP_NO_SUCH_FILE), "no such file");
        assert!(!exists_from(Err(missing)).unwrap());
    }

    #[test]
    fn other_stat_failures_are_errors() {
        // LIBSSH2_FX_PERMISSION_DENIED, LIBSSH2_FX_FAILURE, LIBSSH2_ERROR_SOCKET_RECV
        for code in [ErrorCode::SFTP(3), ErrorCode::SFTP(4), ErrorCode::Session(-43)] {
            let err = exists_from(Err(ssh2::Error::new(code, "stat failed"))).unwrap_err();
            assert!(matches!(err, TransferError::Ssh(_)), "{code:?} was not an error");
        }
    }
}
