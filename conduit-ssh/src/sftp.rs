//! Lazily-opened SFTP session plus path conversion helpers.
//!
//! SFTP paths are always Unix-style on the wire, regardless of the remote
//! OS; `to_sftp_path`/`sftp_to_windows_path` are a direct port of
//! `distant_ssh::api::{to_sftp_path, sftp_to_windows_path}`, using
//! `typed-path` to re-render the separators rather than string-splicing.

use std::path::PathBuf;
use std::sync::Arc;

use conduit_core::error::{Error, Result};
use russh_sftp::client::SftpSession;
use tokio::sync::Mutex;
use typed_path::Utf8TypedPath;

use crate::exec::HandleT;
use crate::session::SshFamily;

pub fn to_sftp_path(path: &str) -> String {
    Utf8TypedPath::derive(path).with_unix_encoding().as_str().to_string()
}

pub fn sftp_to_windows_path(sftp_path: &str) -> String {
    let stripped = sftp_path
        .strip_prefix('/')
        .filter(|s| s.starts_with(|c: char| c.is_ascii_alphabetic()) && s[1..].starts_with(':'))
        .unwrap_or(sftp_path);
    Utf8TypedPath::derive(stripped)
        .with_windows_encoding()
        .to_string()
        .replace('/', "\\")
}

fn sftp_err(e: impl std::fmt::Display) -> Error {
    Error::new(conduit_core::error::ErrorKind::ChannelError, e.to_string())
}

/// Lazy-cached SFTP subsystem channel, opened on first file transfer.
#[derive(Clone)]
pub struct SftpCache {
    session: Arc<Mutex<Option<Arc<SftpSession>>>>,
}

impl Default for SftpCache {
    fn default() -> Self {
        Self {
            session: Arc::new(Mutex::new(None)),
        }
    }
}

impl SftpCache {
    pub async fn get(&self, handle: &HandleT) -> Result<Arc<SftpSession>> {
        let mut guard = self.session.lock().await;
        if let Some(sftp) = guard.as_ref() {
            return Ok(Arc::clone(sftp));
        }
        let channel = handle.channel_open_session().await.map_err(sftp_err)?;
        channel
            .request_subsystem(true, "sftp")
            .await
            .map_err(sftp_err)?;
        let sftp = Arc::new(SftpSession::new(channel.into_stream()).await.map_err(sftp_err)?);
        *guard = Some(Arc::clone(&sftp));
        Ok(sftp)
    }
}

/// Uploads local file `local_path` to `remote_path` on the session behind
/// `handle`, used by the transfer engine for Local-to-SSH single-file
/// transfers.
pub async fn put(handle: &HandleT, sftp: &SftpCache, family: SshFamily, local_path: &std::path::Path, remote_path: &str) -> Result<()> {
    let remote_path = native_to_sftp(family, remote_path);
    let sftp = sftp.get(handle).await?;
    let contents = tokio::fs::read(local_path)
        .await
        .map_err(|e| Error::new(conduit_core::error::ErrorKind::NotFound, e.to_string()))?;

    use tokio::io::AsyncWriteExt;
    let mut file = sftp.create(&remote_path).await.map_err(sftp_err)?;
    file.write_all(&contents).await.map_err(|e| Error::new(conduit_core::error::ErrorKind::ChannelError, e.to_string()))?;
    file.flush().await.map_err(|e| Error::new(conduit_core::error::ErrorKind::ChannelError, e.to_string()))?;
    Ok(())
}

/// Downloads `remote_path` from the session behind `handle` to local file
/// `local_path`, used by the transfer engine for SSH-to-Local single-file
/// transfers.
pub async fn get(handle: &HandleT, sftp: &SftpCache, family: SshFamily, remote_path: &str, local_path: &std::path::Path) -> Result<()> {
    let remote_path = native_to_sftp(family, remote_path);
    let sftp = sftp.get(handle).await?;

    use tokio::io::AsyncReadExt;
    let mut file = sftp.open(&remote_path).await.map_err(sftp_err)?;
    let mut contents = Vec::new();
    file.read_to_end(&mut contents)
        .await
        .map_err(|e| Error::new(conduit_core::error::ErrorKind::ChannelError, e.to_string()))?;

    if let Some(parent) = local_path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| Error::new(conduit_core::error::ErrorKind::NotFound, e.to_string()))?;
    }
    tokio::fs::write(local_path, contents)
        .await
        .map_err(|e| Error::new(conduit_core::error::ErrorKind::NotFound, e.to_string()))
}

fn native_to_sftp(family: SshFamily, path: &str) -> String {
    match family {
        SshFamily::Windows => to_sftp_path(path),
        SshFamily::Unix => path.to_string(),
    }
}

#[allow(dead_code)]
fn sftp_to_native(family: SshFamily, path: &str) -> PathBuf {
    match family {
        SshFamily::Windows => PathBuf::from(sftp_to_windows_path(path)),
        SshFamily::Unix => PathBuf::from(path),
    }
}
