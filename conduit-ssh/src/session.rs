//! Connection and authentication for a single SSH session.
//!
//! Grounded in `distant_ssh::Ssh::connect`/`authenticate`: russh does the
//! transport and key exchange, `ssh2-config-rs` supplies `~/.ssh/config`
//! defaults (port, user) that explicit [`SshOpts`] fields override, and
//! authentication tries public key then password, same order the teacher
//! uses server-advertised methods to pick from.

use std::error::Error as StdError;
use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use conduit_core::error::{Error, Result};
use log::{debug, info, warn};
use russh::client::{self, Handle};
use russh::keys::PrivateKey;
use ssh2_config_rs::{ParseRule, SshConfig};

/// Remote operating system family, needed because path syntax and shell
/// predicates diverge between Unix and Windows targets.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum SshFamily {
    Unix,
    Windows,
}

/// Options for establishing a new SSH connection, matching the external
/// interface's backend-creation config for the remote-SSH variant.
#[derive(Clone, Debug, Default)]
pub struct SshOpts {
    pub hostname: String,
    pub port: Option<u16>,
    pub username: Option<String>,
    pub private_key_path: Option<PathBuf>,
    pub proxy_command: Option<String>,
    pub ask_password: bool,
    pub password: Option<String>,
    pub passphrase: Option<String>,
    pub timeout: Option<Duration>,
    pub look_for_keys: bool,
    pub compress: bool,
}

impl SshOpts {
    pub fn new(hostname: impl Into<String>) -> Self {
        Self {
            hostname: hostname.into(),
            look_for_keys: true,
            ..Default::default()
        }
    }
}

pub(crate) struct ClientHandler;

impl client::Handler for ClientHandler {
    type Error = russh::Error;

    fn check_server_key(
        &mut self,
        _server_public_key: &russh::keys::PublicKey,
    ) -> impl std::future::Future<Output = std::result::Result<bool, Self::Error>> + Send {
        // Host key verification beyond what russh itself exposes is out of
        // scope; callers relying on known_hosts pinning should do so at the
        // network layer (e.g. a bastion or VPN).
        async { Ok(true) }
    }
}

/// An authenticated SSH connection. Exec and SFTP both multiplex over the
/// single underlying `Handle`.
pub struct SshSession {
    pub(crate) handle: Handle<ClientHandler>,
    pub(crate) family: SshFamily,
    host: String,
    port: u16,
}

impl SshSession {
    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Connects and authenticates in one step, probing the remote family
    /// afterward by running `uname` (falling back to Windows on failure).
    pub async fn connect(opts: SshOpts) -> Result<Self> {
        let host_params = Self::parse_ssh_config(&opts.hostname);
        let port = opts
            .port
            .or(host_params.as_ref().and_then(|p| p.port))
            .unwrap_or(22);
        let user = opts
            .username
            .clone()
            .or_else(|| host_params.as_ref().and_then(|p| p.user.clone()))
            .unwrap_or_else(whoami::username);

        info!("connecting to {}:{port} as {user}", opts.hostname);
        if opts.compress {
            debug!("compression requested; delegated to russh's negotiated defaults");
        }

        let mut config = client::Config::default();
        if let Some(timeout) = opts.timeout {
            config.keepalive_interval = Some(timeout);
        }

        let connect_result =
            client::connect(Arc::new(config), (opts.hostname.as_str(), port), ClientHandler).await;

        let handle = match connect_result {
            Ok(handle) => handle,
            Err(e) => {
                let detail = if let Some(io_err) =
                    e.source().and_then(|s| s.downcast_ref::<std::io::Error>())
                {
                    format!("{e} ({io_err}, kind: {:?})", io_err.kind())
                } else {
                    e.to_string()
                };
                return Err(Error::new(
                    conduit_core::error::ErrorKind::HostUnreachable,
                    format!("failed to connect to {}:{port}: {detail}", opts.hostname),
                ));
            }
        };

        let mut session = Self {
            handle,
            family: SshFamily::Unix,
            host: opts.hostname.clone(),
            port,
        };
        session.authenticate(&user, &opts).await?;
        session.family = session.probe_family().await;
        Ok(session)
    }

    fn parse_ssh_config(host: &str) -> Option<ssh2_config_rs::HostParams> {
        let config_path = dirs::home_dir()?.join(".ssh").join("config");
        if !config_path.exists() {
            return None;
        }
        let mut reader = BufReader::new(File::open(&config_path).ok()?);
        let config = SshConfig::default()
            .parse(&mut reader, ParseRule::ALLOW_UNSUPPORTED_FIELDS)
            .ok()?;
        Some(config.query(host))
    }

    async fn authenticate(&mut self, user: &str, opts: &SshOpts) -> Result<()> {
        let auth_err = |detail: String| {
            Error::new(
                conduit_core::error::ErrorKind::AuthFailed,
                format!("authentication as {user} failed: {detail}"),
            )
        };

        let key_files = self.candidate_key_files(opts);
        for key_file in &key_files {
            match Self::load_private_key(key_file, opts.passphrase.as_deref()) {
                Ok(key) => {
                    let key_with_hash = russh::keys::PrivateKeyWithHashAlg::new(Arc::new(key), None);
                    let result = self
                        .handle
                        .authenticate_publickey(user, key_with_hash)
                        .await
                        .map_err(|e| auth_err(e.to_string()))?;
                    if result.success() {
                        return Ok(());
                    }
                }
                Err(e) => warn!("could not load key {}: {e}", key_file.display()),
            }
        }

        let password = if let Some(password) = opts.password.as_deref() {
            Some(password.to_string())
        } else if opts.ask_password {
            Some(
                rpassword::prompt_password(format!("password for {user}@{}: ", self.host))
                    .map_err(|e| auth_err(e.to_string()))?,
            )
        } else {
            None
        };

        if let Some(password) = password {
            let result = self
                .handle
                .authenticate_password(user, &password)
                .await
                .map_err(|e| auth_err(e.to_string()))?;
            if result.success() {
                return Ok(());
            }
        }

        Err(auth_err(format!(
            "no credentials succeeded (tried {} key(s), password: {})",
            key_files.len(),
            opts.password.is_some() || opts.ask_password
        )))
    }

    fn candidate_key_files(&self, opts: &SshOpts) -> Vec<PathBuf> {
        if let Some(path) = &opts.private_key_path {
            return vec![path.clone()];
        }
        if !opts.look_for_keys {
            return Vec::new();
        }
        let Some(home) = dirs::home_dir() else {
            return Vec::new();
        };
        let ssh_dir = home.join(".ssh");
        [
            ssh_dir.join("id_ed25519"),
            ssh_dir.join("id_rsa"),
            ssh_dir.join("id_ecdsa"),
        ]
        .into_iter()
        .filter(|p| p.exists())
        .collect()
    }

    fn load_private_key(path: &PathBuf, passphrase: Option<&str>) -> Result<PrivateKey> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| Error::new(conduit_core::error::ErrorKind::NotFound, e.to_string()))?;
        russh::keys::decode_secret_key(&contents, passphrase)
            .map_err(|e| Error::new(conduit_core::error::ErrorKind::AuthFailed, e.to_string()))
    }

    async fn probe_family(&mut self) -> SshFamily {
        match self.run_probe("uname").await {
            Some(out) if out.to_lowercase().contains("linux") || out.to_lowercase().contains("darwin") => {
                SshFamily::Unix
            }
            Some(_) => SshFamily::Unix,
            None => SshFamily::Windows,
        }
    }

    async fn run_probe(&mut self, cmd: &str) -> Option<String> {
        let mut channel = self.handle.channel_open_session().await.ok()?;
        channel.exec(true, cmd).await.ok()?;
        let mut out = Vec::new();
        while let Some(msg) = channel.wait().await {
            if let russh::ChannelMsg::Data { data } = msg {
                out.extend_from_slice(&data);
            }
        }
        String::from_utf8(out).ok()
    }
}
