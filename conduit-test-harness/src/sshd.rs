//! A throwaway local `sshd` instance for integration-testing
//! `conduit-ssh` against a real server instead of a fake `Backend`.
//! Grounded in `distant-test-harness::sshd`, condensed to the Unix-only
//! path: Windows ACL wrangling and Windows-Server-2025 diagnostics are
//! dropped per the "no remote-Windows parity" non-goal.

use std::collections::HashMap;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};
use std::process::{Child, Command};
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use std::thread;

use anyhow::Context;
use assert_fs::TempDir;
use assert_fs::prelude::*;
use conduit_ssh::{SshBackend, SshOpts, SshSession};
use log::{debug, error};
use once_cell::sync::Lazy;

/// IANA-recommended ephemeral port range to scan for a free slot.
const PORT_RANGE: (u16, u16) = (49152, 65535);

/// Time to wait after spawning sshd before checking it's still alive.
const WAIT_AFTER_SPAWN: Duration = Duration::from_millis(300);

/// Maximum times to retry spawning sshd end to end if it dies immediately.
const SPAWN_RETRY_CNT: usize = 3;

const MAX_DROP_WAIT_TIME: Duration = Duration::from_millis(500);

pub static USERNAME: Lazy<String> = Lazy::new(whoami::username);

static BIN_PATH: Lazy<PathBuf> = Lazy::new(|| which::which("sshd").expect("sshd binary not found on PATH"));

/// Shells out to `ssh-keygen -t ed25519` and chmods the resulting pair
/// `0600`, which OpenSSH refuses to use otherwise.
pub struct SshKeygen;

impl SshKeygen {
    pub fn generate_ed25519(path: impl AsRef<Path>, passphrase: impl AsRef<str>) -> anyhow::Result<bool> {
        let ok = Command::new("ssh-keygen")
            .args(["-m", "PEM"])
            .args(["-t", "ed25519"])
            .arg("-f")
            .arg(path.as_ref())
            .arg("-N")
            .arg(passphrase.as_ref())
            .arg("-q")
            .status()
            .map(|status| status.success())
            .context("failed to run ssh-keygen")?;

        if ok {
            use std::os::unix::fs::PermissionsExt;
            for key in [path.as_ref().to_path_buf(), path.as_ref().with_extension("pub")] {
                std::fs::set_permissions(&key, std::fs::Permissions::from_mode(0o600))
                    .with_context(|| format!("failed to chmod {key:?}"))?;
            }
        }

        Ok(ok)
    }
}

/// `sshd -D` log verbosity.
#[allow(dead_code)]
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum SshdLogLevel {
    Quiet,
    Fatal,
    Error,
    Info,
    Verbose,
    Debug,
    Debug1,
    Debug2,
    Debug3,
}

impl fmt::Display for SshdLogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Quiet => "QUIET",
            Self::Fatal => "FATAL",
            Self::Error => "ERROR",
            Self::Info => "INFO",
            Self::Verbose => "VERBOSE",
            Self::Debug => "DEBUG",
            Self::Debug1 => "DEBUG1",
            Self::Debug2 => "DEBUG2",
            Self::Debug3 => "DEBUG3",
        };
        f.write_str(s)
    }
}

/// `sshd_config` keyword/value pairs, rendered with quoting for values
/// containing whitespace.
#[derive(Debug)]
pub struct SshdConfig(HashMap<String, Vec<String>>);

impl Default for SshdConfig {
    fn default() -> Self {
        let mut config = Self::new();
        config.set("AuthenticationMethods", ["publickey"]);
        config.set("PubkeyAuthentication", ["yes"]);
        config.set("UsePrivilegeSeparation", ["no"]);
        config.set("UsePAM", ["no"]);
        config.set("Subsystem", ["sftp", "internal-sftp"]);
        config.set("X11Forwarding", ["yes"]);
        config.set("PrintMotd", ["yes"]);
        config.set("PermitTunnel", ["yes"]);
        config.set("KbdInteractiveAuthentication", ["yes"]);
        config.set("AllowTcpForwarding", ["yes"]);
        config.set("MaxStartups", ["500"]);
        config.set("StrictModes", ["no"]);
        config.set("LogLevel", [SshdLogLevel::Debug3.to_string().as_str()]);
        config
    }
}

impl SshdConfig {
    pub fn new() -> Self {
        Self(HashMap::new())
    }

    fn set<const N: usize>(&mut self, keyword: &str, values: [&str; N]) {
        self.0
            .insert(keyword.to_string(), values.iter().map(|v| v.to_string()).collect());
    }

    pub fn set_authorized_keys_file(&mut self, path: impl AsRef<Path>) {
        self.set("AuthorizedKeysFile", [&path.as_ref().to_string_lossy()]);
    }

    pub fn set_host_key(&mut self, path: impl AsRef<Path>) {
        self.set("HostKey", [&path.as_ref().to_string_lossy()]);
    }

    pub fn set_pid_file(&mut self, path: impl AsRef<Path>) {
        self.set("PidFile", [&path.as_ref().to_string_lossy()]);
    }
}

impl fmt::Display for SshdConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (keyword, values) in self.0.iter() {
            let rendered = values
                .iter()
                .map(|v| {
                    if v.contains(char::is_whitespace) {
                        format!("\"{v}\"")
                    } else {
                        v.clone()
                    }
                })
                .collect::<Vec<_>>()
                .join(" ");
            writeln!(f, "{keyword} {rendered}")?;
        }
        Ok(())
    }
}

/// A running local `sshd`, killed on drop. `tmp` holds its generated
/// host/client keypairs, `authorized_keys`, config, and log file.
pub struct Sshd {
    child: Mutex<Option<Child>>,
    pub port: u16,
    pub tmp: TempDir,
    pub config_file: PathBuf,
    pub log_file: PathBuf,
}

impl Sshd {
    pub fn is_dead(&self) -> bool {
        self.child.lock().unwrap().is_none()
    }

    pub fn spawn(mut config: SshdConfig) -> anyhow::Result<Self> {
        let tmp = TempDir::new().context("failed to create temp dir for sshd")?;

        let client_key = tmp.child("id_ed25519");
        assert!(
            SshKeygen::generate_ed25519(client_key.path(), "").context("keygen for client key")?,
            "ssh-keygen for client key failed"
        );

        let authorized_keys = tmp.child("authorized_keys");
        std::fs::copy(client_key.path().with_extension("pub"), authorized_keys.path())
            .context("copying client pub key into authorized_keys")?;

        let host_key = tmp.child("ssh_host_ed25519_key");
        assert!(
            SshKeygen::generate_ed25519(host_key.path(), "").context("keygen for host key")?,
            "ssh-keygen for host key failed"
        );

        config.set_authorized_keys_file(&authorized_keys);
        config.set_host_key(host_key.path());
        config.set_pid_file(tmp.child("sshd.pid").path());

        let config_file = tmp.child("sshd_config");
        config_file
            .write_str(&config.to_string())
            .context("writing sshd_config")?;

        let log_file = tmp.child("sshd.log");

        let (child, port) = Self::try_spawn_next(config_file.path(), log_file.path())
            .context("failed to find an open port for sshd")?;

        Ok(Self {
            child: Mutex::new(Some(child)),
            port,
            tmp,
            config_file: config_file.to_path_buf(),
            log_file: log_file.to_path_buf(),
        })
    }

    fn try_spawn_next(config_path: &Path, log_path: &Path) -> anyhow::Result<(Child, u16)> {
        static PORT: AtomicU16 = AtomicU16::new(0);

        PORT.compare_exchange(
            0,
            PORT_RANGE.0 + (std::process::id() as u16 % (PORT_RANGE.1 - PORT_RANGE.0)),
            Ordering::Relaxed,
            Ordering::Relaxed,
        )
        .ok();

        let max_port_attempts = 100;
        for _ in 0..max_port_attempts {
            let port = PORT.fetch_add(1, Ordering::Relaxed);
            let port = PORT_RANGE.0 + ((port - PORT_RANGE.0) % (PORT_RANGE.1 - PORT_RANGE.0));

            match Self::try_spawn(port, config_path, log_path) {
                Ok(Ok(child)) => return Ok((child, port)),
                Ok(Err((code, msg))) => {
                    error!("sshd exited immediately on port {port} ({code:?}): {msg}, trying next port");
                }
                Err(e) => {
                    error!("failed to spawn sshd on port {port}: {e}, trying next port");
                }
            }
        }

        anyhow::bail!("failed to find an open port for sshd after {max_port_attempts} attempts")
    }

    fn try_spawn(port: u16, config_path: &Path, log_path: &Path) -> anyhow::Result<Result<Child, (Option<i32>, String)>> {
        drop(
            std::net::TcpListener::bind((IpAddr::V4(Ipv4Addr::LOCALHOST), port))
                .with_context(|| format!("port {port} already taken"))?,
        );

        let mut child = Command::new(&*BIN_PATH)
            .arg("-D")
            .arg("-p")
            .arg(port.to_string())
            .arg("-f")
            .arg(config_path)
            .arg("-E")
            .arg(log_path)
            .spawn()
            .context("failed to spawn sshd process")?;

        thread::sleep(Duration::from_millis(100));
        match check(child)? {
            Ok(c) => {
                child = c;
                Ok(Ok(child))
            }
            err @ Err(_) => Ok(err),
        }
    }

    pub fn check_is_alive(&self) -> bool {
        let mut guard = self.child.lock().unwrap();
        match guard.take() {
            Some(mut child) => match child.try_wait() {
                Ok(None) => {
                    *guard = Some(child);
                    true
                }
                _ => false,
            },
            None => false,
        }
    }

    fn print_log_file(&self) {
        if let Ok(log) = std::fs::read_to_string(&self.log_file) {
            if !log.trim().is_empty() {
                error!("sshd log ({:?}):\n{log}", self.log_file);
            }
        }
    }

    /// SSH options for connecting to this server as its generated client
    /// keypair, with host-key checking disabled for the test run.
    pub fn ssh_opts(&self) -> SshOpts {
        SshOpts {
            port: Some(self.port),
            username: Some(USERNAME.clone()),
            private_key_path: Some(self.tmp.child("id_ed25519").path().to_path_buf()),
            look_for_keys: false,
            ..SshOpts::new("127.0.0.1")
        }
    }
}

impl Drop for Sshd {
    fn drop(&mut self) {
        debug!("dropping sshd");
        if let Some(mut child) = self.child.lock().unwrap().take() {
            let _ = child.kill();

            let start = Instant::now();
            while start.elapsed() < MAX_DROP_WAIT_TIME {
                match child.try_wait() {
                    Ok(Some(_)) => return,
                    Err(e) => {
                        error!("failed waiting for sshd to quit: {e}");
                        return;
                    }
                    _ => thread::sleep(MAX_DROP_WAIT_TIME / 10),
                }
            }
            error!("timed out waiting for sshd to quit");
        }
    }
}

fn check(mut child: Child) -> anyhow::Result<Result<Child, (Option<i32>, String)>> {
    if let Some(status) = child.try_wait().context("checking sshd status")? {
        let output = child.wait_with_output().context("waiting on sshd output")?;
        Ok(Err((
            status.code(),
            format!(
                "{}\n{}",
                String::from_utf8_lossy(&output.stdout),
                String::from_utf8_lossy(&output.stderr)
            ),
        )))
    } else {
        Ok(Ok(child))
    }
}

/// An `rstest` fixture producing a live `sshd`, retrying a handful of
/// times if it doesn't stay up long enough to be useful.
#[rstest::fixture]
pub fn sshd() -> Sshd {
    for attempt in 0..SPAWN_RETRY_CNT {
        match Sshd::spawn(SshdConfig::default()) {
            Ok(sshd) => {
                thread::sleep(WAIT_AFTER_SPAWN);
                if sshd.check_is_alive() {
                    return sshd;
                }
                sshd.print_log_file();
            }
            Err(e) if attempt + 1 == SPAWN_RETRY_CNT => panic!("{e}"),
            Err(_) => thread::sleep(WAIT_AFTER_SPAWN),
        }
    }
    unreachable!("loop always returns or panics on its last iteration")
}

/// An `rstest` fixture producing an [`SshBackend`] already connected and
/// authenticated against the fixture `sshd`. `_guard` keeps the server
/// alive for the backend's lifetime; drop order keeps the backend first.
pub struct Connected {
    pub backend: SshBackend,
    _guard: Sshd,
}

#[rstest::fixture]
pub async fn ssh_backend(sshd: Sshd) -> anyhow::Result<Connected> {
    let session = SshSession::connect(sshd.ssh_opts())
        .await
        .map_err(|e| anyhow::anyhow!("{e}"))
        .context("connecting to fixture sshd")?;
    Ok(Connected {
        backend: SshBackend::new(session),
        _guard: sshd,
    })
}
