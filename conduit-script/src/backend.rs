//! [`conduit_core::Backend`] implementation that writes commands to a
//! script file instead of running them.
//!
//! Every predicate answers "truthy" (spec §9, "script-capture fake-truth")
//! so that client code written against a real backend — `if fs.isdir(x):
//! fs.rmdir(x)` — still serializes into a valid, idempotent script rather
//! than short-circuiting on a `false` the fake connection can't actually
//! know. Mutators and `exec_command` append shell source to the output
//! file; none of them touch a real filesystem.

use std::fmt::Write as _;
use std::path::PathBuf;

use async_trait::async_trait;
use conduit_core::backend::Backend;
use conduit_core::cmd::Cmd;
use conduit_core::env::EnvOverlay;
use conduit_core::error::{Error, Result};
use conduit_core::flux::VecFlux;
use conduit_core::observer::Observer;
use conduit_core::os::{OsType, Platform};
use log::debug;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;

/// Whether an existing file at `output_path` is truncated or appended to.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ScriptMode {
    Write,
    Append,
}

/// Options for opening a script-capture backend (spec §6, "Script:
/// {output-path, mode, OS type}").
#[derive(Clone, Debug)]
pub struct ScriptOpts {
    pub output_path: PathBuf,
    pub mode: ScriptMode,
    pub os_type: OsType,
}

impl ScriptOpts {
    pub fn new(output_path: impl Into<PathBuf>) -> Self {
        Self {
            output_path: output_path.into(),
            mode: ScriptMode::Write,
            os_type: OsType::Linux,
        }
    }
}

/// A fake backend that materializes `exec_command` calls as lines in a
/// shell script rather than running anything.
///
/// Grounded in `pyrc.system.scriptgenerator.ScriptGenerator`: the file
/// handle is held open for the backend's lifetime and every call appends
/// to it, never seeking or rewriting earlier lines.
pub struct ScriptBackend {
    file: File,
    os_type: OsType,
    /// Canonical (sorted) rendering of the last environment map written,
    /// so an unchanged overlay across consecutive calls isn't reprinted
    /// (`ScriptGenerator.__last_printed_env`).
    last_env: Option<String>,
    open: bool,
}

impl ScriptBackend {
    /// Opens the script file at `opts.output_path`, truncating or
    /// appending per `opts.mode`.
    pub async fn open(opts: ScriptOpts) -> Result<Self> {
        let mut options = tokio::fs::OpenOptions::new();
        options.write(true).create(true);
        match opts.mode {
            ScriptMode::Write => {
                options.truncate(true);
            }
            ScriptMode::Append => {
                options.append(true);
            }
        }
        let file = options.open(&opts.output_path).await.map_err(Error::from)?;
        debug!("script backend writing to {}", opts.output_path.display());
        Ok(Self {
            file,
            os_type: opts.os_type,
            last_env: None,
            open: true,
        })
    }

    pub fn close(&mut self) {
        self.open = false;
    }

    async fn emit(&mut self, s: &str) -> Result<()> {
        self.file.write_all(s.as_bytes()).await.map_err(Error::from)?;
        self.file.flush().await.map_err(Error::from)
    }

    /// Sorted `key=value` pairs, used both to render `export` lines
    /// deterministically and to detect an unchanged overlay across calls
    /// (a `HashMap`'s iteration order on its own isn't stable enough for
    /// either purpose).
    fn sorted_env(env: &EnvOverlay) -> Vec<(&str, &str)> {
        let mut pairs: Vec<(&str, &str)> = env.iter().collect();
        pairs.sort_by_key(|(k, _)| *k);
        pairs
    }
}

#[async_trait]
impl Backend for ScriptBackend {
    fn os_type(&self) -> OsType {
        self.os_type
    }

    fn is_remote(&self) -> bool {
        false
    }

    fn is_open(&self) -> bool {
        self.open
    }

    async fn exec_command(
        &mut self,
        cmd: &Cmd,
        cwd: &str,
        env: &EnvOverlay,
        observer: &mut dyn Observer,
    ) -> Result<(Vec<String>, Vec<String>, i32)> {
        if !self.open {
            return Err(Error::not_connected("script backend is closed"));
        }

        if !env.is_empty() {
            let pairs = Self::sorted_env(env);
            let repr = pairs.iter().fold(String::new(), |mut acc, (k, v)| {
                let _ = write!(acc, "{k}={v};");
                acc
            });
            if self.last_env.as_deref() != Some(repr.as_str()) {
                let mut buf = String::new();
                for (key, value) in &pairs {
                    let _ = writeln!(buf, "export {key}={value}");
                }
                buf.push('\n');
                self.emit(&buf).await?;
                self.last_env = Some(repr);
            }
        }

        let mut buf = String::new();
        if !cwd.is_empty() {
            let _ = writeln!(buf, "cd {cwd}");
        }
        let _ = writeln!(buf, "{cmd}");
        buf.push('\n');
        self.emit(&buf).await?;

        // The observer's begin/end lifecycle is still driven so its
        // invariants hold (spec §4.1: "begin/end are called with null
        // streams"), but its result is discarded: a script backend always
        // reports the fixed `(["ok"], [], 0)` tuple so downstream
        // predicate-chains in the caller's script see nothing but success.
        observer
            .begin(cmd, cwd, Box::new(VecFlux::new([])), Box::new(VecFlux::new([])))
            .await;
        let _ = observer.end().await;

        Ok((vec!["ok".to_string()], Vec::new(), 0))
    }

    async fn isfile(&mut self, _path: &str) -> Result<bool> {
        Ok(true)
    }

    async fn isdir(&mut self, _path: &str) -> Result<bool> {
        Ok(true)
    }

    async fn islink(&mut self, _path: &str) -> Result<bool> {
        Ok(true)
    }

    async fn isexe(&mut self, _path: &str) -> Result<bool> {
        Ok(true)
    }

    async fn getsize(&mut self, _path: &str) -> Result<i64> {
        Ok(0)
    }

    async fn mkdir(&mut self, path: &str, parents: bool, _exist_ok: bool) -> Result<()> {
        let line = if self.os_type.is_unix() {
            if parents {
                format!("mkdir -p {path}\n")
            } else {
                format!("mkdir {path}\n")
            }
        } else {
            format!("mkdir {path}\n")
        };
        self.emit(&line).await
    }

    async fn rmdir(&mut self, path: &str, recursive: bool) -> Result<()> {
        let line = if self.os_type.is_unix() {
            if recursive {
                format!("rm -rf {path}\n")
            } else {
                format!("rmdir {path}\n")
            }
        } else {
            format!("rmdir /s /q {path}\n")
        };
        self.emit(&line).await
    }

    async fn unlink(&mut self, path: &str, _missing_ok: bool) -> Result<()> {
        let line = if self.os_type.is_unix() {
            format!("rm -f {path}\n")
        } else {
            format!("del {path}\n")
        };
        self.emit(&line).await
    }

    async fn touch(&mut self, path: &str) -> Result<()> {
        let line = if self.os_type.is_unix() {
            format!("touch {path}\n")
        } else {
            format!("type nul > {path}\n")
        };
        self.emit(&line).await
    }

    async fn ls(&mut self, _path: &str) -> Result<Vec<String>> {
        Ok(Vec::new())
    }

    async fn walk0(&mut self, path: &str) -> Result<(String, Vec<String>, Vec<String>)> {
        Ok((path.to_string(), Vec::new(), Vec::new()))
    }

    async fn zip(&mut self, path: &str, archive_path: Option<&str>) -> Result<String> {
        let archive = archive_path.map(String::from).unwrap_or_else(|| format!("{path}.zip"));
        let line = if self.os_type.is_unix() {
            format!("zip -r {archive} {path}\n")
        } else {
            format!("Compress-Archive -Path {path} -DestinationPath {archive}\n")
        };
        self.emit(&line).await?;
        Ok(archive)
    }

    async fn unzip(&mut self, archive_path: &str, to_path: Option<&str>) -> Result<String> {
        let dest = to_path
            .map(String::from)
            .unwrap_or_else(|| archive_path.trim_end_matches(".zip").to_string());
        let line = if self.os_type.is_unix() {
            format!("unzip -o {archive_path} -d {dest}\n")
        } else {
            format!("Expand-Archive -Path {archive_path} -DestinationPath {dest}\n")
        };
        self.emit(&line).await?;
        Ok(dest)
    }

    async fn env(&mut self, _name: &str) -> Result<Option<String>> {
        Ok(None)
    }

    async fn platform(&mut self) -> Result<Platform> {
        Ok(Platform {
            system: self.os_type.to_string(),
            release: String::new(),
        })
    }

    async fn abspath(&mut self, path: &str) -> Result<String> {
        Ok(path.to_string())
    }

    async fn realpath(&mut self, path: &str) -> Result<String> {
        Ok(path.to_string())
    }

    async fn copy(&mut self, from: &str, to: &str) -> Result<()> {
        let line = if self.os_type.is_unix() {
            format!("cp -r {from} {to}\n")
        } else {
            format!("copy {from} {to}\n")
        };
        self.emit(&line).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conduit_core::observer::Store;

    async fn read_script(path: &std::path::Path) -> String {
        tokio::fs::read_to_string(path).await.unwrap()
    }

    #[tokio::test]
    async fn mkdir_then_touch_produce_exact_script_lines() {
        let dir = assert_fs::TempDir::new().unwrap();
        let script_path = dir.path().join("out.sh");
        let mut backend = ScriptBackend::open(ScriptOpts::new(&script_path)).await.unwrap();

        backend.mkdir("/x", false, true).await.unwrap();
        backend.touch("/x/y.txt").await.unwrap();

        let contents = read_script(&script_path).await;
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines, vec!["mkdir /x", "touch /x/y.txt"]);
    }

    #[tokio::test]
    async fn exec_command_always_reports_ok() {
        let dir = assert_fs::TempDir::new().unwrap();
        let script_path = dir.path().join("out.sh");
        let mut backend = ScriptBackend::open(ScriptOpts::new(&script_path)).await.unwrap();
        let mut observer = Store::new();

        let (out, err, status) = backend
            .exec_command(&Cmd::new("git status"), "", &EnvOverlay::new(), &mut observer)
            .await
            .unwrap();
        assert_eq!(out, vec!["ok".to_string()]);
        assert!(err.is_empty());
        assert_eq!(status, 0);

        let contents = read_script(&script_path).await;
        assert!(contents.contains("git status\n"));
    }

    #[tokio::test]
    async fn repeated_identical_env_overlay_is_written_once() {
        let dir = assert_fs::TempDir::new().unwrap();
        let script_path = dir.path().join("out.sh");
        let mut backend = ScriptBackend::open(ScriptOpts::new(&script_path)).await.unwrap();
        let mut observer = Store::new();

        let mut env = EnvOverlay::new();
        env.insert("PATH", "/usr/bin");

        backend
            .exec_command(&Cmd::new("true"), "", &env, &mut observer)
            .await
            .unwrap();
        backend
            .exec_command(&Cmd::new("true"), "", &env, &mut observer)
            .await
            .unwrap();

        let contents = read_script(&script_path).await;
        assert_eq!(contents.matches("export PATH=/usr/bin").count(), 1);
    }

    #[tokio::test]
    async fn predicates_always_answer_truthy() {
        let dir = assert_fs::TempDir::new().unwrap();
        let script_path = dir.path().join("out.sh");
        let mut backend = ScriptBackend::open(ScriptOpts::new(&script_path)).await.unwrap();
        assert!(backend.isfile("/never/real").await.unwrap());
        assert!(backend.isdir("/never/real").await.unwrap());
        assert!(backend.islink("/never/real").await.unwrap());
        assert!(backend.isexe("/never/real").await.unwrap());
    }

    #[tokio::test]
    async fn cwd_is_only_emitted_when_nonempty() {
        let dir = assert_fs::TempDir::new().unwrap();
        let script_path = dir.path().join("out.sh");
        let mut backend = ScriptBackend::open(ScriptOpts::new(&script_path)).await.unwrap();
        let mut observer = Store::new();

        backend
            .exec_command(&Cmd::new("pwd"), "/home/u", &EnvOverlay::new(), &mut observer)
            .await
            .unwrap();

        let contents = read_script(&script_path).await;
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines, vec!["cd /home/u", "pwd"]);
    }
}
