//! The local-machine backend: direct `tokio::fs` syscalls for predicates
//! and mutators, a shelled-out subprocess for `exec_command`. Grounded in
//! distant's own local filesystem plugin
//! (`distant-local/src/api.rs`'s `create_dir`/`remove`/`copy` handlers)
//! and its host-process spawner
//! (`distant-host/src/api/process/simple.rs`).

use std::path::Path;
use std::process::Stdio;

use async_trait::async_trait;
use conduit_core::backend::Backend;
use conduit_core::cmd::Cmd;
use conduit_core::env::{EnvCache, EnvOverlay};
use conduit_core::error::{Error, Result};
use conduit_core::flux::ReaderFlux;
use conduit_core::observer::Observer;
use conduit_core::os::{OsType, Platform};
use log::debug;
use tokio::process::Command;

use crate::archive;

/// Backend executing directly on the machine conduit itself runs on.
///
/// Has no connection state — `is_open()` is always true once
/// constructed, matching spec §6's local creation configuration of
/// `{}` (no options).
pub struct LocalBackend {
    os: OsType,
    env_cache: EnvCache,
}

impl LocalBackend {
    pub fn new() -> Self {
        let os = match std::env::consts::OS {
            "windows" => OsType::Windows,
            "macos" => OsType::MacOs,
            "linux" => OsType::Linux,
            _ => OsType::Unknown,
        };
        Self {
            os,
            env_cache: EnvCache::new(),
        }
    }

    fn shell_command(&self, cmd: &Cmd, cwd: &str, env: &EnvOverlay) -> Command {
        let mut command = if self.os == OsType::Windows {
            let mut c = Command::new("cmd");
            c.arg("/C").arg(cmd.as_str());
            c
        } else {
            let mut c = Command::new("sh");
            c.arg("-c").arg(cmd.as_str());
            c
        };

        if !cwd.is_empty() {
            command.current_dir(cwd);
        }

        // An empty overlay inherits the parent environment unchanged; a
        // non-empty overlay is merged on top of it (`Command::envs`
        // layers onto the already-inherited set, it doesn't replace it).
        if !env.is_empty() {
            command.envs(env.iter());
        }

        command
    }
}

impl Default for LocalBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Backend for LocalBackend {
    fn os_type(&self) -> OsType {
        self.os
    }

    fn is_remote(&self) -> bool {
        false
    }

    fn is_open(&self) -> bool {
        true
    }

    async fn exec_command(
        &mut self,
        cmd: &Cmd,
        cwd: &str,
        env: &EnvOverlay,
        observer: &mut dyn Observer,
    ) -> Result<(Vec<String>, Vec<String>, i32)> {
        debug!("executing locally: {cmd} (cwd={cwd:?})");
        let mut command = self.shell_command(cmd, cwd, env);
        let mut child = command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        let stdout = child.stdout.take().expect("piped stdout");
        let stderr = child.stderr.take().expect("piped stderr");

        observer
            .begin(cmd, cwd, Box::new(ReaderFlux::new(stdout)), Box::new(ReaderFlux::new(stderr)))
            .await;
        let (stdout_lines, stderr_lines, _) = observer.end().await?;

        // The observer only sees pipes, which have no channel-level exit
        // status; wait on the child directly for the real one rather than
        // defaulting to 0 (spec §9 redesign note).
        let status = child.wait().await?;
        let exit_status = status.code().unwrap_or(-1);

        Ok((stdout_lines, stderr_lines, exit_status))
    }

    async fn isfile(&mut self, path: &str) -> Result<bool> {
        Ok(tokio::fs::metadata(path).await.map(|m| m.is_file()).unwrap_or(false))
    }

    async fn isdir(&mut self, path: &str) -> Result<bool> {
        Ok(tokio::fs::metadata(path).await.map(|m| m.is_dir()).unwrap_or(false))
    }

    async fn islink(&mut self, path: &str) -> Result<bool> {
        Ok(tokio::fs::symlink_metadata(path)
            .await
            .map(|m| m.file_type().is_symlink())
            .unwrap_or(false))
    }

    async fn isexe(&mut self, path: &str) -> Result<bool> {
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            Ok(tokio::fs::metadata(path)
                .await
                .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
                .unwrap_or(false))
        }
        #[cfg(not(unix))]
        {
            self.isfile(path).await
        }
    }

    async fn getsize(&mut self, path: &str) -> Result<i64> {
        match tokio::fs::metadata(path).await {
            Ok(meta) => Ok(meta.len() as i64),
            Err(_) => Ok(-1),
        }
    }

    async fn mkdir(&mut self, path: &str, parents: bool, exist_ok: bool) -> Result<()> {
        let exists = tokio::fs::try_exists(path).await.unwrap_or(false);
        if exists && !exist_ok {
            return Err(Error::already_exists(format!("{path} already exists")));
        }
        if exists {
            return Ok(());
        }
        if parents {
            tokio::fs::create_dir_all(path).await?;
        } else {
            tokio::fs::create_dir(path).await?;
        }
        Ok(())
    }

    async fn rmdir(&mut self, path: &str, recursive: bool) -> Result<()> {
        if recursive {
            tokio::fs::remove_dir_all(path).await?;
        } else {
            tokio::fs::remove_dir(path).await?;
        }
        Ok(())
    }

    async fn unlink(&mut self, path: &str, missing_ok: bool) -> Result<()> {
        match tokio::fs::remove_file(path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound && missing_ok => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(Error::not_found(format!("{path} does not exist")))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn touch(&mut self, path: &str) -> Result<()> {
        let parent = self.path_syntax().dirname(path);
        if !parent.is_empty() && !Path::new(&parent).is_dir() {
            return Err(Error::not_found(format!("parent directory {parent} does not exist")));
        }
        tokio::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .open(path)
            .await?;
        Ok(())
    }

    async fn ls(&mut self, path: &str) -> Result<Vec<String>> {
        let mut entries = tokio::fs::read_dir(path).await?;
        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
        Ok(names)
    }

    async fn walk0(&mut self, path: &str) -> Result<(String, Vec<String>, Vec<String>)> {
        let root = self.abspath(path).await?;
        let mut entries = tokio::fs::read_dir(&root).await?;
        let mut dirnames = Vec::new();
        let mut filenames = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            if entry.file_type().await?.is_dir() {
                dirnames.push(name);
            } else {
                filenames.push(name);
            }
        }
        Ok((root, dirnames, filenames))
    }

    async fn zip(&mut self, path: &str, archive_path: Option<&str>) -> Result<String> {
        let result = archive::zip_path(
            path.into(),
            archive_path.map(Into::into),
        )
        .await?;
        Ok(result.to_string_lossy().into_owned())
    }

    async fn unzip(&mut self, archive_path: &str, to_path: Option<&str>) -> Result<String> {
        let result = archive::unzip_path(archive_path.into(), to_path.map(Into::into)).await?;
        Ok(result.to_string_lossy().into_owned())
    }

    async fn env(&mut self, name: &str) -> Result<Option<String>> {
        let name = name.to_string();
        self.env_cache.get_or_fetch(&name, || Ok(std::env::var(&name).ok()))
    }

    async fn platform(&mut self) -> Result<Platform> {
        let system = match self.os {
            OsType::Linux => "Linux",
            OsType::MacOs => "Darwin",
            OsType::Windows => "Windows",
            OsType::Unknown => "Unknown",
        };
        Ok(Platform {
            system: system.to_string(),
            release: std::env::consts::ARCH.to_string(),
        })
    }

    async fn abspath(&mut self, path: &str) -> Result<String> {
        let p = Path::new(path);
        let abs = if p.is_absolute() {
            p.to_path_buf()
        } else {
            std::env::current_dir()?.join(p)
        };
        Ok(abs.to_string_lossy().into_owned())
    }

    async fn realpath(&mut self, path: &str) -> Result<String> {
        let resolved = tokio::fs::canonicalize(path).await?;
        Ok(resolved.to_string_lossy().into_owned())
    }

    async fn copy(&mut self, from: &str, to: &str) -> Result<()> {
        let metadata = tokio::fs::metadata(from).await?;
        if metadata.is_dir() {
            copy_dir_recursive(from, to).await
        } else {
            tokio::fs::copy(from, to).await?;
            Ok(())
        }
    }
}

/// Recursive directory copy, mirroring `distant-local`'s `copy` handler:
/// create the destination tree as we walk the source, copying files as
/// we encounter them.
async fn copy_dir_recursive(from: &str, to: &str) -> Result<()> {
    tokio::fs::create_dir_all(to).await?;
    for entry in walkdir::WalkDir::new(from).min_depth(1) {
        let entry = entry.map_err(std::io::Error::from)?;
        let relative = entry
            .path()
            .strip_prefix(from)
            .expect("walked entry is under its root");
        let dest = Path::new(to).join(relative);

        if entry.file_type().is_dir() {
            tokio::fs::create_dir_all(&dest).await?;
        } else {
            if let Some(parent) = dest.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::copy(entry.path(), &dest).await?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_fs::prelude::*;
    use assert_fs::TempDir;
    use conduit_core::observer::Store;
    use predicates::prelude::*;

    #[tokio::test]
    async fn mkdir_is_idempotent_with_exist_ok() {
        let dir = TempDir::new().unwrap();
        let target = dir.child("nested/dir");
        let path = target.path().to_string_lossy().into_owned();
        let mut backend = LocalBackend::new();

        backend.mkdir(&path, true, true).await.unwrap();
        backend.mkdir(&path, true, true).await.unwrap();
        assert!(backend.isdir(&path).await.unwrap());
    }

    #[tokio::test]
    async fn mkdir_without_exist_ok_fails_on_second_call() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().to_string_lossy().into_owned();
        let mut backend = LocalBackend::new();

        let err = backend.mkdir(&path, true, false).await.unwrap_err();
        assert_eq!(err.kind, conduit_core::error::ErrorKind::AlreadyExists);
    }

    #[tokio::test]
    async fn rmdir_recursive_removes_nested_tree() {
        let dir = TempDir::new().unwrap();
        dir.child("a/b/c/file.txt").write_str("x").unwrap();
        let path_a = dir.child("a").path().to_string_lossy().into_owned();
        let mut backend = LocalBackend::new();

        backend.rmdir(&path_a, true).await.unwrap();
        assert!(!backend.isdir(&path_a).await.unwrap());
        dir.child("a").assert(predicate::path::missing());
    }

    #[tokio::test]
    async fn exec_command_captures_stdout_lines_in_order() {
        let mut backend = LocalBackend::new();
        let mut observer = Store::new();
        let (stdout, stderr, status) = backend
            .exec_command(
                &Cmd::new("printf 'l1\\nl2\\nl3\\n'"),
                "",
                &EnvOverlay::new(),
                &mut observer,
            )
            .await
            .unwrap();
        assert_eq!(stdout, vec!["l1".to_string(), "l2".to_string(), "l3".to_string()]);
        assert!(stderr.is_empty());
        assert_eq!(status, 0);
    }

    #[tokio::test]
    async fn touch_creates_missing_file_without_truncating_existing() {
        let dir = TempDir::new().unwrap();
        let file = dir.child("f.txt");
        file.write_str("keep me").unwrap();
        let path = file.path().to_string_lossy().into_owned();
        let mut backend = LocalBackend::new();

        backend.touch(&path).await.unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "keep me");
    }

    #[tokio::test]
    async fn copy_mirrors_a_directory_tree() {
        let src = TempDir::new().unwrap();
        src.child("a.txt").write_str("1").unwrap();
        src.child("sub/b.txt").write_str("2").unwrap();
        let dest = TempDir::new().unwrap();
        let dest_path = dest.child("mirrored");

        let mut backend = LocalBackend::new();
        backend
            .copy(
                &src.path().to_string_lossy(),
                &dest_path.path().to_string_lossy(),
            )
            .await
            .unwrap();

        assert_eq!(
            std::fs::read_to_string(dest_path.path().join("a.txt")).unwrap(),
            "1"
        );
        assert_eq!(
            std::fs::read_to_string(dest_path.path().join("sub/b.txt")).unwrap(),
            "2"
        );
    }
}
