//! The backend contract (spec §4.1): the single capability set every
//! execution backend variant — local, SSH, container, script-capture —
//! implements. A sum type over these variants, rather than an
//! inheritance chain, is how conduit avoids the method-resolution-order
//! traps the Python original's mixin-heavy `FileSystem` hierarchy fell
//! into (design note, spec §9).

use async_trait::async_trait;

use crate::cmd::Cmd;
use crate::env::EnvOverlay;
use crate::error::Result;
use crate::observer::Observer;
use crate::os::{OsType, Platform};
use crate::path::PathSyntax;
use crate::tree::Tree;

/// A polymorphic handle to an executor of commands and owner of a notion
/// of filesystem.
///
/// Every method is `&mut self`: a backend's environment cache and
/// transport state are mutated by nearly every call, and conduit does
/// not support concurrent use of a single backend from multiple tasks
/// (spec §5, "multi-threaded use of a single backend is not supported").
#[async_trait]
pub trait Backend: Send {
    fn os_type(&self) -> OsType;
    fn is_remote(&self) -> bool;
    fn is_open(&self) -> bool;

    fn path_syntax(&self) -> PathSyntax {
        PathSyntax::new(self.os_type())
    }

    /// Executes `cmd` with working directory `cwd` (empty = backend
    /// default) and environment overlay `env` (empty = inherit). Hands
    /// the resulting output streams to `observer.begin` and returns
    /// whatever `observer.end` returns.
    async fn exec_command(
        &mut self,
        cmd: &Cmd,
        cwd: &str,
        env: &EnvOverlay,
        observer: &mut dyn Observer,
    ) -> Result<(Vec<String>, Vec<String>, i32)>;

    async fn isfile(&mut self, path: &str) -> Result<bool>;
    async fn isdir(&mut self, path: &str) -> Result<bool>;
    async fn islink(&mut self, path: &str) -> Result<bool>;
    async fn isexe(&mut self, path: &str) -> Result<bool>;

    /// Size in bytes, or a negative/zero sentinel if undefined for this
    /// backend/path (spec §4.1: "−1 or 0 if undefined").
    async fn getsize(&mut self, path: &str) -> Result<i64>;

    /// Fails with `AlreadyExists` if `path` exists and `exist_ok` is
    /// false; fails with `NotFound` if a parent component is missing and
    /// `parents` is false.
    async fn mkdir(&mut self, path: &str, parents: bool, exist_ok: bool) -> Result<()>;
    async fn rmdir(&mut self, path: &str, recursive: bool) -> Result<()>;
    /// Fails with `NotFound` if `path` is absent and `missing_ok` is false.
    async fn unlink(&mut self, path: &str, missing_ok: bool) -> Result<()>;
    async fn touch(&mut self, path: &str) -> Result<()>;

    /// One level of directory listing.
    async fn ls(&mut self, path: &str) -> Result<Vec<String>>;

    /// `(root, dirnames, filenames)` for exactly one directory level,
    /// following `os.walk`'s early-return-on-first-level idiom in the
    /// original (`FileSystemTree.get_tree`'s loop body `return`s after
    /// its first iteration).
    async fn walk0(&mut self, path: &str) -> Result<(String, Vec<String>, Vec<String>)>;

    /// A recursive snapshot of `path`, built via repeated [`Backend::walk0`]
    /// calls. Provided in terms of the other methods; backends should not
    /// need to override it.
    async fn lsdir(&mut self, path: &str) -> Result<Tree>
    where
        Self: Sized,
    {
        Tree::snapshot(self, path).await
    }

    /// Compresses `path` (a file or directory) into a `.zip` archive,
    /// returning the archive's path. When `path` is a directory, its
    /// contents (not the directory itself) become the archive root.
    async fn zip(&mut self, path: &str, archive_path: Option<&str>) -> Result<String>;

    /// Extracts `archive_path` to `to_path` (or a backend-chosen
    /// location when `None`), returning the resulting folder path.
    async fn unzip(&mut self, archive_path: &str, to_path: Option<&str>) -> Result<String>;

    /// Single environment variable lookup.
    async fn env(&mut self, name: &str) -> Result<Option<String>>;
    async fn platform(&mut self) -> Result<Platform>;

    async fn abspath(&mut self, path: &str) -> Result<String>;
    async fn realpath(&mut self, path: &str) -> Result<String>;

    /// Same-filesystem copy primitive (spec §4.4: "single-backend copy:
    /// delegate to the backend's copy primitive for each file").
    async fn copy(&mut self, from: &str, to: &str) -> Result<()>;
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::observer::Store;
    use std::collections::HashMap;

    /// A minimal in-memory [`Backend`] used by conduit-core's own unit
    /// tests (the tree snapshot logic, mainly) so they don't depend on a
    /// real filesystem.
    pub struct FakeBackend {
        dirs: HashMap<String, (Vec<String>, Vec<String>)>,
    }

    impl FakeBackend {
        pub fn with_tree(_root: &str, entries: Vec<(&str, Vec<&str>, Vec<&str>)>) -> Self {
            let dirs = entries
                .into_iter()
                .map(|(path, dirnames, filenames)| {
                    (
                        path.to_string(),
                        (
                            dirnames.into_iter().map(String::from).collect(),
                            filenames.into_iter().map(String::from).collect(),
                        ),
                    )
                })
                .collect();
            Self { dirs }
        }
    }

    #[async_trait]
    impl Backend for FakeBackend {
        fn os_type(&self) -> OsType {
            OsType::Linux
        }

        fn is_remote(&self) -> bool {
            false
        }

        fn is_open(&self) -> bool {
            true
        }

        async fn exec_command(
            &mut self,
            _cmd: &Cmd,
            _cwd: &str,
            _env: &EnvOverlay,
            _observer: &mut dyn Observer,
        ) -> Result<(Vec<String>, Vec<String>, i32)> {
            Ok((Vec::new(), Vec::new(), 0))
        }

        async fn isfile(&mut self, path: &str) -> Result<bool> {
            Ok(!self.dirs.contains_key(path))
        }

        async fn isdir(&mut self, path: &str) -> Result<bool> {
            Ok(self.dirs.contains_key(path))
        }

        async fn islink(&mut self, _path: &str) -> Result<bool> {
            Ok(false)
        }

        async fn isexe(&mut self, _path: &str) -> Result<bool> {
            Ok(false)
        }

        async fn getsize(&mut self, _path: &str) -> Result<i64> {
            Ok(0)
        }

        async fn mkdir(&mut self, _path: &str, _parents: bool, _exist_ok: bool) -> Result<()> {
            Ok(())
        }

        async fn rmdir(&mut self, _path: &str, _recursive: bool) -> Result<()> {
            Ok(())
        }

        async fn unlink(&mut self, _path: &str, _missing_ok: bool) -> Result<()> {
            Ok(())
        }

        async fn touch(&mut self, _path: &str) -> Result<()> {
            Ok(())
        }

        async fn ls(&mut self, path: &str) -> Result<Vec<String>> {
            let (dirs, files) = self.dirs.get(path).cloned().unwrap_or_default();
            Ok(dirs.into_iter().chain(files).collect())
        }

        async fn walk0(&mut self, path: &str) -> Result<(String, Vec<String>, Vec<String>)> {
            let (dirs, files) = self
                .dirs
                .get(path)
                .cloned()
                .ok_or_else(|| crate::error::Error::not_found(path.to_string()))?;
            Ok((path.to_string(), dirs, files))
        }

        async fn zip(&mut self, path: &str, archive_path: Option<&str>) -> Result<String> {
            Ok(archive_path.map(String::from).unwrap_or_else(|| format!("{path}.zip")))
        }

        async fn unzip(&mut self, archive_path: &str, to_path: Option<&str>) -> Result<String> {
            Ok(to_path
                .map(String::from)
                .unwrap_or_else(|| archive_path.trim_end_matches(".zip").to_string()))
        }

        async fn env(&mut self, _name: &str) -> Result<Option<String>> {
            Ok(None)
        }

        async fn platform(&mut self) -> Result<Platform> {
            Ok(Platform {
                system: "Linux".to_string(),
                release: "test".to_string(),
            })
        }

        async fn abspath(&mut self, path: &str) -> Result<String> {
            Ok(path.to_string())
        }

        async fn realpath(&mut self, path: &str) -> Result<String> {
            Ok(path.to_string())
        }

        async fn copy(&mut self, _from: &str, _to: &str) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn fake_backend_drives_a_default_observer() {
        let mut backend = FakeBackend::with_tree("/root", vec![("/root", vec![], vec![])]);
        let mut observer = Store::new();
        let (out, err, status) = backend
            .exec_command(&Cmd::new("true"), "", &EnvOverlay::new(), &mut observer)
            .await
            .unwrap();
        assert!(out.is_empty());
        assert!(err.is_empty());
        assert_eq!(status, 0);
    }
}
