//! [`CliComposer`]: the fluent prefix accumulator itself.

use conduit_core::backend::Backend;
use conduit_core::cmd::Cmd;
use conduit_core::env::EnvOverlay;
use conduit_core::error::Result;
use conduit_core::observer::{Observer, PrettyPrint};

/// Accumulates a command prefix one token at a time, then executes it
/// against a backend. Immutable by convention: [`CliComposer::arg`]
/// consumes `self` and returns a fresh composer rather than mutating in
/// place, mirroring `CLIWrapper.arg`'s "returns a new CLIWrapper" —
/// `CliComposer::new(b, "git").arg("checkout").arg("-b")` has the
/// prefix `"git checkout -b"`.
///
/// `CLIWrapper.__getattr__` lets Python spell `.arg("checkout")` as the
/// attribute access `.checkout`; Rust has no equivalent interception, so
/// `.arg(token)` is the one builder method here.
pub struct CliComposer<'a, B: Backend> {
    backend: &'a mut B,
    prefix: String,
    workdir: String,
}

impl<'a, B: Backend> CliComposer<'a, B> {
    pub fn new(backend: &'a mut B, prefix: impl Into<String>, workdir: impl Into<String>) -> Self {
        Self {
            backend,
            prefix: prefix.into(),
            workdir: workdir.into(),
        }
    }

    /// Returns a new composer with `token` appended to the prefix,
    /// separated by a space.
    pub fn arg(self, token: &str) -> Self {
        Self {
            backend: self.backend,
            prefix: format!("{} {token}", self.prefix),
            workdir: self.workdir,
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Executes `"{prefix} {cmd}"` per the assembly rule table (spec
    /// §4.5): both empty yields no execution at all (`Ok(None)`,
    /// mirroring `CLIWrapper.__call__`'s bare `return` when both are
    /// empty); otherwise whichever of prefix/cmd is non-empty is used
    /// alone, or the two are joined with a space.
    ///
    /// `observer` defaults to a [`PrettyPrint`] when not supplied,
    /// mirroring `CLIWrapper.default_event`.
    pub async fn call(
        &mut self,
        cmd: &str,
        observer: Option<&mut dyn Observer>,
    ) -> Result<Option<(Vec<String>, Vec<String>, i32)>> {
        let full = match (self.prefix.as_str(), cmd) {
            ("", "") => return Ok(None),
            (prefix, "") => prefix.to_string(),
            ("", cmd) => cmd.to_string(),
            (prefix, cmd) => format!("{prefix} {cmd}"),
        };

        let mut default_observer;
        let observer: &mut dyn Observer = match observer {
            Some(o) => o,
            None => {
                default_observer = PrettyPrint::new();
                &mut default_observer
            }
        };

        let result = self
            .backend
            .exec_command(&Cmd::new(full), &self.workdir, &EnvOverlay::new(), observer)
            .await?;
        Ok(Some(result))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conduit_core::backend::Backend;
    use conduit_core::cmd::Cmd;
    use conduit_core::env::EnvOverlay;
    use conduit_core::error::Result;
    use conduit_core::observer::Observer;
    use conduit_core::os::{OsType, Platform};

    /// Records every `exec_command` invocation's assembled command
    /// string so the assembly rule table can be asserted on directly.
    struct RecordingBackend {
        calls: Vec<String>,
    }

    impl RecordingBackend {
        fn new() -> Self {
            Self { calls: Vec::new() }
        }
    }

    #[async_trait::async_trait]
    impl Backend for RecordingBackend {
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
            cmd: &Cmd,
            _cwd: &str,
            _env: &EnvOverlay,
            observer: &mut dyn Observer,
        ) -> Result<(Vec<String>, Vec<String>, i32)> {
            self.calls.push(cmd.to_string());
            let stdout = conduit_core::flux::VecFlux::new(["ok".to_string()]);
            let stderr = conduit_core::flux::VecFlux::new([]);
            observer.begin(cmd, "", Box::new(stdout), Box::new(stderr)).await;
            observer.end().await
        }

        async fn isfile(&mut self, _path: &str) -> Result<bool> {
            Ok(true)
        }
        async fn isdir(&mut self, _path: &str) -> Result<bool> {
            Ok(false)
        }
        async fn islink(&mut self, _path: &str) -> Result<bool> {
            Ok(false)
        }
        async fn isexe(&mut self, _path: &str) -> Result<bool> {
            Ok(true)
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
        async fn ls(&mut self, _path: &str) -> Result<Vec<String>> {
            Ok(Vec::new())
        }
        async fn walk0(&mut self, path: &str) -> Result<(String, Vec<String>, Vec<String>)> {
            Ok((path.to_string(), Vec::new(), Vec::new()))
        }
        async fn zip(&mut self, path: &str, archive_path: Option<&str>) -> Result<String> {
            Ok(archive_path.map(String::from).unwrap_or_else(|| format!("{path}.zip")))
        }
        async fn unzip(&mut self, archive_path: &str, to_path: Option<&str>) -> Result<String> {
            Ok(to_path.map(String::from).unwrap_or_else(|| archive_path.to_string()))
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
    async fn both_empty_is_a_no_op() {
        let mut backend = RecordingBackend::new();
        let mut composer = CliComposer::new(&mut backend, "", "");
        let result = composer.call("", None).await.unwrap();
        assert!(result.is_none());
        assert!(backend.calls.is_empty());
    }

    #[tokio::test]
    async fn prefix_only_runs_the_prefix() {
        let mut backend = RecordingBackend::new();
        let mut composer = CliComposer::new(&mut backend, "git status", "");
        composer.call("", None).await.unwrap();
        assert_eq!(backend.calls, vec!["git status".to_string()]);
    }

    #[tokio::test]
    async fn cmd_only_runs_the_cmd() {
        let mut backend = RecordingBackend::new();
        let mut composer = CliComposer::new(&mut backend, "", "");
        composer.call("ls -la", None).await.unwrap();
        assert_eq!(backend.calls, vec!["ls -la".to_string()]);
    }

    #[tokio::test]
    async fn prefix_and_cmd_are_joined_with_a_space() {
        let mut backend = RecordingBackend::new();
        let mut composer = CliComposer::new(&mut backend, "git", "");
        composer.call("status", None).await.unwrap();
        assert_eq!(backend.calls, vec!["git status".to_string()]);
    }

    #[tokio::test]
    async fn arg_chains_accumulate_the_prefix_immutably() {
        let mut backend = RecordingBackend::new();
        let composer = CliComposer::new(&mut backend, "git", "");
        let composer = composer.arg("checkout").arg("-b").arg("my_branch");
        assert_eq!(composer.prefix(), "git checkout -b my_branch");
    }
}
