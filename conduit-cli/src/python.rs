//! [`PythonComposer`]: a python-interpreter-aware composer with virtual
//! environment detection, grounded in `pyrc.cliwrapper.python.Python`.
//!
//! The original subclasses `CLIWrapper` but constructs its parent with
//! `super().__init__(connector, workdir)` — passing the connector
//! positionally into `CLIWrapper.__init__`'s `prefix` parameter, a bug
//! that leaves the inherited `prefix` attribute holding a stringified
//! connector object rather than the python executable. This type is
//! built directly against [`Backend`] instead of composing
//! [`crate::CliComposer`] through that broken seam, which is the
//! textually-correct structure the original was reaching for: a
//! composer whose effective prefix is `"{source_cmd} {exe}"` and whose
//! `cmd` argument is the caller's subcommand.
use conduit_core::backend::Backend;
use conduit_core::cmd::Cmd;
use conduit_core::env::EnvOverlay;
use conduit_core::error::{Error, Result};
use conduit_core::observer::{ErrorRaise, Observer, PrettyPrint};

const BASE_PREFIX_EXPR: &str =
    "getattr(sys, 'base_prefix', None) or getattr(sys, 'real_prefix', None) or sys.prefix";
const PREFIX_EXPR: &str = "sys.prefix";

/// A CLI composer specialized for a python interpreter: detects at
/// construction whether `pyexe` belongs to a virtual environment and,
/// if so, sources its activation script ahead of every subsequent call.
pub struct PythonComposer<'a, B: Backend> {
    backend: &'a mut B,
    workdir: String,
    exe: String,
    /// The virtual environment's root, once detected. `None` means
    /// `pyexe` is not running inside a venv (`base_prefix == prefix`).
    venv: Option<String>,
}

impl<'a, B: Backend> PythonComposer<'a, B> {
    /// Validates `pyexe` is executable, then probes `sys.base_prefix`
    /// and `sys.prefix` to detect a virtual environment
    /// (`Python.is_venv`/`Python.base_prefix`/`Python.prefix`).
    pub async fn new(backend: &'a mut B, pyexe: impl Into<String>, workdir: impl Into<String>) -> Result<Self> {
        let pyexe = pyexe.into();
        let workdir = workdir.into();

        if !backend.isexe(&pyexe).await? {
            return Err(Error::not_found(format!("python executable {pyexe} is not a valid path")));
        }

        let mut composer = Self {
            backend,
            workdir,
            exe: pyexe,
            venv: None,
        };

        let base_prefix = composer.probe(BASE_PREFIX_EXPR).await?;
        let prefix = composer.probe(PREFIX_EXPR).await?;
        if base_prefix != prefix {
            composer.venv = Some(prefix);
        }

        Ok(composer)
    }

    /// Runs `python -c "import sys; print({expr})"`, raising on any
    /// stderr output (`ErrorRaiseEvent` in the original).
    async fn probe(&mut self, expr: &str) -> Result<String> {
        let cmd = format!("-c \"import sys; print({expr})\"");
        let mut observer = ErrorRaise::new();
        let (stdout, _, _) = self.raw_call(&cmd, &mut observer).await?;
        stdout
            .into_iter()
            .next()
            .ok_or_else(|| Error::command_failed(format!("`{cmd}` produced no output")))
    }

    /// The venv activation prefix to source ahead of every call, or an
    /// empty string outside a virtual environment (`Python._source_cmd`).
    fn source_cmd(&self) -> String {
        match &self.venv {
            None => String::new(),
            Some(venv) => {
                let syntax = self.backend.path_syntax();
                let activate = if self.backend.os_type().is_unix() {
                    syntax.join(venv, &["bin", "activate"])
                } else {
                    syntax.join(venv, &["Scripts", "activate"])
                };
                format!("source {activate} &&")
            }
        }
    }

    async fn raw_call(&mut self, cmd: &str, observer: &mut dyn Observer) -> Result<(Vec<String>, Vec<String>, i32)> {
        let full = format!("{} {} {cmd}", self.source_cmd(), self.exe);
        self.backend
            .exec_command(&Cmd::new(full), &self.workdir, &EnvOverlay::new(), observer)
            .await
    }

    /// Runs `cmd` with the python executable (`Python.__call__`).
    pub async fn call(
        &mut self,
        cmd: &str,
        observer: Option<&mut dyn Observer>,
    ) -> Result<(Vec<String>, Vec<String>, i32)> {
        let mut default_observer;
        let observer: &mut dyn Observer = match observer {
            Some(o) => o,
            None => {
                default_observer = PrettyPrint::new();
                &mut default_observer
            }
        };
        self.raw_call(cmd, observer).await
    }

    /// Runs a plain system command with the virtual environment sourced
    /// first, without invoking the python executable (`Python.with_venv`).
    pub async fn with_venv(
        &mut self,
        cmd: &str,
        observer: Option<&mut dyn Observer>,
    ) -> Result<(Vec<String>, Vec<String>, i32)> {
        let mut default_observer;
        let observer: &mut dyn Observer = match observer {
            Some(o) => o,
            None => {
                default_observer = PrettyPrint::new();
                &mut default_observer
            }
        };
        let full = format!("{} {cmd}", self.source_cmd());
        self.backend
            .exec_command(&Cmd::new(full), &self.workdir, &EnvOverlay::new(), observer)
            .await
    }

    pub fn venv(&self) -> Option<&str> {
        self.venv.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conduit_core::cmd::Cmd;
    use conduit_core::env::EnvOverlay;
    use conduit_core::flux::VecFlux;
    use conduit_core::observer::Observer;
    use conduit_core::os::{OsType, Platform};

    /// Returns `base` for the first probe call and `venv` for the
    /// second, then echoes whatever command it was asked to run —
    /// enough to drive both `PythonComposer::new`'s detection branches
    /// deterministically.
    struct ProbeBackend {
        base: &'static str,
        venv_prefix: &'static str,
        calls: Vec<String>,
    }

    impl ProbeBackend {
        fn new(base: &'static str, venv_prefix: &'static str) -> Self {
            Self {
                base,
                venv_prefix,
                calls: Vec::new(),
            }
        }
    }

    #[async_trait::async_trait]
    impl Backend for ProbeBackend {
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
            let answer = if cmd.as_str().contains("base_prefix") {
                self.base
            } else if cmd.as_str().contains("sys.prefix") {
                self.venv_prefix
            } else {
                "ran"
            };
            let stdout = VecFlux::new([answer.to_string()]);
            let stderr = VecFlux::new([]);
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
    async fn matching_prefixes_mean_no_venv() {
        let mut backend = ProbeBackend::new("/usr", "/usr");
        let composer = PythonComposer::new(&mut backend, "/usr/bin/python3", "").await.unwrap();
        assert_eq!(composer.venv(), None);
    }

    #[tokio::test]
    async fn mismatched_prefixes_detect_a_venv_and_source_it() {
        let mut backend = ProbeBackend::new("/usr", "/home/user/.venv");
        let mut composer = PythonComposer::new(&mut backend, "/home/user/.venv/bin/python3", "")
            .await
            .unwrap();
        assert_eq!(composer.venv(), Some("/home/user/.venv"));

        composer.call("-m pytest", None).await.unwrap();
        let last = backend.calls.last().unwrap();
        assert!(last.contains("source /home/user/.venv/bin/activate &&"));
        assert!(last.contains("-m pytest"));
    }

    #[tokio::test]
    async fn with_venv_sources_without_invoking_the_interpreter() {
        let mut backend = ProbeBackend::new("/usr", "/home/user/.venv");
        let mut composer = PythonComposer::new(&mut backend, "/home/user/.venv/bin/python3", "")
            .await
            .unwrap();

        composer.with_venv("pytest -q", None).await.unwrap();
        let last = backend.calls.last().unwrap();
        assert!(last.contains("source /home/user/.venv/bin/activate &&"));
        assert!(last.contains("pytest -q"));
        assert!(!last.contains("python3"));
    }
}
