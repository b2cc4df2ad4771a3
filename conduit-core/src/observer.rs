//! The observer pipeline: a small strategy object driven by `exec_command`
//! to consume a command's stdout/stderr as it streams.
//!
//! State machine: `New -> Begun` on [`Observer::begin`], any number of
//! [`Observer::progress`] calls while `Begun`, then `Begun -> Ended` on
//! [`Observer::end`]. `begin` and `end` are each called exactly once per
//! command; conduit does not expose a type-level encoding of this (the
//! backend is the sole caller and upholds it), matching
//! `pyrc.event.event.Event`'s own un-enforced lifecycle.

use std::fmt::Write as _;

use async_trait::async_trait;
use console::style;

use crate::cmd::Cmd;
use crate::error::Result;
use crate::flux::Flux;

/// Three hooks invoked by a backend around one `exec_command` call.
///
/// `begin` hands the observer the command's stdout/stderr [`Flux`]
/// handles; conduit does not forward a writable stdin handle to
/// observers since interactive terminal emulation is out of scope. `end`
/// is responsible for draining whatever remains of both streams — per the
/// scrapper policy, stdout to completion first, then stderr — and
/// returning the accumulated lines plus an exit status.
#[async_trait]
pub trait Observer: Send {
    async fn begin(
        &mut self,
        cmd: &Cmd,
        cwd: &str,
        stdout: Box<dyn Flux>,
        stderr: Box<dyn Flux>,
    );

    /// Either argument may be `None`: `progress` fires once per line
    /// produced by either stream, not once per stream per line.
    async fn progress(&mut self, stdout_line: Option<&str>, stderr_line: Option<&str>);

    async fn end(&mut self) -> Result<(Vec<String>, Vec<String>, i32)>;
}

/// Drains `stdout` to completion, then `stderr` to completion, reporting
/// each non-empty line to `on_line` as it is read. Shared by every
/// observer variant below so the scrapper policy (spec §4.2) lives in one
/// place.
async fn drain_sequential<F>(
    stdout: &mut dyn Flux,
    stderr: &mut dyn Flux,
    mut on_line: F,
) -> Result<(Vec<String>, Vec<String>, i32)>
where
    F: FnMut(Option<&str>, Option<&str>),
{
    let mut stdout_lines = Vec::new();
    while let Some(line) = stdout.next_line().await? {
        if !line.is_empty() {
            stdout_lines.push(line.clone());
        }
        on_line(Some(&line), None);
    }

    let mut stderr_lines = Vec::new();
    while let Some(line) = stderr.next_line().await? {
        if !line.is_empty() {
            stderr_lines.push(line.clone());
        }
        on_line(None, Some(&line));
    }

    let exit_status = stdout.exit_status().or_else(|| stderr.exit_status()).unwrap_or(0);
    Ok((stdout_lines, stderr_lines, exit_status))
}

/// Accumulates stdout/stderr into two ordered line lists. The baseline
/// variant every other observer extends.
#[derive(Default)]
pub struct Store {
    phase: OptPhase,
}

#[derive(Default)]
enum OptPhase {
    #[default]
    New,
    Begun {
        stdout: Box<dyn Flux>,
        stderr: Box<dyn Flux>,
    },
    Ended,
}

impl Store {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Observer for Store {
    async fn begin(&mut self, _cmd: &Cmd, _cwd: &str, stdout: Box<dyn Flux>, stderr: Box<dyn Flux>) {
        self.phase = OptPhase::Begun { stdout, stderr };
    }

    async fn progress(&mut self, _stdout_line: Option<&str>, _stderr_line: Option<&str>) {}

    async fn end(&mut self) -> Result<(Vec<String>, Vec<String>, i32)> {
        let phase = std::mem::replace(&mut self.phase, OptPhase::Ended);
        match phase {
            OptPhase::Begun { mut stdout, mut stderr } => {
                drain_sequential(stdout.as_mut(), stderr.as_mut(), |_, _| {}).await
            }
            _ => Ok((Vec::new(), Vec::new(), 0)),
        }
    }
}

/// Extends [`Store`] with a styled, human-facing transcript: a header on
/// `begin`, indented stdout lines as they arrive, and buffered stderr
/// lines flushed in error style only if the run's exit status ended up
/// non-zero (errors are judged at the *end* of the run, since many tools
/// write non-fatal warnings to stderr). Grounded in
/// `pyrc.event.event.RichRemoteFileTransferEvent`'s use of `rich` for
/// styled console feedback.
pub struct PrettyPrint {
    identity: String,
    header: Option<(String, String)>,
    pending_stderr: Vec<String>,
    phase: OptPhase,
}

impl PrettyPrint {
    pub fn new() -> Self {
        Self {
            identity: whoami::username(),
            header: None,
            pending_stderr: Vec::new(),
            phase: OptPhase::New,
        }
    }
}

impl Default for PrettyPrint {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Observer for PrettyPrint {
    async fn begin(&mut self, cmd: &Cmd, cwd: &str, stdout: Box<dyn Flux>, stderr: Box<dyn Flux>) {
        println!(
            "{} {}@{} $ {}",
            style("▸").blue().bold(),
            self.identity,
            if cwd.is_empty() { "." } else { cwd },
            style(cmd.as_str()).bold()
        );
        self.header = Some((cmd.to_string(), cwd.to_string()));
        self.phase = OptPhase::Begun { stdout, stderr };
    }

    async fn progress(&mut self, stdout_line: Option<&str>, stderr_line: Option<&str>) {
        if let Some(line) = stdout_line.filter(|l| !l.is_empty()) {
            println!("  {line}");
        }
        if let Some(line) = stderr_line.filter(|l| !l.is_empty()) {
            self.pending_stderr.push(line.to_string());
        }
    }

    async fn end(&mut self) -> Result<(Vec<String>, Vec<String>, i32)> {
        let phase = std::mem::replace(&mut self.phase, OptPhase::Ended);
        let (stdout_lines, stderr_lines, exit_status) = match phase {
            OptPhase::Begun { mut stdout, mut stderr } => {
                let mut pending_stderr = Vec::new();
                let result = drain_sequential(stdout.as_mut(), stderr.as_mut(), |out, err| {
                    if let Some(line) = out.filter(|l| !l.is_empty()) {
                        println!("  {line}");
                    }
                    if let Some(line) = err.filter(|l| !l.is_empty()) {
                        pending_stderr.push(line.to_string());
                    }
                })
                .await?;
                self.pending_stderr.extend(pending_stderr);
                result
            }
            _ => (Vec::new(), Vec::new(), 0),
        };

        if exit_status != 0 {
            for line in &self.pending_stderr {
                eprintln!("  {}", style(line).red());
            }
        }
        self.pending_stderr.clear();
        Ok((stdout_lines, stderr_lines, exit_status))
    }
}

/// Extends [`Store`]; raises [`crate::error::ErrorKind::CommandFailed`]
/// when stderr is non-empty at `end`, joined into a single description.
/// Intended for silent internal probes where any stderr output indicates
/// a problem worth failing loudly on, rather than a tuple the caller must
/// remember to check.
pub struct ErrorRaise {
    phase: OptPhase,
}

impl ErrorRaise {
    pub fn new() -> Self {
        Self { phase: OptPhase::New }
    }
}

impl Default for ErrorRaise {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Observer for ErrorRaise {
    async fn begin(&mut self, _cmd: &Cmd, _cwd: &str, stdout: Box<dyn Flux>, stderr: Box<dyn Flux>) {
        self.phase = OptPhase::Begun { stdout, stderr };
    }

    async fn progress(&mut self, _stdout_line: Option<&str>, _stderr_line: Option<&str>) {}

    async fn end(&mut self) -> Result<(Vec<String>, Vec<String>, i32)> {
        let phase = std::mem::replace(&mut self.phase, OptPhase::Ended);
        let (stdout_lines, stderr_lines, exit_status) = match phase {
            OptPhase::Begun { mut stdout, mut stderr } => {
                drain_sequential(stdout.as_mut(), stderr.as_mut(), |_, _| {}).await?
            }
            _ => (Vec::new(), Vec::new(), 0),
        };

        if !stderr_lines.is_empty() {
            let mut joined = String::new();
            for line in &stderr_lines {
                let _ = writeln!(joined, "{line}");
            }
            return Err(crate::error::Error::command_failed(joined));
        }

        Ok((stdout_lines, stderr_lines, exit_status))
    }
}

/// Per-file progress observer for the transfer engine.
///
/// Unlike [`Observer`], this doesn't consume a command's stdout/stderr —
/// it tracks `(filename, size_total, size_sent)` updates the transfer
/// engine reports as it copies bytes, one [`indicatif::ProgressBar`] per
/// file task active at once. Grounded in
/// `pyrc.event.event.RichRemoteFileTransferEvent`, which drives a `rich`
/// progress bar off the same shape of callback.
pub struct TransferProgress {
    multi: indicatif::MultiProgress,
    bars: std::collections::HashMap<String, indicatif::ProgressBar>,
}

impl TransferProgress {
    pub fn new() -> Self {
        Self {
            multi: indicatif::MultiProgress::new(),
            bars: std::collections::HashMap::new(),
        }
    }

    fn bar_for(&mut self, filename: &str, size_total: u64) -> &indicatif::ProgressBar {
        self.bars.entry(filename.to_string()).or_insert_with(|| {
            let bar = self.multi.add(indicatif::ProgressBar::new(size_total));
            if let Ok(style) = indicatif::ProgressStyle::with_template(
                "{msg:.dim} [{bar:30}] {bytes}/{total_bytes}",
            ) {
                bar.set_style(style.progress_chars("=> "));
            }
            bar.set_message(filename.to_string());
            bar
        })
    }

    /// Reports that `size_sent` of `size_total` bytes of `filename` have
    /// been transferred. Transitions the task's bar to finished once
    /// `size_sent == size_total`.
    pub fn on_progress(&mut self, filename: &str, size_total: u64, size_sent: u64) {
        let bar = self.bar_for(filename, size_total);
        bar.set_position(size_sent);
        if size_sent >= size_total {
            bar.finish_and_clear();
        }
    }
}

impl Default for TransferProgress {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flux::VecFlux;

    #[tokio::test]
    async fn store_preserves_line_order_and_suppresses_empty_lines() {
        let mut observer = Store::new();
        let stdout = VecFlux::new(["l1".to_string(), "".to_string(), "l2".to_string()]);
        let stderr = VecFlux::new(["e1".to_string()]);
        observer
            .begin(&Cmd::new("printf"), "", Box::new(stdout), Box::new(stderr))
            .await;
        let (out, err, status) = observer.end().await.unwrap();
        assert_eq!(out, vec!["l1".to_string(), "l2".to_string()]);
        assert_eq!(err, vec!["e1".to_string()]);
        assert_eq!(status, 0);
    }

    #[tokio::test]
    async fn error_raise_surfaces_nonempty_stderr_as_command_failed() {
        let mut observer = ErrorRaise::new();
        let stdout = VecFlux::new(["ok".to_string()]);
        let stderr = VecFlux::new(["boom".to_string()]);
        observer
            .begin(&Cmd::new("false"), "", Box::new(stdout), Box::new(stderr))
            .await;
        let err = observer.end().await.unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::CommandFailed);
        assert!(err.description.contains("boom"));
    }

    #[tokio::test]
    async fn error_raise_passes_through_when_stderr_empty() {
        let mut observer = ErrorRaise::new();
        let stdout = VecFlux::new(["ok".to_string()]);
        let stderr = VecFlux::new([]);
        observer
            .begin(&Cmd::new("true"), "", Box::new(stdout), Box::new(stderr))
            .await;
        let (out, err, status) = observer.end().await.unwrap();
        assert_eq!(out, vec!["ok".to_string()]);
        assert!(err.is_empty());
        assert_eq!(status, 0);
    }
}
