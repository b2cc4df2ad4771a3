use std::ops::{Deref, DerefMut};

use derive_more::{Display, From, Into};

/// A single shell-interpretable command string.
///
/// The caller is responsible for quoting; conduit never parses `Cmd` into
/// argv — it is handed whole to whatever shell a backend wraps it in
/// (`bash -c "…"` for container exec, a direct shell for local/SSH).
#[derive(Clone, Debug, Display, From, Into, Hash, PartialEq, Eq)]
pub struct Cmd(String);

impl Cmd {
    pub fn new(cmd: impl Into<String>) -> Self {
        Self(cmd.into())
    }

    /// The program portion, i.e. everything before the first space.
    pub fn program(&self) -> &str {
        match self.0.split_once(' ') {
            Some((program, _)) => program.trim(),
            None => self.0.trim(),
        }
    }

    /// The argument portion, i.e. everything after the first space.
    pub fn arguments(&self) -> &str {
        match self.0.split_once(' ') {
            Some((_, arguments)) => arguments.trim(),
            None => "",
        }
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl Deref for Cmd {
    type Target = String;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl DerefMut for Cmd {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_program_from_arguments() {
        let cmd = Cmd::new("git checkout -b x");
        assert_eq!(cmd.program(), "git");
        assert_eq!(cmd.arguments(), "checkout -b x");
    }

    #[test]
    fn program_only_command_has_no_arguments() {
        let cmd = Cmd::new("pwd");
        assert_eq!(cmd.program(), "pwd");
        assert_eq!(cmd.arguments(), "");
    }

    #[test]
    fn empty_and_whitespace_commands_are_empty() {
        assert!(Cmd::new("").is_empty());
        assert!(Cmd::new("   ").is_empty());
        assert!(!Cmd::new("true").is_empty());
    }
}
