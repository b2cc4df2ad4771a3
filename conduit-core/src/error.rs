use std::io;

use derive_more::Display;

/// General purpose error produced by any backend operation.
///
/// Mirrors the taxonomy in the specification: a stable [`ErrorKind`] label
/// plus a human-readable description. This is deliberately not a Rust
/// `enum`-per-variant error type because several backends need to fold
/// native errors (`io::Error`, SSH channel failures, archive errors) into
/// the same small, stable vocabulary that callers can match on.
#[derive(Clone, Debug, Display, PartialEq, Eq)]
#[display(fmt = "{}: {}", kind, description)]
pub struct Error {
    /// Label describing the kind of error.
    pub kind: ErrorKind,

    /// Human-readable description of the error.
    pub description: String,
}

impl std::error::Error for Error {}

impl Error {
    pub fn new(kind: ErrorKind, description: impl Into<String>) -> Self {
        Self {
            kind,
            description: description.into(),
        }
    }

    pub fn not_connected(description: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotConnected, description)
    }

    pub fn not_found(description: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, description)
    }

    pub fn already_exists(description: impl Into<String>) -> Self {
        Self::new(ErrorKind::AlreadyExists, description)
    }

    pub fn not_supported(description: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotSupported, description)
    }

    pub fn transfer_unsupported(description: impl Into<String>) -> Self {
        Self::new(ErrorKind::TransferUnsupported, description)
    }

    pub fn command_failed(description: impl Into<String>) -> Self {
        Self::new(ErrorKind::CommandFailed, description)
    }

    pub fn invalid_archive(description: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidArchive, description)
    }
}

/// Stable error taxonomy from spec §7, extended with the `std::io::ErrorKind`
/// variants backends need in order to round-trip through `io::Error`.
#[derive(Copy, Clone, Debug, Display, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Backend operation attempted before `open()` or after `close()`.
    NotConnected,
    /// Path missing when required.
    NotFound,
    /// Directory or file creation collides with an existing entry.
    AlreadyExists,
    /// Requested operation is not implemented for this backend/OS pair.
    NotSupported,
    /// No direct transfer path exists between the two given backend types.
    TransferUnsupported,
    /// SSH authentication failed.
    AuthFailed,
    /// SSH host could not be reached.
    HostUnreachable,
    /// SSH/SFTP channel failed mid-operation.
    ChannelError,
    /// Command exited non-zero; only raised by the error-raise observer or
    /// explicit callers. By default a non-zero exit status is surfaced as
    /// the third element of the `exec_command` return tuple, not as an
    /// error.
    CommandFailed,
    /// Archive path has the wrong extension (conduit only speaks `.zip`).
    InvalidArchive,

    /// The operation lacked the necessary privileges to complete.
    PermissionDenied,
    /// A parameter was incorrect.
    InvalidInput,
    /// Data not valid for the operation were encountered.
    InvalidData,
    /// The I/O operation's timeout expired, causing it to be cancelled.
    TimedOut,
    /// This operation was interrupted.
    Interrupted,
    /// This operation is unsupported on this platform.
    Unsupported,
    /// A loop was encountered while walking a directory.
    Loop,
    /// Any error not covered by a more specific variant.
    Other,
}

impl From<io::ErrorKind> for ErrorKind {
    fn from(kind: io::ErrorKind) -> Self {
        match kind {
            io::ErrorKind::NotFound => ErrorKind::NotFound,
            io::ErrorKind::PermissionDenied => ErrorKind::PermissionDenied,
            io::ErrorKind::AlreadyExists => ErrorKind::AlreadyExists,
            io::ErrorKind::InvalidInput => ErrorKind::InvalidInput,
            io::ErrorKind::InvalidData => ErrorKind::InvalidData,
            io::ErrorKind::TimedOut => ErrorKind::TimedOut,
            io::ErrorKind::Interrupted => ErrorKind::Interrupted,
            io::ErrorKind::Unsupported => ErrorKind::Unsupported,
            io::ErrorKind::NotConnected => ErrorKind::NotConnected,
            _ => ErrorKind::Other,
        }
    }
}

impl From<ErrorKind> for io::ErrorKind {
    fn from(kind: ErrorKind) -> Self {
        match kind {
            ErrorKind::NotFound => io::ErrorKind::NotFound,
            ErrorKind::PermissionDenied => io::ErrorKind::PermissionDenied,
            ErrorKind::AlreadyExists => io::ErrorKind::AlreadyExists,
            ErrorKind::InvalidInput => io::ErrorKind::InvalidInput,
            ErrorKind::InvalidData => io::ErrorKind::InvalidData,
            ErrorKind::TimedOut => io::ErrorKind::TimedOut,
            ErrorKind::Interrupted => io::ErrorKind::Interrupted,
            ErrorKind::Unsupported | ErrorKind::NotSupported => io::ErrorKind::Unsupported,
            ErrorKind::NotConnected => io::ErrorKind::NotConnected,
            _ => io::ErrorKind::Other,
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Self {
            kind: ErrorKind::from(err.kind()),
            description: err.to_string(),
        }
    }
}

impl From<Error> for io::Error {
    fn from(err: Error) -> Self {
        io::Error::new(err.kind.into(), err.description)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
