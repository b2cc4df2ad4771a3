//! The remote-host conduit backend, reached over SSH.

pub mod backend;
pub mod exec;
pub mod session;
pub mod sftp;

pub use backend::SshBackend;
pub use session::{SshFamily, SshOpts, SshSession};
