//! Container conduit backend (spec §4.1, "Container" variant): commands
//! are routed through a Docker exec API rather than a local process or an
//! SSH channel. Grounded in `distant_docker`'s use of `bollard`, reworked
//! to the merged-stream, `bash -c "…"`-wrapped contract spec.md describes
//! rather than distant-docker's separate-stdout/stderr one.

mod backend;
mod exec;

pub use backend::{DockerBackend, DockerOpts};
