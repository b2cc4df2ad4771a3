//! Core execution substrate shared by every conduit backend: path
//! semantics, the backend contract, the observer pipeline, flux
//! (streaming line iteration), and the directory tree snapshot model.
//!
//! This crate has no opinion about *how* a command gets run — that's
//! `conduit-host`, `conduit-ssh`, `conduit-docker`, and `conduit-script`
//! each implementing [`backend::Backend`] their own way. It only defines
//! the shapes those backends agree on.

pub mod backend;
pub mod cmd;
pub mod env;
pub mod error;
pub mod flux;
pub mod observer;
pub mod os;
pub mod path;
pub mod tree;

pub use backend::Backend;
pub use cmd::Cmd;
pub use env::{EnvCache, EnvOverlay};
pub use error::{Error, ErrorKind, Result};
pub use flux::Flux;
pub use observer::Observer;
pub use os::{OsType, Platform};
pub use path::PathSyntax;
pub use tree::Tree;
