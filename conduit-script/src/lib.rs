//! Script-capture conduit backend (spec §4.6): a [`conduit_core::Backend`]
//! that never runs anything. Every `exec_command` is appended to an output
//! file as shell source instead, and every predicate answers "truthy" so
//! that client code written against a real backend still serializes to a
//! valid, idempotent script. Grounded in
//! `pyrc.system.scriptgenerator.ScriptGenerator`.

mod backend;

pub use backend::{ScriptBackend, ScriptMode, ScriptOpts};
