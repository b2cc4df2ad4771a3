//! A fluent CLI command composer (spec §4.5): accumulates a command
//! prefix immutably, one token at a time, then executes `{prefix}
//! {cmd}` against a backend. [`python::PythonComposer`] specializes this
//! with virtual-environment detection. Grounded in
//! `pyrc.cliwrapper.cliwrapper.CLIWrapper` and `pyrc.cliwrapper.python.Python`.

mod composer;
mod python;

pub use composer::CliComposer;
pub use python::PythonComposer;
