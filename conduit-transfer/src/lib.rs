//! Cross-backend file and directory transfer (spec §4.4): moves files
//! and directories between any two of the four conduit backends, with
//! optional compression in flight and an SSH-via-local-buffer fallback
//! for pairs that have no direct transfer primitive. Grounded in
//! `pyrc.remote.transfer`.

mod engine;

pub use engine::{Endpoint, TransferOpts, TransferOutcome, buffered_transfer, transfer, transfer_dir, transfer_files};
