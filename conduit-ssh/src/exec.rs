//! Single-channel command execution and stdout/stderr demultiplexing.
//!
//! SSH carries stdout and stderr over one channel (`ChannelMsg::Data` vs
//! `ChannelMsg::ExtendedData { ext: 1, .. }`), unlike a local subprocess's
//! two separate pipes. Grounded in `distant_ssh::utils::execute_output`
//! and `distant_ssh::process::spawn_simple`, reworked here to fan each
//! stream out to its own `mpsc` channel as it's read, rather than buffer
//! the whole command output before returning: one task drains the
//! channel and forwards chunks to two receivers, which
//! [`conduit_core::flux::ChunkFlux`] consumes as byte-chunk streams.

use std::sync::{Arc, Mutex};

use conduit_core::error::{Error, ErrorKind, Result};
use conduit_core::flux::{ChunkFlux, Flux};
use russh::client::Handle;
use russh::ChannelMsg;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use crate::session::ClientHandler;

pub type HandleT = Handle<ClientHandler>;

#[derive(Clone, Default)]
struct ExitSlot(Arc<Mutex<Option<i32>>>);

impl ExitSlot {
    fn get(&self) -> Option<i32> {
        *self.0.lock().expect("exit slot poisoned")
    }

    fn set(&self, status: i32) {
        *self.0.lock().expect("exit slot poisoned") = Some(status);
    }
}

/// A [`Flux`] over one half (stdout or stderr) of an SSH exec channel.
/// Unlike a plain subprocess pipe, the channel reports its own exit
/// status, so `exit_status` is overridden here rather than left to the
/// backend to `wait()` on a separate handle.
pub struct SshExecFlux {
    inner: ChunkFlux<ReceiverStream<Result<Vec<u8>>>>,
    exit_slot: ExitSlot,
}

#[async_trait::async_trait]
impl Flux for SshExecFlux {
    async fn next_line(&mut self) -> Result<Option<String>> {
        self.inner.next_line().await
    }

    fn exit_status(&self) -> Option<i32> {
        self.exit_slot.get()
    }
}

/// Executes `full_cmd` over a fresh channel, returning two [`Flux`]
/// streams (stdout, stderr) that share the channel's exit status once the
/// drain task observes `ChannelMsg::ExitStatus`.
pub async fn exec(handle: &HandleT, full_cmd: &str) -> Result<(SshExecFlux, SshExecFlux)> {
    let mut channel = handle
        .channel_open_session()
        .await
        .map_err(|e| Error::new(ErrorKind::ChannelError, e.to_string()))?;

    channel
        .exec(true, full_cmd)
        .await
        .map_err(|e| Error::new(ErrorKind::ChannelError, e.to_string()))?;

    let (stdout_tx, stdout_rx) = mpsc::channel::<Result<Vec<u8>>>(32);
    let (stderr_tx, stderr_rx) = mpsc::channel::<Result<Vec<u8>>>(32);
    let exit_slot = ExitSlot::default();
    let exit_slot_task = exit_slot.clone();

    tokio::spawn(async move {
        while let Some(msg) = channel.wait().await {
            match msg {
                ChannelMsg::Data { data } => {
                    let _ = stdout_tx.send(Ok(data.to_vec())).await;
                }
                ChannelMsg::ExtendedData { data, ext: 1 } => {
                    let _ = stderr_tx.send(Ok(data.to_vec())).await;
                }
                ChannelMsg::ExitStatus { exit_status } => {
                    exit_slot_task.set(exit_status as i32);
                }
                _ => {}
            }
        }
    });

    Ok((
        SshExecFlux {
            inner: ChunkFlux::new(ReceiverStream::new(stdout_rx)),
            exit_slot: exit_slot.clone(),
        },
        SshExecFlux {
            inner: ChunkFlux::new(ReceiverStream::new(stderr_rx)),
            exit_slot,
        },
    ))
}
