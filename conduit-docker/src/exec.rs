//! Command execution against a container exec session.
//!
//! Grounded in `distant_docker::utils::execute_output`'s
//! `create_exec`/`start_exec`/`inspect_exec` sequence, reworked to stream
//! chunks out to a [`conduit_core::flux::ChunkFlux`] as they arrive rather
//! than buffer the whole command before returning, matching the streaming
//! contract every other backend's `exec_command` upholds. Per spec §4.1,
//! the container variant's output is "a single demuxed generator; stderr
//! is empty by contract of the API" — `bollard::container::LogOutput::StdErr`
//! chunks are folded into the same stream as `StdOut` rather than split out.

use std::sync::{Arc, Mutex};

use bollard::Docker;
use bollard::container::LogOutput;
use bollard::exec::{CreateExecOptions, StartExecOptions, StartExecResults};
use conduit_core::error::{Error, ErrorKind, Result};
use conduit_core::flux::{ChunkFlux, Flux};
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

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

/// A [`Flux`] over a container exec session's single demuxed output
/// stream. The exit code isn't known until the stream itself is fully
/// drained (bollard reports it via a separate `inspect_exec` call), so
/// `exit_status` only resolves once `next_line` has returned `Ok(None)`.
pub struct DockerExecFlux {
    inner: ChunkFlux<ReceiverStream<Result<Vec<u8>>>>,
    exit_slot: ExitSlot,
}

#[async_trait::async_trait]
impl Flux for DockerExecFlux {
    async fn next_line(&mut self) -> Result<Option<String>> {
        self.inner.next_line().await
    }

    fn exit_status(&self) -> Option<i32> {
        self.exit_slot.get()
    }
}

/// Runs `full_cmd` (already wrapped in `bash -c "…"` by the caller) inside
/// `container`, returning a single [`DockerExecFlux`] carrying the merged
/// stdout/stderr stream and, once drained, the exec's exit code.
pub async fn exec(
    client: &Docker,
    container: &str,
    full_cmd: &str,
    user: Option<&str>,
) -> Result<DockerExecFlux> {
    let exec = client
        .create_exec(
            container,
            CreateExecOptions {
                cmd: Some(vec!["bash".to_string(), "-c".to_string(), full_cmd.to_string()]),
                attach_stdout: Some(true),
                attach_stderr: Some(true),
                user: user.map(str::to_string),
                ..Default::default()
            },
        )
        .await
        .map_err(|e| Error::new(ErrorKind::ChannelError, e.to_string()))?;

    let start_result = client
        .start_exec(
            &exec.id,
            Some(StartExecOptions {
                detach: false,
                ..Default::default()
            }),
        )
        .await
        .map_err(|e| Error::new(ErrorKind::ChannelError, e.to_string()))?;

    let mut output = match start_result {
        StartExecResults::Attached { output, .. } => output,
        StartExecResults::Detached => {
            return Err(Error::new(ErrorKind::ChannelError, "exec started detached unexpectedly"));
        }
    };

    let (tx, rx) = mpsc::channel::<Result<Vec<u8>>>(32);
    let exit_slot = ExitSlot::default();
    let exit_slot_task = exit_slot.clone();
    let client = client.clone();
    let exec_id = exec.id.clone();

    tokio::spawn(async move {
        while let Some(msg) = output.next().await {
            match msg {
                Ok(LogOutput::StdOut { message }) | Ok(LogOutput::StdErr { message }) => {
                    let _ = tx.send(Ok(message.to_vec())).await;
                }
                Ok(_) => {}
                Err(e) => {
                    let _ = tx.send(Err(Error::new(ErrorKind::ChannelError, e.to_string()))).await;
                }
            }
        }
        if let Ok(inspect) = client.inspect_exec(&exec_id).await {
            exit_slot_task.set(inspect.exit_code.unwrap_or(-1) as i32);
        }
    });

    Ok(DockerExecFlux {
        inner: ChunkFlux::new(ReceiverStream::new(rx)),
        exit_slot,
    })
}
