//! Cross-backend transfer primitives (spec §4.4), grounded in
//! `pyrc.remote.transfer`'s `transfer_files`/`transfer_dir`/`transfer`/
//! `__buffered_transfer` quartet.
//!
//! Conduit backends are four unrelated concrete types, not one dynamic
//! trait object family usable for every operation here — SFTP put/get
//! only exist on [`SshBackend`], and same-filesystem copy only makes
//! sense within one backend. [`Endpoint`] is the sum type spec §9's
//! design note asks for: it wraps a `&mut` reference to whichever
//! concrete backend a caller holds, and the functions below match on
//! its variant to choose a transfer strategy.

use conduit_core::backend::Backend;
use conduit_core::error::{Error, Result};
use conduit_core::observer::TransferProgress;
use conduit_core::path::PathSyntax;
use conduit_core::tree::Tree;
use conduit_docker::DockerBackend;
use conduit_host::LocalBackend;
use conduit_script::ScriptBackend;
use conduit_ssh::SshBackend;
use log::debug;

/// A transfer source or destination: one of the four concrete backend
/// types, borrowed mutably for the duration of a transfer call.
pub enum Endpoint<'a> {
    Local(&'a mut LocalBackend),
    Ssh(&'a mut SshBackend),
    Docker(&'a mut DockerBackend),
    Script(&'a mut ScriptBackend),
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum EndpointKind {
    Local,
    Ssh,
    Docker,
    Script,
}

impl std::fmt::Display for EndpointKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            EndpointKind::Local => "local",
            EndpointKind::Ssh => "ssh",
            EndpointKind::Docker => "docker",
            EndpointKind::Script => "script",
        };
        f.write_str(s)
    }
}

impl<'a> Endpoint<'a> {
    fn kind(&self) -> EndpointKind {
        match self {
            Endpoint::Local(_) => EndpointKind::Local,
            Endpoint::Ssh(_) => EndpointKind::Ssh,
            Endpoint::Docker(_) => EndpointKind::Docker,
            Endpoint::Script(_) => EndpointKind::Script,
        }
    }

    fn as_backend_mut(&mut self) -> &mut dyn Backend {
        match self {
            Endpoint::Local(b) => &mut **b,
            Endpoint::Ssh(b) => &mut **b,
            Endpoint::Docker(b) => &mut **b,
            Endpoint::Script(b) => &mut **b,
        }
    }
}

/// What a [`transfer`] call should additionally do around the plain
/// copy, mirroring `transfer`'s `compress_before`/`uncompress_after`/
/// `delete_source` keyword arguments.
#[derive(Copy, Clone, Debug, Default)]
pub struct TransferOpts {
    pub compress_before: bool,
    pub uncompress_after: bool,
    pub delete_source: bool,
}

/// The result of a [`transfer`] call.
///
/// `sent` is always the path the caller asked to send, on the source
/// backend — not whatever intermediate archive was built along the way.
/// `received` is the final artifact's path on the destination backend:
/// the uncompressed tree/file if `uncompress_after` was set, otherwise
/// the (possibly still-archived) path actually left behind there.
///
/// `pyrc.remote.transfer.transfer` returns the about-to-be-deleted
/// archive path as its "sent" value in the compress-and-uncompress
/// branch, which names a file that no longer exists by the time the
/// caller inspects it. Resolved here (see `DESIGN.md`) by always
/// reporting the original source path instead.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransferOutcome {
    pub sent: String,
    pub received: String,
}

fn unsupported(from: EndpointKind, to: EndpointKind) -> Error {
    Error::transfer_unsupported(format!(
        "direct transfer from {from} to {to} is not supported; stage it through a local buffer with buffered_transfer"
    ))
}

/// Transfers each of `from_paths` (files only) into the directory
/// `to_path`, keeping each file's basename. Returns the destination
/// path actually written for each input, in the same order.
///
/// Mirrors `transfer_files`: same-kind endpoints delegate to the
/// source backend's own `copy`; Local↔SSH pairs use SFTP put/get; every
/// other pairing is rejected as [`conduit_core::ErrorKind::TransferUnsupported`].
pub async fn transfer_files(
    from_paths: &[String],
    to_path: &str,
    from: &mut Endpoint<'_>,
    to: &mut Endpoint<'_>,
    mut progress: Option<&mut TransferProgress>,
) -> Result<Vec<String>> {
    let from_os = from.as_backend_mut().os_type();
    let to_os = to.as_backend_mut().os_type();
    let from_syntax = PathSyntax::new(from_os);
    let to_syntax = PathSyntax::new(to_os);

    let mut abs_from_paths = Vec::with_capacity(from_paths.len());
    for p in from_paths {
        abs_from_paths.push(from.as_backend_mut().abspath(p).await?);
    }
    let to_path = to.as_backend_mut().abspath(to_path).await?;

    let to_paths: Vec<String> = abs_from_paths
        .iter()
        .map(|p| to_syntax.join(&to_path, &[&from_syntax.basename(p)]))
        .collect();

    match (from.kind(), to.kind()) {
        (EndpointKind::Local, EndpointKind::Local)
        | (EndpointKind::Script, EndpointKind::Script)
        | (EndpointKind::Docker, EndpointKind::Docker) => {
            let backend = from.as_backend_mut();
            for (src, dst) in abs_from_paths.iter().zip(&to_paths) {
                backend.copy(src, dst).await?;
                report(&mut progress, backend, src).await;
            }
        }
        (EndpointKind::Ssh, EndpointKind::Local) => {
            let Endpoint::Ssh(ssh) = from else { unreachable!() };
            let Endpoint::Local(local) = to else { unreachable!() };
            for (src, dst) in abs_from_paths.iter().zip(&to_paths) {
                ssh.get_file(src, std::path::Path::new(dst)).await?;
                report(&mut progress, &mut **local, src).await;
            }
        }
        (EndpointKind::Local, EndpointKind::Ssh) => {
            let Endpoint::Ssh(ssh) = to else { unreachable!() };
            let Endpoint::Local(local) = from else { unreachable!() };
            for (src, dst) in abs_from_paths.iter().zip(&to_paths) {
                ssh.put_file(std::path::Path::new(src), dst).await?;
                report(&mut progress, &mut **local, src).await;
            }
        }
        (from_kind, to_kind) => return Err(unsupported(from_kind, to_kind)),
    }

    Ok(to_paths)
}

/// Reports a whole-file progress update: the transfer primitives we
/// delegate to (`copy`, SFTP put/get) don't expose intermediate byte
/// counts, so a file's bar jumps straight from 0 to its full size.
async fn report(progress: &mut Option<&mut TransferProgress>, backend: &mut dyn Backend, path: &str) {
    if let Some(bar) = progress.as_deref_mut() {
        let size = backend.getsize(path).await.unwrap_or(0).max(0) as u64;
        bar.on_progress(path, size, size);
    }
}

async fn ensure_fresh_dir(to: &mut Endpoint<'_>, path: &str) -> Result<()> {
    let backend = to.as_backend_mut();
    if backend.isdir(path).await.unwrap_or(false) {
        backend.rmdir(path, true).await?;
    }
    backend.mkdir(path, true, true).await
}

/// Mirrors `from_dirpath`'s whole subtree under `to_dirpath`, creating
/// `to_dirpath/<basename(from_dirpath)>` fresh (removing it first if it
/// already exists) and then one mirrored directory per snapshotted
/// node, transferring each node's own files via [`transfer_files`].
///
/// Mirrors `transfer_dir`'s node-by-node walk of a
/// `FileSystemTree`/[`Tree`] snapshot.
pub async fn transfer_dir(
    from_dirpath: &str,
    to_dirpath: &str,
    from: &mut Endpoint<'_>,
    to: &mut Endpoint<'_>,
    mut progress: Option<&mut TransferProgress>,
) -> Result<()> {
    let from_os = from.as_backend_mut().os_type();
    let to_os = to.as_backend_mut().os_type();
    let from_syntax = PathSyntax::new(from_os);
    let to_syntax = PathSyntax::new(to_os);

    let from_dirpath = from.as_backend_mut().abspath(from_dirpath).await?;
    let to_dirpath = to.as_backend_mut().abspath(to_dirpath).await?;

    let todir = to_syntax.join(&to_dirpath, &[&from_syntax.basename(&from_dirpath)]);
    ensure_fresh_dir(to, &todir).await?;

    let tree = Tree::snapshot(from.as_backend_mut(), &from_dirpath).await?;
    debug!("mirroring {} nodes from {from_dirpath} to {todir}", tree.len());

    for node in tree.nodes() {
        let node_todir = if node.level() == 0 {
            todir.clone()
        } else {
            let rel = from_syntax.convert(&node.relative_to_root(), to_os);
            to_syntax.join(&todir, &[&rel])
        };

        if node.level() != 0 {
            ensure_fresh_dir(to, &node_todir).await?;
        }

        let realfiles = node.realfiles();
        if !realfiles.is_empty() {
            transfer_files(&realfiles, &node_todir, from, to, progress.as_deref_mut()).await?;
        }
    }

    Ok(())
}

/// Transfers a single file or an entire directory from `from_path` on
/// `from` to `to_path` on `to`, with optional compress-before/
/// uncompress-after wrapping and source deletion.
///
/// Mirrors `transfer`: a directory is zipped (`from.zip`) before the
/// single resulting archive is handed to [`transfer_files`], then
/// unzipped on the destination (`to.unzip`) if requested; a plain file
/// skips straight to [`transfer_files`]. Every intermediate archive this
/// function creates is cleaned up — the source-side archive always, the
/// destination-side archive only once `uncompress_after` succeeds.
pub async fn transfer(
    from_path: &str,
    to_path: &str,
    from: &mut Endpoint<'_>,
    to: &mut Endpoint<'_>,
    opts: TransferOpts,
    mut progress: Option<&mut TransferProgress>,
) -> Result<TransferOutcome> {
    if opts.compress_before {
        let archive_from = from.as_backend_mut().zip(from_path, None).await?;
        let archive_to = transfer_files(
            &[archive_from.clone()],
            to_path,
            from,
            to,
            progress.as_deref_mut(),
        )
        .await?
        .into_iter()
        .next()
        .expect("single file transfer yields exactly one destination path");
        from.as_backend_mut().unlink(&archive_from, false).await?;

        if opts.delete_source {
            if from.as_backend_mut().isdir(from_path).await.unwrap_or(false) {
                from.as_backend_mut().rmdir(from_path, true).await?;
            } else {
                from.as_backend_mut().unlink(from_path, false).await?;
            }
        }

        if opts.uncompress_after {
            to.as_backend_mut().unzip(&archive_to, None).await?;
            to.as_backend_mut().unlink(&archive_to, false).await?;
            let basename = PathSyntax::new(from.as_backend_mut().os_type()).basename(from_path);
            let received = PathSyntax::new(to.as_backend_mut().os_type()).join(to_path, &[&basename]);
            return Ok(TransferOutcome { sent: from_path.to_string(), received });
        }

        return Ok(TransferOutcome {
            sent: from_path.to_string(),
            received: archive_to,
        });
    }

    if from.as_backend_mut().isfile(from_path).await? {
        let received = transfer_files(&[from_path.to_string()], to_path, from, to, progress)
            .await?
            .into_iter()
            .next()
            .expect("single file transfer yields exactly one destination path");
        if opts.delete_source {
            from.as_backend_mut().unlink(from_path, false).await?;
        }
        return Ok(TransferOutcome {
            sent: from_path.to_string(),
            received,
        });
    }

    if from.as_backend_mut().isdir(from_path).await? {
        transfer_dir(from_path, to_path, from, to, progress).await?;
        if opts.delete_source {
            from.as_backend_mut().rmdir(from_path, true).await?;
        }
        let basename = PathSyntax::new(from.as_backend_mut().os_type()).basename(from_path);
        let received = PathSyntax::new(to.as_backend_mut().os_type()).join(to_path, &[&basename]);
        return Ok(TransferOutcome {
            sent: from_path.to_string(),
            received,
        });
    }

    Err(Error::not_found(format!(
        "{from_path} is neither a file nor a directory on the source backend"
    )))
}

/// Three-hop transfer through a local staging directory, for backend
/// pairs [`transfer`] can't bridge directly (e.g. SSH↔SSH,
/// Container↔SSH). Mirrors `__buffered_transfer`'s leg-inheritance
/// rules: the first leg (`from` to the local buffer) inherits
/// `compress_before`/`delete_source` but always leaves its result
/// uncompressed in the buffer; the second leg (the buffer to `to`)
/// inherits `uncompress_after` and always deletes the buffered copy
/// afterward, regardless of `delete_source`.
pub async fn buffered_transfer(
    from_path: &str,
    to_path: &str,
    local_buffer_dir: &mut LocalBackend,
    local_buffer_path: &str,
    from: &mut Endpoint<'_>,
    to: &mut Endpoint<'_>,
    opts: TransferOpts,
    mut progress: Option<&mut TransferProgress>,
) -> Result<TransferOutcome> {
    if !local_buffer_dir.isdir(local_buffer_path).await.unwrap_or(false) {
        return Err(Error::not_found(format!(
            "local buffer directory {local_buffer_path} does not exist"
        )));
    }

    let mut buffer = Endpoint::Local(local_buffer_dir);

    let leg1 = transfer(
        from_path,
        local_buffer_path,
        from,
        &mut buffer,
        TransferOpts {
            compress_before: opts.compress_before,
            uncompress_after: false,
            delete_source: opts.delete_source,
        },
        progress.as_deref_mut(),
    )
    .await?;

    let leg2 = transfer(
        &leg1.received,
        to_path,
        &mut buffer,
        to,
        TransferOpts {
            compress_before: false,
            uncompress_after: opts.uncompress_after,
            delete_source: true,
        },
        progress,
    )
    .await?;

    Ok(TransferOutcome {
        sent: from_path.to_string(),
        received: leg2.received,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_fs::TempDir;
    use assert_fs::prelude::*;
    use predicates::prelude::*;

    #[tokio::test]
    async fn transfer_files_copies_within_one_local_backend() {
        let src_dir = TempDir::new().unwrap();
        let dst_dir = TempDir::new().unwrap();
        src_dir.child("a.txt").write_str("hello").unwrap();

        let mut src_backend = LocalBackend::new();
        let mut dst_backend = LocalBackend::new();
        let mut from = Endpoint::Local(&mut src_backend);
        let mut to = Endpoint::Local(&mut dst_backend);

        let src_path = src_dir.child("a.txt").path().to_string_lossy().to_string();
        let dst_dir_path = dst_dir.path().to_string_lossy().to_string();

        let written = transfer_files(&[src_path], &dst_dir_path, &mut from, &mut to, None)
            .await
            .unwrap();

        assert_eq!(written.len(), 1);
        dst_dir.child("a.txt").assert(predicate::path::is_file());
        dst_dir.child("a.txt").assert("hello");
    }

    #[tokio::test]
    async fn transfer_rejects_unsupported_pairs() {
        let src_dir = TempDir::new().unwrap();
        src_dir.child("a.txt").write_str("hello").unwrap();
        let script_dir = TempDir::new().unwrap();

        let mut src_backend = LocalBackend::new();
        let mut dst_backend = ScriptBackend::open(conduit_script::ScriptOpts::new(
            script_dir.child("out.sh").path(),
        ))
        .await
        .unwrap();
        let mut from = Endpoint::Local(&mut src_backend);
        let mut to = Endpoint::Script(&mut dst_backend);

        let src_path = src_dir.child("a.txt").path().to_string_lossy().to_string();
        let err = transfer(
            &src_path,
            "/dst",
            &mut from,
            &mut to,
            TransferOpts::default(),
            None,
        )
        .await
        .unwrap_err();
        assert_eq!(err.kind, conduit_core::ErrorKind::TransferUnsupported);
    }

    #[tokio::test]
    async fn transfer_file_reports_original_path_as_sent() {
        let src_dir = TempDir::new().unwrap();
        let dst_dir = TempDir::new().unwrap();
        src_dir.child("a.txt").write_str("hello").unwrap();

        let mut src_backend = LocalBackend::new();
        let mut dst_backend = LocalBackend::new();
        let mut from = Endpoint::Local(&mut src_backend);
        let mut to = Endpoint::Local(&mut dst_backend);

        let src_path = src_dir.child("a.txt").path().to_string_lossy().to_string();
        let dst_dir_path = dst_dir.path().to_string_lossy().to_string();

        let outcome = transfer(
            &src_path,
            &dst_dir_path,
            &mut from,
            &mut to,
            TransferOpts::default(),
            None,
        )
        .await
        .unwrap();

        assert_eq!(outcome.sent, src_path);
        dst_dir.child("a.txt").assert(predicate::path::is_file());
    }

    #[tokio::test]
    async fn transfer_dir_mirrors_nested_directories() {
        let src_dir = TempDir::new().unwrap();
        let dst_dir = TempDir::new().unwrap();
        src_dir.child("top.txt").write_str("top").unwrap();
        src_dir.child("nested/inner.txt").write_str("inner").unwrap();

        let mut src_backend = LocalBackend::new();
        let mut dst_backend = LocalBackend::new();
        let mut from = Endpoint::Local(&mut src_backend);
        let mut to = Endpoint::Local(&mut dst_backend);

        let src_path = src_dir.path().to_string_lossy().to_string();
        let dst_dir_path = dst_dir.path().to_string_lossy().to_string();
        let basename = src_dir.path().file_name().unwrap().to_string_lossy().to_string();

        transfer_dir(&src_path, &dst_dir_path, &mut from, &mut to, None)
            .await
            .unwrap();

        let mirrored = dst_dir.child(&basename);
        mirrored.child("top.txt").assert("top");
        mirrored.child("nested/inner.txt").assert("inner");
    }
}
