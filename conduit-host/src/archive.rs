//! Local `.zip` archive creation and extraction.
//!
//! `zip` is a synchronous, blocking API; every call here runs inside
//! `tokio::task::spawn_blocking` so it doesn't stall the executor,
//! mirroring how `conduit-host`'s other filesystem operations stay on
//! `tokio::fs` rather than blocking the reactor thread directly.

use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use conduit_core::error::{Error, Result};
use walkdir::WalkDir;
use zip::write::SimpleFileOptions;
use zip::{ZipArchive, ZipWriter};

/// Compresses `path` (a file or directory) into a `.zip` archive at
/// `archive_path` (defaulting to `path` with its extension replaced by
/// `.zip`). When `path` is a directory, its *contents* become the
/// archive root — no top-level folder entry is written — matching spec
/// §6 ("Directory archives contain contents flat from the source
/// directory").
pub async fn zip_path(path: PathBuf, archive_path: Option<PathBuf>) -> Result<PathBuf> {
    tokio::task::spawn_blocking(move || zip_path_blocking(&path, archive_path))
        .await
        .map_err(|e| Error::command_failed(format!("zip task panicked: {e}")))?
}

fn zip_path_blocking(path: &Path, archive_path: Option<PathBuf>) -> Result<PathBuf> {
    let archive_path = archive_path.unwrap_or_else(|| path.with_extension("zip"));
    let file = File::create(&archive_path)?;
    let mut writer = ZipWriter::new(file);
    let opts = SimpleFileOptions::default();

    let metadata = std::fs::metadata(path)?;
    if metadata.is_dir() {
        for entry in WalkDir::new(path).min_depth(1).into_iter() {
            let entry = entry.map_err(|e| Error::invalid_archive(e.to_string()))?;
            let relative = entry
                .path()
                .strip_prefix(path)
                .expect("walked entry is under its root")
                .to_string_lossy()
                .replace('\\', "/");

            if entry.file_type().is_dir() {
                writer.add_directory(format!("{relative}/"), opts)?;
            } else {
                writer.start_file(relative, opts)?;
                let mut contents = Vec::new();
                File::open(entry.path())?.read_to_end(&mut contents)?;
                writer.write_all(&contents)?;
            }
        }
    } else {
        let name = path
            .file_name()
            .ok_or_else(|| Error::invalid_archive("source path has no file name".to_string()))?
            .to_string_lossy()
            .into_owned();
        writer.start_file(name, opts)?;
        let mut contents = Vec::new();
        File::open(path)?.read_to_end(&mut contents)?;
        writer.write_all(&contents)?;
    }

    writer.finish()?;
    Ok(archive_path)
}

/// Extracts `archive_path` into `to_path` (defaulting to the archive's
/// path with `.zip` stripped), returning the resulting folder path.
pub async fn unzip_path(archive_path: PathBuf, to_path: Option<PathBuf>) -> Result<PathBuf> {
    tokio::task::spawn_blocking(move || unzip_path_blocking(&archive_path, to_path))
        .await
        .map_err(|e| Error::command_failed(format!("unzip task panicked: {e}")))?
}

fn unzip_path_blocking(archive_path: &Path, to_path: Option<PathBuf>) -> Result<PathBuf> {
    if archive_path.extension().and_then(|e| e.to_str()) != Some("zip") {
        return Err(Error::invalid_archive(format!(
            "{} does not have a .zip extension",
            archive_path.display()
        )));
    }

    let to_path = to_path.unwrap_or_else(|| archive_path.with_extension(""));
    std::fs::create_dir_all(&to_path)?;

    let file = File::open(archive_path)?;
    let mut archive = ZipArchive::new(file).map_err(|e| Error::invalid_archive(e.to_string()))?;

    for index in 0..archive.len() {
        let mut entry = archive.by_index(index).map_err(|e| Error::invalid_archive(e.to_string()))?;
        let Some(relative) = entry.enclosed_name() else {
            continue;
        };
        let dest = to_path.join(relative);

        if entry.is_dir() {
            std::fs::create_dir_all(&dest)?;
            continue;
        }

        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut out = File::create(&dest)?;
        std::io::copy(&mut entry, &mut out)?;
    }

    Ok(to_path)
}

impl From<zip::result::ZipError> for Error {
    fn from(err: zip::result::ZipError) -> Self {
        Error::invalid_archive(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_fs::prelude::*;
    use assert_fs::TempDir;

    #[tokio::test]
    async fn zip_then_unzip_round_trips_a_directory() {
        let src = TempDir::new().unwrap();
        src.child("a.txt").write_str("hello").unwrap();
        src.child("nested/b.txt").write_str("world").unwrap();

        let archive = zip_path(src.path().to_path_buf(), None).await.unwrap();
        assert_eq!(archive.extension().unwrap(), "zip");

        let dest = TempDir::new().unwrap();
        let extracted = unzip_path(archive, Some(dest.path().to_path_buf())).await.unwrap();

        assert_eq!(
            std::fs::read_to_string(extracted.join("a.txt")).unwrap(),
            "hello"
        );
        assert_eq!(
            std::fs::read_to_string(extracted.join("nested/b.txt")).unwrap(),
            "world"
        );
    }

    #[tokio::test]
    async fn unzip_rejects_non_zip_extension() {
        let file = assert_fs::NamedTempFile::new("archive.tar").unwrap();
        file.write_str("not a zip").unwrap();
        let err = unzip_path(file.path().to_path_buf(), None).await.unwrap_err();
        assert_eq!(err.kind, conduit_core::error::ErrorKind::InvalidArchive);
    }
}
