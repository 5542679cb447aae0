//! Zip-backed [`Archiver`]: compresses a day directory next to itself and
//! removes local copies once they are no longer needed.

use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::{debug, info};
use walkdir::WalkDir;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::contract::{Archiver, Statistics};
use crate::error::ArchiveError;
use crate::statistics::collect_statistics;

/// Deterministic location of the artifact for a day directory: `path + ".zip"`.
pub fn archive_path(path: &Path) -> PathBuf {
    let mut os = path.as_os_str().to_owned();
    os.push(".zip");
    PathBuf::from(os)
}

#[derive(Debug, Clone, Default)]
pub struct ZipArchiver;

impl ZipArchiver {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Archiver for ZipArchiver {
    async fn compress(&self, path: &Path) -> Result<Statistics, ArchiveError> {
        let path = path.to_path_buf();
        tokio::task::spawn_blocking(move || compress_dir(&path))
            .await
            .map_err(|e| ArchiveError::Worker(e.to_string()))?
    }

    async fn delete(&self, path: &Path) -> Result<(), ArchiveError> {
        let path = path.to_path_buf();
        tokio::task::spawn_blocking(move || delete_path(&path))
            .await
            .map_err(|e| ArchiveError::Worker(e.to_string()))?
    }

    async fn list(&self, dir: &Path) -> Result<Vec<String>, ArchiveError> {
        let mut entries = tokio::fs::read_dir(dir).await?;
        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
        names.sort();
        Ok(names)
    }
}

fn compress_dir(source: &Path) -> Result<Statistics, ArchiveError> {
    if !source.exists() {
        return Err(ArchiveError::SourceMissing(source.to_path_buf()));
    }

    let statistics = collect_statistics(source)?;

    let target = archive_path(source);
    let parent = target.parent().unwrap_or_else(|| Path::new("."));
    // Written beside the target and renamed into place, so a crash never leaves
    // a truncated artifact under the final name.
    let mut tmp = tempfile::Builder::new()
        .prefix(".echoes-")
        .suffix(".zip.part")
        .tempfile_in(parent)?;

    {
        let mut writer = ZipWriter::new(tmp.as_file_mut());
        let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

        for entry in WalkDir::new(source).min_depth(1).sort_by_file_name() {
            let entry = entry.map_err(|e| ArchiveError::Io(io::Error::from(e)))?;
            let name = entry_name(entry.path(), source);
            if entry.file_type().is_dir() {
                writer.add_directory(format!("{name}/"), options)?;
            } else {
                writer.start_file(name, options)?;
                let mut input = File::open(entry.path())?;
                io::copy(&mut input, &mut writer)?;
            }
        }
        writer.finish()?;
    }

    tmp.as_file().sync_all()?;
    tmp.persist(&target).map_err(|e| ArchiveError::Io(e.error))?;

    let size = std::fs::metadata(&target).map(|m| m.len()).unwrap_or_default();
    info!(
        source = %source.display(),
        archive = %target.display(),
        size_bytes = size,
        directories = statistics.len(),
        "Directory compressed"
    );
    Ok(statistics)
}

// Entries are stored relative to the compressed directory, without its own name.
fn entry_name(path: &Path, root: &Path) -> String {
    let rel = path.strip_prefix(root).unwrap_or(path);
    rel.components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

fn delete_path(path: &Path) -> Result<(), ArchiveError> {
    let metadata = match std::fs::symlink_metadata(path) {
        Ok(m) => m,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "Nothing to delete");
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    };

    let result = if metadata.is_dir() {
        std::fs::remove_dir_all(path)
    } else {
        std::fs::remove_file(path)
    };
    match result {
        Ok(()) => {
            info!(path = %path.display(), "Deleted local copy");
            Ok(())
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}
