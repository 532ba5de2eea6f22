//! Filesystem helpers for parcel payloads

use crate::error::{CommonError, Result};
use std::io::Write;
use std::path::Path;
use walkdir::WalkDir;

/// Total size in bytes of a file, or of every file beneath a directory
pub fn total_size_bytes(path: impl AsRef<Path>) -> Result<u64> {
    let path = path.as_ref();
    let meta = std::fs::metadata(path)?;
    if meta.is_file() {
        return Ok(meta.len());
    }

    let mut total = 0u64;
    for entry in WalkDir::new(path).min_depth(1) {
        let entry = entry?;
        if entry.file_type().is_file() {
            total += entry.metadata()?.len();
        }
    }
    Ok(total)
}

/// Number of files at a path: 1 for a plain file, otherwise a recursive count
pub fn total_file_count(path: impl AsRef<Path>) -> Result<u64> {
    let path = path.as_ref();
    if std::fs::metadata(path)?.is_file() {
        return Ok(1);
    }

    let mut count = 0u64;
    for entry in WalkDir::new(path).min_depth(1) {
        if entry?.file_type().is_file() {
            count += 1;
        }
    }
    Ok(count)
}

/// Write `contents` to `path` so readers see either the old file or the new one
///
/// The data goes to a temporary file in the same directory which is then
/// renamed over the destination.
pub fn write_atomic(path: impl AsRef<Path>, contents: &[u8]) -> Result<()> {
    let path = path.as_ref();
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };

    let mut tmp = tempfile::Builder::new()
        .prefix(".tmp-")
        .tempfile_in(dir)?;
    tmp.write_all(contents)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| CommonError::Persist {
        path: path.display().to_string(),
        source: e.error,
    })?;
    Ok(())
}

/// Remove a file or a directory tree
pub fn remove_path(path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    if std::fs::symlink_metadata(path)?.is_dir() {
        std::fs::remove_dir_all(path)?;
    } else {
        std::fs::remove_file(path)?;
    }
    Ok(())
}
