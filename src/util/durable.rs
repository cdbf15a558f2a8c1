//! Crash-safe writes for status and control files.
//!
//! A durably written file always holds one complete generation of its
//! contents: either what was there before the last write, or what that
//! write intended. The protocol keeps the previous generation in a staging
//! sibling (`<path>.old_version`) until the new one has been synced:
//!
//! 1. recover any interrupted earlier write of `path`
//! 2. rename `path` to `<path>.old_version`
//! 3. write and sync the new contents to `path`
//! 4. delete `<path>.old_version`
//!
//! A staging file that survives means step 3 or 4 never completed, so the
//! staged generation is the last one known to be whole. Recovery renames it
//! back over `path`.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tempfile::NamedTempFile;
use walkdir::WalkDir;

use crate::util::fs::ensure_dir;

/// Suffix of the staging sibling that holds the previous generation.
pub const STAGING_SUFFIX: &str = ".old_version";

/// Path of the staging sibling for `path`.
pub fn staging_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(STAGING_SUFFIX);
    PathBuf::from(name)
}

/// Returns the primary path for a staging file, or `None` if `path` is not one.
fn primary_for_staging(path: &Path) -> Option<PathBuf> {
    let name = path.file_name()?.to_str()?;
    let stem = name.strip_suffix(STAGING_SUFFIX)?;
    if stem.is_empty() {
        return None;
    }
    Some(path.with_file_name(stem))
}

/// Write `contents` to `path` so that a crash at any point leaves either the
/// old or the new contents in full.
pub fn write(path: &Path, contents: impl AsRef<[u8]>) -> Result<()> {
    let contents = contents.as_ref();
    let parent = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    ensure_dir(parent)?;

    recover(path)?;

    if !path.exists() {
        // No previous generation to stage; publish the first one by rename.
        let mut tmp = NamedTempFile::new_in(parent)
            .with_context(|| format!("failed to create temp file in {}", parent.display()))?;
        tmp.write_all(contents)
            .with_context(|| format!("failed to write {}", path.display()))?;
        tmp.as_file()
            .sync_all()
            .with_context(|| format!("failed to sync {}", path.display()))?;
        tmp.persist(path)
            .with_context(|| format!("failed to move new file into place: {}", path.display()))?;
        fsync_dir(parent).ok();
        return Ok(());
    }

    let staging = staging_path(path);
    fs::rename(path, &staging).with_context(|| {
        format!(
            "failed to stage previous contents ({} -> {})",
            path.display(),
            staging.display()
        )
    })?;
    fsync_dir(parent).ok();

    // On failure the staging file stays behind; the next recovery restores it.
    write_synced(path, contents)?;

    fs::remove_file(&staging)
        .with_context(|| format!("failed to remove staging file: {}", staging.display()))?;
    fsync_dir(parent).ok();
    Ok(())
}

/// Write a UTF-8 string durably.
pub fn write_string(path: &Path, contents: &str) -> Result<()> {
    write(path, contents.as_bytes())
}

/// Read the last confirmed generation of `path`.
///
/// While a staging file exists the primary is unconfirmed, so the staged
/// contents are returned instead. Returns `None` if neither exists.
pub fn read(path: &Path) -> Result<Option<Vec<u8>>> {
    let staging = staging_path(path);
    let source = if staging.is_file() {
        staging
    } else if path.is_file() {
        path.to_path_buf()
    } else {
        return Ok(None);
    };
    let bytes =
        fs::read(&source).with_context(|| format!("failed to read file: {}", source.display()))?;
    Ok(Some(bytes))
}

/// Read the last confirmed generation of `path` as a string.
pub fn read_to_string(path: &Path) -> Result<Option<String>> {
    match read(path)? {
        Some(bytes) => {
            let text = String::from_utf8(bytes)
                .with_context(|| format!("file is not valid UTF-8: {}", path.display()))?;
            Ok(Some(text))
        }
        None => Ok(None),
    }
}

/// Restore `path` from its staging file if an earlier write was interrupted.
///
/// Returns true if a staging file was found and restored.
pub fn recover(path: &Path) -> Result<bool> {
    let staging = staging_path(path);
    if !staging.exists() {
        return Ok(false);
    }
    fs::rename(&staging, path).with_context(|| {
        format!(
            "failed to restore {} from {}",
            path.display(),
            staging.display()
        )
    })?;
    if let Some(parent) = path.parent() {
        fsync_dir(parent).ok();
    }
    tracing::warn!("recovered interrupted write of {}", path.display());
    Ok(true)
}

/// Recover every interrupted write under `dir`, recursively.
///
/// Returns the number of files restored. A missing directory has nothing
/// to recover.
pub fn commit_all(dir: &Path) -> Result<usize> {
    if !dir.exists() {
        return Ok(0);
    }

    // Collect first; recovery renames entries out from under the walker.
    let staged: Vec<PathBuf> = WalkDir::new(dir)
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(e) => {
                tracing::warn!("skipping unreadable entry during recovery: {}", e);
                None
            }
        })
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .filter(|path| primary_for_staging(path).is_some())
        .collect();

    let mut recovered = 0;
    for staging in staged {
        if let Some(primary) = primary_for_staging(&staging) {
            if recover(&primary)? {
                recovered += 1;
            }
        }
    }
    Ok(recovered)
}

fn write_synced(path: &Path, contents: &[u8]) -> Result<()> {
    let mut file =
        File::create(path).with_context(|| format!("failed to create {}", path.display()))?;
    file.write_all(contents)
        .with_context(|| format!("failed to write {}", path.display()))?;
    file.flush()
        .with_context(|| format!("failed to flush {}", path.display()))?;
    file.sync_all()
        .with_context(|| format!("failed to sync {}", path.display()))?;
    Ok(())
}

fn fsync_dir(dir: &Path) -> Result<()> {
    let file = File::open(dir)?;
    file.sync_all()?;
    Ok(())
}
