//! Filesystem utilities.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use walkdir::WalkDir;

use crate::util::hash::sha256_file;

/// Remove a directory and all its contents, if it exists.
pub fn remove_dir_all_if_exists(path: &Path) -> Result<()> {
    if path.exists() {
        fs::remove_dir_all(path)
            .with_context(|| format!("failed to remove directory: {}", path.display()))?;
    }
    Ok(())
}

/// Remove a file or a directory tree, if it exists.
pub fn remove_path(path: &Path) -> Result<()> {
    if path.is_dir() {
        remove_dir_all_if_exists(path)
    } else if path.exists() {
        fs::remove_file(path)
            .with_context(|| format!("failed to remove file: {}", path.display()))
    } else {
        Ok(())
    }
}

/// Ensure a directory exists, creating it if necessary.
pub fn ensure_dir(path: &Path) -> Result<()> {
    if !path.exists() {
        fs::create_dir_all(path)
            .with_context(|| format!("failed to create directory: {}", path.display()))?;
    }
    Ok(())
}

/// Read a file to string, with nice error messages.
pub fn read_to_string(path: &Path) -> Result<String> {
    fs::read_to_string(path).with_context(|| format!("failed to read file: {}", path.display()))
}

/// Files directly inside `dir` (not recursive), sorted by name.
///
/// A missing directory yields an empty list.
pub fn files_in(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut files = Vec::new();
    for entry in
        fs::read_dir(dir).with_context(|| format!("failed to read directory: {}", dir.display()))?
    {
        let entry = entry?;
        if entry.file_type()?.is_file() {
            files.push(entry.path());
        }
    }
    files.sort();
    Ok(files)
}

/// Directories directly inside `dir`, sorted by name.
pub fn dirs_in(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut dirs = Vec::new();
    for entry in
        fs::read_dir(dir).with_context(|| format!("failed to read directory: {}", dir.display()))?
    {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            dirs.push(entry.path());
        }
    }
    dirs.sort();
    Ok(dirs)
}

/// Every file under `dir` (recursive) whose extension is `ext`, sorted.
pub fn files_under(dir: &Path, ext: &str) -> Vec<PathBuf> {
    if !dir.exists() {
        return Vec::new();
    }
    let mut files: Vec<PathBuf> = WalkDir::new(dir)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .filter(|path| has_extension(path, ext))
        .collect();
    files.sort();
    files
}

/// Check whether `path` has the extension `ext` (without the dot).
pub fn has_extension(path: &Path, ext: &str) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case(ext))
}

/// Get the relative path from `base` to `path`.
pub fn relative_path(base: &Path, path: &Path) -> PathBuf {
    pathdiff::diff_paths(path, base).unwrap_or_else(|| path.to_path_buf())
}

/// Make `path` absolute against the current directory without touching the filesystem.
pub fn absolute(path: &Path) -> PathBuf {
    std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf())
}

/// Copy `src` to `dst` unless `dst` already has identical contents.
///
/// Returns true if a copy was made.
pub fn copy_if_changed(src: &Path, dst: &Path) -> Result<bool> {
    if dst.is_dir() {
        remove_dir_all_if_exists(dst)?;
    }
    if dst.is_file() && sha256_file(src)? == sha256_file(dst)? {
        return Ok(false);
    }
    if let Some(parent) = dst.parent() {
        ensure_dir(parent)?;
    }
    fs::copy(src, dst)
        .with_context(|| format!("failed to copy {} to {}", src.display(), dst.display()))?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_files_under() {
        let tmp = TempDir::new().unwrap();
        let pkg = tmp.path().join("org").join("example");
        fs::create_dir_all(&pkg).unwrap();
        fs::write(pkg.join("Main.class"), "x").unwrap();
        fs::write(pkg.join("Util.CLASS"), "x").unwrap();
        fs::write(pkg.join("readme.txt"), "readme").unwrap();

        let files = files_under(tmp.path(), "class");
        assert_eq!(files.len(), 2);
        assert!(files_under(&tmp.path().join("missing"), "class").is_empty());
    }

    #[test]
    fn test_files_in_is_shallow() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("a.jar"), "a").unwrap();
        fs::create_dir(tmp.path().join("a_jar")).unwrap();
        fs::write(tmp.path().join("a_jar").join("inner.dex"), "d").unwrap();

        let files = files_in(tmp.path()).unwrap();
        assert_eq!(files, vec![tmp.path().join("a.jar")]);
        assert_eq!(dirs_in(tmp.path()).unwrap(), vec![tmp.path().join("a_jar")]);
    }

    #[test]
    fn test_copy_if_changed() {
        let tmp = TempDir::new().unwrap();
        let src = tmp.path().join("libfoo.so");
        let dst = tmp.path().join("staged").join("libfoo.so");
        fs::write(&src, "native").unwrap();

        assert!(copy_if_changed(&src, &dst).unwrap());
        assert!(!copy_if_changed(&src, &dst).unwrap());

        fs::write(&src, "native v2").unwrap();
        assert!(copy_if_changed(&src, &dst).unwrap());
        assert_eq!(fs::read_to_string(&dst).unwrap(), "native v2");
    }

    #[test]
    fn test_remove_path() {
        let tmp = TempDir::new().unwrap();
        let file = tmp.path().join("f");
        let dir = tmp.path().join("d");
        fs::write(&file, "x").unwrap();
        fs::create_dir_all(dir.join("inner")).unwrap();

        remove_path(&file).unwrap();
        remove_path(&dir).unwrap();
        remove_path(&tmp.path().join("absent")).unwrap();

        assert!(!file.exists());
        assert!(!dir.exists());
    }
}
