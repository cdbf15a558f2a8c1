//! Native code staging.
//!
//! Native files of a bundle whose parent directory matches the device ABI
//! are copied to `native/<library dir>/...`. The parents of the staged files
//! become the library's native search directories.

use std::collections::{BTreeSet, HashSet};
use std::path::{Path, PathBuf};

use anyhow::Result;
use walkdir::WalkDir;

use crate::libraries::library::ExternalLibrary;
use crate::util::fs::{copy_if_changed, relative_path, remove_path};

/// Stages native code out of library bundles.
#[derive(Debug, Clone)]
pub struct NativeStager {
    native_dir: PathBuf,
    abi_prefix: String,
}

impl NativeStager {
    pub fn new(native_dir: impl Into<PathBuf>, abi_prefix: impl Into<String>) -> Self {
        NativeStager {
            native_dir: native_dir.into(),
            abi_prefix: abi_prefix.into(),
        }
    }

    /// Whether a native file belongs to the device ABI.
    pub fn matches_abi(&self, file: &Path) -> bool {
        file.parent()
            .and_then(|p| p.file_name())
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.starts_with(&self.abi_prefix))
    }

    /// Where each of a library's matching native files is staged, paired
    /// with its source. Touches nothing on disk.
    pub fn staged_paths(&self, library: &ExternalLibrary) -> Vec<(PathBuf, PathBuf)> {
        let base = library.unpacked_dir();
        let dest_root = self.native_dir.join(library.subdir_file_name());
        library
            .native_files()
            .iter()
            .filter(|file| self.matches_abi(file))
            .map(|file| (file.clone(), dest_root.join(relative_path(&base, file))))
            .collect()
    }

    /// Copy a library's matching native files into place.
    ///
    /// Returns the staged files and their search directories.
    pub fn stage(&self, library: &ExternalLibrary) -> Result<(Vec<PathBuf>, Vec<PathBuf>)> {
        let mut staged = Vec::new();
        let mut dirs = BTreeSet::new();
        for (file, dest) in self.staged_paths(library) {
            if copy_if_changed(&file, &dest)? {
                tracing::debug!("staged {}", dest.display());
            }
            if let Some(parent) = dest.parent() {
                dirs.insert(parent.to_path_buf());
            }
            staged.push(dest);
        }
        Ok((staged, dirs.into_iter().collect()))
    }

    /// Delete staged files that are not in `keep`. Returns how many were removed.
    pub fn prune(&self, keep: &HashSet<PathBuf>) -> Result<usize> {
        if !self.native_dir.is_dir() {
            return Ok(0);
        }
        let mut removed = 0;
        let entries: Vec<_> = WalkDir::new(&self.native_dir)
            .min_depth(1)
            .contents_first(true)
            .into_iter()
            .filter_map(|e| e.ok())
            .collect();
        for entry in entries {
            let path = entry.path();
            if entry.file_type().is_file() {
                if !keep.contains(path) {
                    remove_path(path)?;
                    removed += 1;
                }
            } else if entry.file_type().is_dir() && is_empty_dir(path) {
                remove_path(path)?;
            }
        }
        if removed > 0 {
            tracing::info!("removed {} orphaned native file(s)", removed);
        }
        Ok(removed)
    }
}

fn is_empty_dir(path: &Path) -> bool {
    std::fs::read_dir(path).is_ok_and(|mut entries| entries.next().is_none())
}
