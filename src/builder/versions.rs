//! Versioned output directories.
//!
//! Every build attempt gets a fresh directory under `build/jars/`, named by
//! timestamp plus a random suffix so a directory that a code loader has seen
//! is never reused. The pointer file is the only record of which one is
//! current.

use std::io;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use chrono::Utc;

use crate::core::layout::Layout;
use crate::util::durable;
use crate::util::fs::{absolute, dirs_in, ensure_dir, remove_dir_all_if_exists};

const VERSION_PREFIX: &str = "build";
const MAX_NAME_ATTEMPTS: usize = 16;

/// Allocates, publishes and reclaims versioned output directories.
#[derive(Debug, Clone)]
pub struct VersionStore {
    jars_dir: PathBuf,
    pointer_file: PathBuf,
}

impl VersionStore {
    pub fn new(layout: &Layout) -> Self {
        VersionStore {
            jars_dir: absolute(&layout.jars_dir()),
            pointer_file: absolute(&layout.version_pointer_file()),
        }
    }

    pub fn jars_dir(&self) -> &Path {
        &self.jars_dir
    }

    /// Allocate a fresh, never-before-used output directory.
    pub fn begin_new_version(&self) -> Result<PathBuf> {
        ensure_dir(&self.jars_dir)?;
        for _ in 0..MAX_NAME_ATTEMPTS {
            let dir = self.jars_dir.join(version_name());
            match std::fs::create_dir(&dir) {
                Ok(()) => {
                    tracing::debug!("allocated version {}", dir.display());
                    return Ok(dir);
                }
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
                Err(e) => {
                    return Err(e)
                        .with_context(|| format!("failed to create {}", dir.display()))
                }
            }
        }
        bail!(
            "could not allocate a unique version directory in {}",
            self.jars_dir.display()
        )
    }

    /// Make `dir` the current version.
    pub fn publish(&self, dir: &Path) -> Result<()> {
        let dir = absolute(dir);
        if !dir.is_dir() {
            bail!("cannot publish missing version {}", dir.display());
        }
        if dir.parent() != Some(self.jars_dir.as_path()) {
            bail!(
                "cannot publish {}: not a version under {}",
                dir.display(),
                self.jars_dir.display()
            );
        }
        durable::write_string(&self.pointer_file, &format!("{}\n", dir.display()))?;
        tracing::info!("published {}", dir.display());
        Ok(())
    }

    /// The published version, if the pointer exists and names a live directory.
    pub fn current(&self) -> Option<PathBuf> {
        let text = match durable::read_to_string(&self.pointer_file) {
            Ok(Some(text)) => text,
            Ok(None) => return None,
            Err(e) => {
                tracing::warn!("unreadable version pointer: {:#}", e);
                return None;
            }
        };
        let path = PathBuf::from(text.trim());
        if text.trim().is_empty() || !path.is_dir() {
            return None;
        }
        Some(path)
    }

    /// Every version directory, oldest name first.
    pub fn list(&self) -> Result<Vec<PathBuf>> {
        dirs_in(&self.jars_dir)
    }

    /// Delete every version directory except `keep` and the current one.
    ///
    /// Returns the number of directories removed.
    pub fn reclaim(&self, keep: Option<&Path>) -> Result<usize> {
        let current = self.current();
        let keep_names: Vec<_> = keep
            .into_iter()
            .chain(current.as_deref())
            .filter_map(|p| p.file_name().map(|n| n.to_os_string()))
            .collect();

        let mut removed = 0;
        for dir in self.list()? {
            let name = dir.file_name().map(|n| n.to_os_string());
            if name.is_some_and(|n| keep_names.contains(&n)) {
                continue;
            }
            remove_dir_all_if_exists(&dir)?;
            removed += 1;
        }
        if removed > 0 {
            tracing::debug!("reclaimed {} version dir(s)", removed);
        }
        Ok(removed)
    }
}

fn version_name() -> String {
    let stamp = Utc::now().format("%Y-%m-%d+%H.%M.%S");
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("{}-{}-{}", VERSION_PREFIX, stamp, &suffix[..8])
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store() -> (TempDir, VersionStore) {
        let tmp = TempDir::new().unwrap();
        let layout = Layout::new(tmp.path());
        (tmp, VersionStore::new(&layout))
    }

    #[test]
    fn test_versions_are_unique() {
        let (_tmp, store) = store();
        let a = store.begin_new_version().unwrap();
        let b = store.begin_new_version().unwrap();
        assert_ne!(a, b);
        assert!(a.is_dir() && b.is_dir());
        assert_eq!(store.list().unwrap().len(), 2);
    }

    #[test]
    fn test_publish_and_current() {
        let (_tmp, store) = store();
        assert!(store.current().is_none());

        let v = store.begin_new_version().unwrap();
        assert!(store.current().is_none());

        store.publish(&v).unwrap();
        assert_eq!(store.current(), Some(v.clone()));

        std::fs::remove_dir_all(&v).unwrap();
        assert!(store.current().is_none());
    }

    #[test]
    fn test_publish_rejects_foreign_dirs() {
        let (tmp, store) = store();
        let foreign = tmp.path().join("elsewhere");
        std::fs::create_dir_all(&foreign).unwrap();
        assert!(store.publish(&foreign).is_err());
        assert!(store.publish(&store.jars_dir().join("missing")).is_err());
    }

    #[test]
    fn test_reclaim_keeps_current() {
        let (_tmp, store) = store();
        let old = store.begin_new_version().unwrap();
        let published = store.begin_new_version().unwrap();
        let failed = store.begin_new_version().unwrap();
        store.publish(&published).unwrap();

        let removed = store.reclaim(None).unwrap();

        assert_eq!(removed, 2);
        assert!(!old.exists());
        assert!(!failed.exists());
        assert_eq!(store.list().unwrap(), vec![published]);
    }

    #[test]
    fn test_reclaim_keeps_explicit_dir() {
        let (_tmp, store) = store();
        let working = store.begin_new_version().unwrap();
        let stale = store.begin_new_version().unwrap();

        store.reclaim(Some(&working)).unwrap();

        assert!(working.exists());
        assert!(!stale.exists());
    }
}
