//! System-wide build lock.
//!
//! An exclusive advisory lock on `control/buildLock/lock`. It serializes the
//! in-process worker against any other process (a recovery tool, a second
//! `berth build`) that wants to run the pipeline. The OS drops the lock when
//! the holder dies, so a crash never leaves it held.

use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use fs4::FileExt;
use miette::Diagnostic as MietteDiagnostic;
use thiserror::Error;

use crate::util::diagnostic::{suggestions, Diagnostic};

const LOCK_FILE: &str = "lock";
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Failure to take the build lock.
#[derive(Debug, Error, MietteDiagnostic)]
pub enum LockError {
    #[error("build lock at {} is held by another build ({:.1}s elapsed)", .path.display(), .waited.as_secs_f64())]
    #[diagnostic(
        code(berth::lock::timeout),
        help("Another build is running; request a new build when it finishes")
    )]
    Timeout { path: PathBuf, waited: Duration },

    #[error("failed to open build lock at {}", .path.display())]
    #[diagnostic(code(berth::lock::io))]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl LockError {
    pub fn to_diagnostic(&self) -> Diagnostic {
        match self {
            LockError::Timeout { .. } => {
                Diagnostic::error(self.to_string()).with_suggestion(suggestions::LOCK_BUSY)
            }
            LockError::Io { source, .. } => {
                Diagnostic::error(self.to_string()).with_context(source.to_string())
            }
        }
    }
}

/// The build lock of one layout.
#[derive(Debug, Clone)]
pub struct BuildLock {
    path: PathBuf,
}

impl BuildLock {
    /// Lock living in `dir` (normally `control/buildLock/`).
    pub fn new(dir: &Path) -> Self {
        BuildLock {
            path: dir.join(LOCK_FILE),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Take the lock, waiting at most `timeout`.
    pub fn acquire(&self, timeout: Duration) -> Result<BuildLockGuard, LockError> {
        let file = self.open()?;
        let start = Instant::now();
        loop {
            match file.try_lock_exclusive() {
                Ok(()) => {
                    tracing::debug!("acquired build lock {}", self.path.display());
                    return Ok(BuildLockGuard {
                        file,
                        path: self.path.clone(),
                    });
                }
                Err(e) if is_contended(&e) => {
                    let waited = start.elapsed();
                    if waited >= timeout {
                        return Err(LockError::Timeout {
                            path: self.path.clone(),
                            waited,
                        });
                    }
                    thread::sleep(POLL_INTERVAL.min(timeout - waited));
                }
                Err(source) => {
                    return Err(LockError::Io {
                        path: self.path.clone(),
                        source,
                    })
                }
            }
        }
    }

    /// Take the lock only if it is free right now.
    pub fn try_acquire(&self) -> Result<Option<BuildLockGuard>, LockError> {
        let file = self.open()?;
        match file.try_lock_exclusive() {
            Ok(()) => Ok(Some(BuildLockGuard {
                file,
                path: self.path.clone(),
            })),
            Err(e) if is_contended(&e) => Ok(None),
            Err(source) => Err(LockError::Io {
                path: self.path.clone(),
                source,
            }),
        }
    }

    fn open(&self) -> Result<File, LockError> {
        let io_err = |source: io::Error| LockError::Io {
            path: self.path.clone(),
            source,
        };
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(io_err)?;
        }
        OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&self.path)
            .map_err(io_err)
    }
}

fn is_contended(e: &io::Error) -> bool {
    e.kind() == io::ErrorKind::WouldBlock
}

/// Holds the build lock until dropped.
#[derive(Debug)]
pub struct BuildLockGuard {
    file: File,
    path: PathBuf,
}

impl Drop for BuildLockGuard {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            tracing::warn!("failed to release build lock {}: {}", self.path.display(), e);
        } else {
            tracing::debug!("released build lock {}", self.path.display());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_acquire_and_release() {
        let tmp = TempDir::new().unwrap();
        let lock = BuildLock::new(&tmp.path().join("buildLock"));

        let guard = lock.acquire(Duration::from_secs(1)).unwrap();
        assert!(lock.path().is_file());
        drop(guard);

        assert!(lock.try_acquire().unwrap().is_some());
    }

    #[test]
    fn test_contention_times_out() {
        let tmp = TempDir::new().unwrap();
        let lock = BuildLock::new(tmp.path());

        let _held = lock.acquire(Duration::from_secs(1)).unwrap();

        assert!(lock.try_acquire().unwrap().is_none());
        let err = lock.acquire(Duration::from_millis(120)).unwrap_err();
        assert!(matches!(err, LockError::Timeout { .. }));
        assert!(err.to_diagnostic().suggestions[0].contains("Another build"));
    }

    #[test]
    fn test_waiter_gets_lock_after_release() {
        let tmp = TempDir::new().unwrap();
        let lock = BuildLock::new(tmp.path());
        let held = lock.acquire(Duration::from_secs(1)).unwrap();

        let waiter = {
            let lock = lock.clone();
            thread::spawn(move || lock.acquire(Duration::from_secs(5)).is_ok())
        };
        thread::sleep(Duration::from_millis(100));
        drop(held);

        assert!(waiter.join().unwrap());
    }
}
