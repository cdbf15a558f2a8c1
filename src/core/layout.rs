//! The persisted directory layout.
//!
//! ```text
//! <root>/
//!   berth.toml
//!   src/                         user source modules
//!   lib/                         support and platform archives
//!   control/buildRequest.txt     sentinel; any write requests a build
//!   control/buildLock/           build lock
//!   status/                      build markers, log, working dir record
//!   build/classes/               compiler output (wiped every build)
//!   build/gensrc/                generated sources (wiped every build)
//!   build/jars/<version>/        one directory per build attempt
//!   build/jars/currentVersionPointer
//!   externalLibraries/           uploaded libraries and their private dirs
//!   native/                      staged native code of external libraries
//! ```

use std::path::{Path, PathBuf};

use anyhow::Result;

use crate::util::fs::ensure_dir;

/// Paths of the persisted layout under a root directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layout {
    root: PathBuf,
}

impl Layout {
    /// Create a layout rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Layout { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// User source modules.
    pub fn src_dir(&self) -> PathBuf {
        self.root.join("src")
    }

    /// Support and platform libraries the user code is built against.
    pub fn lib_dir(&self) -> PathBuf {
        self.root.join("lib")
    }

    pub fn control_dir(&self) -> PathBuf {
        self.root.join("control")
    }

    /// Sentinel file whose modification requests a build.
    pub fn build_request_file(&self) -> PathBuf {
        self.control_dir().join("buildRequest.txt")
    }

    pub fn build_lock_dir(&self) -> PathBuf {
        self.control_dir().join("buildLock")
    }

    pub fn status_dir(&self) -> PathBuf {
        self.root.join("status")
    }

    pub fn build_started_file(&self) -> PathBuf {
        self.status_dir().join("buildStarted.txt")
    }

    pub fn build_complete_file(&self) -> PathBuf {
        self.status_dir().join("buildComplete.txt")
    }

    pub fn build_successful_file(&self) -> PathBuf {
        self.status_dir().join("buildSuccessful.txt")
    }

    /// Diagnostics of the latest build.
    pub fn build_log_file(&self) -> PathBuf {
        self.status_dir().join("buildLog.txt")
    }

    /// Version directory of the latest build attempt, published or not.
    pub fn working_dir_file(&self) -> PathBuf {
        self.status_dir().join("buildWorkingDir.txt")
    }

    pub fn build_dir(&self) -> PathBuf {
        self.root.join("build")
    }

    pub fn classes_dir(&self) -> PathBuf {
        self.build_dir().join("classes")
    }

    pub fn gensrc_dir(&self) -> PathBuf {
        self.build_dir().join("gensrc")
    }

    /// Parent of every versioned output directory.
    pub fn jars_dir(&self) -> PathBuf {
        self.build_dir().join("jars")
    }

    /// The only record of which version is current.
    pub fn version_pointer_file(&self) -> PathBuf {
        self.jars_dir().join("currentVersionPointer")
    }

    /// Uploaded external libraries.
    pub fn external_libraries_dir(&self) -> PathBuf {
        self.root.join("externalLibraries")
    }

    /// Native code staged out of external library bundles.
    pub fn native_dir(&self) -> PathBuf {
        self.root.join("native")
    }

    /// Create every directory of the layout.
    pub fn ensure(&self) -> Result<()> {
        for dir in [
            self.src_dir(),
            self.lib_dir(),
            self.control_dir(),
            self.build_lock_dir(),
            self.status_dir(),
            self.classes_dir(),
            self.gensrc_dir(),
            self.jars_dir(),
            self.external_libraries_dir(),
            self.native_dir(),
        ] {
            ensure_dir(&dir)?;
        }
        Ok(())
    }

    /// Whether the layout has been created.
    pub fn exists(&self) -> bool {
        self.src_dir().is_dir() && self.control_dir().is_dir()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_layout_paths() {
        let layout = Layout::new("/data/berth");
        assert_eq!(
            layout.version_pointer_file(),
            PathBuf::from("/data/berth/build/jars/currentVersionPointer")
        );
        assert_eq!(
            layout.build_request_file(),
            PathBuf::from("/data/berth/control/buildRequest.txt")
        );
        assert_eq!(
            layout.build_started_file(),
            PathBuf::from("/data/berth/status/buildStarted.txt")
        );
    }

    #[test]
    fn test_layout_ensure() {
        let tmp = TempDir::new().unwrap();
        let layout = Layout::new(tmp.path());
        assert!(!layout.exists());

        layout.ensure().unwrap();

        assert!(layout.exists());
        assert!(layout.jars_dir().is_dir());
        assert!(layout.build_lock_dir().is_dir());
        assert!(layout.external_libraries_dir().is_dir());
    }
}
