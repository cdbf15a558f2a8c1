//! One uploaded external library.
//!
//! `uploaded -> unpacking -> inventorying -> translating -> accepted`, or
//! `rejected` at any inventory or translation failure. The caller rolls back
//! a rejected library; this type only records how far it got.

use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::builder::translate::TranslateStage;
use crate::libraries::error::LibraryError;
use crate::libraries::inventory::{class_names_in_archive, unpack_bundle, ClassNamespace};
use crate::util::diagnostic::render_all;
use crate::util::durable;
use crate::util::fs::{files_under, relative_path, remove_dir_all_if_exists};
use crate::util::hash::sha256_file;

/// Name of the acceptance record inside a library's private directory.
pub const MANIFEST_FILE: &str = "library.json";
const UNPACKED_DIR: &str = "unpacked";
const LOADABLE_DIR: &str = "loadable";

/// Kind of uploaded file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LibraryKind {
    /// A simple code archive (`.jar`)
    CodeArchive,
    /// A bundle of code archives and native code (`.aar`)
    Bundle,
}

impl LibraryKind {
    /// Kind from an upload name. Extensions match exactly: `foo.JAR` is not
    /// a code archive, so no two uploads share a private directory.
    pub fn from_name(name: &str) -> Option<Self> {
        if name.ends_with(".jar") {
            Some(LibraryKind::CodeArchive)
        } else if name.ends_with(".aar") {
            Some(LibraryKind::Bundle)
        } else {
            None
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            LibraryKind::CodeArchive => "jar",
            LibraryKind::Bundle => "aar",
        }
    }
}

/// Where a library is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LibraryState {
    Uploaded,
    Unpacking,
    Inventorying,
    Translating,
    Accepted,
    Rejected,
}

impl fmt::Display for LibraryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LibraryState::Uploaded => "uploaded",
            LibraryState::Unpacking => "unpacking",
            LibraryState::Inventorying => "inventorying",
            LibraryState::Translating => "translating",
            LibraryState::Accepted => "accepted",
            LibraryState::Rejected => "rejected",
        };
        f.write_str(s)
    }
}

/// Acceptance record, written when a library is accepted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LibraryManifest {
    pub name: String,
    pub kind: LibraryKind,
    /// SHA-256 of the upload the record was made for
    pub upload_sha256: String,
    pub class_count: usize,
    /// Translated files, relative to the private directory
    pub loadable: Vec<PathBuf>,
    pub accepted_at: DateTime<Utc>,
}

/// One uploaded archive and everything derived from it.
#[derive(Debug, Clone)]
pub struct ExternalLibrary {
    name: String,
    kind: LibraryKind,
    upload: PathBuf,
    subdir: PathBuf,
    uploaded_at: SystemTime,
    state: LibraryState,
    code_archives: Vec<PathBuf>,
    native_files: Vec<PathBuf>,
    loadable_files: Vec<PathBuf>,
    class_names: BTreeSet<String>,
    native_search_dirs: Vec<PathBuf>,
}

impl ExternalLibrary {
    /// Check that `name` is an acceptable upload name.
    pub fn validate_name(name: &str) -> Result<LibraryKind, LibraryError> {
        let invalid = || LibraryError::InvalidName {
            name: name.to_string(),
        };
        if name.is_empty() || name.starts_with('.') || name.contains(['/', '\\']) {
            return Err(invalid());
        }
        let kind = LibraryKind::from_name(name).ok_or_else(|| LibraryError::Unsupported {
            name: name.to_string(),
        })?;
        let stem = &name[..name.len() - kind.extension().len() - 1];
        if stem.is_empty() {
            return Err(invalid());
        }
        Ok(kind)
    }

    /// Private directory name for an upload: `foo.jar` -> `foo_jar`.
    pub fn subdir_name(name: &str, kind: LibraryKind) -> String {
        let stem = &name[..name.len() - kind.extension().len() - 1];
        format!("{}_{}", stem, kind.extension())
    }

    /// A library for an upload file inside `libraries_dir`.
    pub fn open(upload: &Path, libraries_dir: &Path) -> Result<Self, LibraryError> {
        let name = upload
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default()
            .to_string();
        let kind = Self::validate_name(&name)?;
        let uploaded_at = std::fs::metadata(upload)
            .and_then(|m| m.modified())
            .map_err(|e| LibraryError::io(&name, e.into()))?;

        Ok(ExternalLibrary {
            subdir: libraries_dir.join(Self::subdir_name(&name, kind)),
            name,
            kind,
            upload: upload.to_path_buf(),
            uploaded_at,
            state: LibraryState::Uploaded,
            code_archives: Vec::new(),
            native_files: Vec::new(),
            loadable_files: Vec::new(),
            class_names: BTreeSet::new(),
            native_search_dirs: Vec::new(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> LibraryKind {
        self.kind
    }

    pub fn upload(&self) -> &Path {
        &self.upload
    }

    /// Private directory for unpacked and translated contents.
    pub fn subdir(&self) -> &Path {
        &self.subdir
    }

    pub fn subdir_file_name(&self) -> String {
        Self::subdir_name(&self.name, self.kind)
    }

    pub fn uploaded_at(&self) -> SystemTime {
        self.uploaded_at
    }

    pub fn state(&self) -> LibraryState {
        self.state
    }

    pub fn code_archives(&self) -> &[PathBuf] {
        &self.code_archives
    }

    pub fn native_files(&self) -> &[PathBuf] {
        &self.native_files
    }

    pub fn loadable_files(&self) -> &[PathBuf] {
        &self.loadable_files
    }

    pub fn class_names(&self) -> &BTreeSet<String> {
        &self.class_names
    }

    pub fn contains_class(&self, class_name: &str) -> bool {
        self.class_names.contains(class_name)
    }

    /// Directories holding this library's staged native code.
    pub fn native_search_dirs(&self) -> &[PathBuf] {
        &self.native_search_dirs
    }

    pub(crate) fn set_native_search_dirs(&mut self, dirs: Vec<PathBuf>) {
        self.native_search_dirs = dirs;
    }

    pub fn unpacked_dir(&self) -> PathBuf {
        self.subdir.join(UNPACKED_DIR)
    }

    pub fn loadable_dir(&self) -> PathBuf {
        self.subdir.join(LOADABLE_DIR)
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.subdir.join(MANIFEST_FILE)
    }

    fn transition(&mut self, state: LibraryState) {
        tracing::debug!("library {}: {} -> {}", self.name, self.state, state);
        self.state = state;
    }

    /// Mark the library rejected.
    pub(crate) fn reject(&mut self) {
        self.transition(LibraryState::Rejected);
    }

    /// Locate the code to inventory, unpacking a bundle if needed.
    ///
    /// An already unpacked bundle is reused unless `force` is set.
    pub fn unpack(&mut self, native_extension: &str, force: bool) -> Result<(), LibraryError> {
        self.transition(LibraryState::Unpacking);
        std::fs::create_dir_all(&self.subdir).map_err(|e| LibraryError::io(&self.name, e.into()))?;

        match self.kind {
            LibraryKind::CodeArchive => {
                self.code_archives = vec![self.upload.clone()];
            }
            LibraryKind::Bundle => {
                let unpacked = self.unpacked_dir();
                if force || !unpacked.is_dir() {
                    self.unpack_bundle_atomically(&unpacked)?;
                }
                self.code_archives = files_under(&unpacked, "jar");
                self.native_files = files_under(&unpacked, native_extension);
            }
        }
        Ok(())
    }

    fn unpack_bundle_atomically(&self, unpacked: &Path) -> Result<(), LibraryError> {
        let io = |e: anyhow::Error| LibraryError::io(&self.name, e);
        remove_dir_all_if_exists(unpacked).map_err(io)?;

        let scratch = tempfile::Builder::new()
            .prefix(".unpack-")
            .tempdir_in(&self.subdir)
            .map_err(|e| io(e.into()))?;
        unpack_bundle(&self.upload, scratch.path()).map_err(|e| LibraryError::Unreadable {
            name: self.name.clone(),
            reason: format!("{:#}", e),
        })?;
        std::fs::rename(scratch.path(), unpacked).map_err(|e| io(e.into()))?;
        Ok(())
    }

    /// Collect class names, rejecting on the first collision.
    ///
    /// For each class, other libraries are checked before the application.
    pub fn inventory<'a>(
        &mut self,
        others: impl IntoIterator<Item = &'a ExternalLibrary> + Clone,
        builtin: &dyn ClassNamespace,
        class_extension: &str,
    ) -> Result<(), LibraryError> {
        self.transition(LibraryState::Inventorying);
        self.class_names.clear();

        let mut names = BTreeSet::new();
        for archive in &self.code_archives {
            let classes = class_names_in_archive(archive, class_extension).map_err(|e| {
                LibraryError::Unreadable {
                    name: self.name.clone(),
                    reason: format!("{:#}", e),
                }
            })?;
            for class in classes {
                if let Some(other) = others
                    .clone()
                    .into_iter()
                    .find(|l| l.name != self.name && l.contains_class(&class))
                {
                    return Err(LibraryError::LibraryCollision {
                        name: self.name.clone(),
                        class,
                        other: other.name.clone(),
                    });
                }
                if builtin.contains(&class) {
                    return Err(LibraryError::ApplicationCollision {
                        name: self.name.clone(),
                        class,
                    });
                }
                names.insert(class);
            }
        }

        self.class_names = names;
        Ok(())
    }

    /// Translate the code archives into the private `loadable/` directory.
    pub fn translate(
        &mut self,
        stage: &TranslateStage<'_>,
        classpath: &[PathBuf],
    ) -> Result<(), LibraryError> {
        self.transition(LibraryState::Translating);
        let out = self.loadable_dir();
        remove_dir_all_if_exists(&out).map_err(|e| LibraryError::io(&self.name, e))?;

        if self.class_names.is_empty() {
            tracing::info!("library {} contains no classes, nothing to translate", self.name);
            self.loadable_files.clear();
            return Ok(());
        }

        let outcome = stage.run(&self.code_archives, classpath, &out);
        if !outcome.success {
            let details = render_all(&outcome.diagnostics)
                .lines()
                .map(str::to_string)
                .collect();
            return Err(LibraryError::TranslationFailed {
                name: self.name.clone(),
                details,
            });
        }
        self.loadable_files = outcome.loadable_files;
        Ok(())
    }

    /// Write the acceptance record and mark the library accepted.
    pub fn accept(&mut self) -> Result<(), LibraryError> {
        let io = |e: anyhow::Error| LibraryError::io(&self.name, e);
        let manifest = LibraryManifest {
            name: self.name.clone(),
            kind: self.kind,
            upload_sha256: sha256_file(&self.upload).map_err(io)?,
            class_count: self.class_names.len(),
            loadable: self
                .loadable_files
                .iter()
                .map(|f| relative_path(&self.subdir, f))
                .collect(),
            accepted_at: Utc::now(),
        };
        let json = serde_json::to_string_pretty(&manifest).map_err(|e| io(e.into()))?;
        durable::write_string(&self.manifest_path(), &json).map_err(io)?;
        self.transition(LibraryState::Accepted);
        Ok(())
    }

    /// Restore the translated files of an earlier acceptance.
    ///
    /// Fails when the record is missing, belongs to a different upload, or
    /// names a translated file that no longer exists.
    pub fn restore(&mut self) -> Result<(), LibraryError> {
        self.transition(LibraryState::Translating);
        let incomplete = |missing: Vec<PathBuf>| LibraryError::Incomplete {
            name: self.name.clone(),
            missing,
        };
        let manifest_path = self.manifest_path();
        let text = match durable::read_to_string(&manifest_path) {
            Ok(Some(text)) => text,
            Ok(None) => return Err(incomplete(vec![manifest_path])),
            Err(e) => return Err(LibraryError::io(&self.name, e)),
        };
        let manifest: LibraryManifest =
            serde_json::from_str(&text).map_err(|e| LibraryError::io(&self.name, e.into()))?;

        let sha = sha256_file(&self.upload).map_err(|e| LibraryError::io(&self.name, e))?;
        if manifest.upload_sha256 != sha {
            return Err(incomplete(vec![manifest_path]));
        }

        let files: Vec<PathBuf> = manifest.loadable.iter().map(|f| self.subdir.join(f)).collect();
        let missing: Vec<PathBuf> = files.iter().filter(|f| !f.is_file()).cloned().collect();
        if !missing.is_empty() {
            return Err(incomplete(missing));
        }

        self.loadable_files = files;
        self.transition(LibraryState::Accepted);
        Ok(())
    }
}
