//! Archive inventory: class names, bundle unpacking and the built-in namespace.

use std::collections::HashSet;
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use rayon::prelude::*;

use crate::util::fs::ensure_dir;

/// Fully-qualified class name of an archive entry, if it is a class.
///
/// `org/pkg/Foo.class` becomes `org.pkg.Foo`. Entries under `META-INF/`
/// are versioned duplicates and are skipped.
pub fn class_name_for_entry(entry: &str, class_extension: &str) -> Option<String> {
    if entry.ends_with('/') || entry.starts_with("META-INF/") {
        return None;
    }
    let (stem, ext) = entry.rsplit_once('.')?;
    if ext != class_extension || stem.is_empty() {
        return None;
    }
    Some(stem.replace('/', "."))
}

/// Class names contained in a code archive, sorted.
pub fn class_names_in_archive(path: &Path, class_extension: &str) -> Result<Vec<String>> {
    let file = File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    let archive = zip::ZipArchive::new(file)
        .with_context(|| format!("failed to read archive {}", path.display()))?;

    let mut names: Vec<String> = archive
        .file_names()
        .filter_map(|entry| class_name_for_entry(entry, class_extension))
        .collect();
    names.sort();
    names.dedup();
    Ok(names)
}

/// Unpack `bundle` into `dest`, returning the files written.
///
/// Entries that would escape `dest` are skipped.
pub fn unpack_bundle(bundle: &Path, dest: &Path) -> Result<Vec<PathBuf>> {
    let file = File::open(bundle).with_context(|| format!("failed to open {}", bundle.display()))?;
    let mut archive = zip::ZipArchive::new(file)
        .with_context(|| format!("failed to read archive {}", bundle.display()))?;
    ensure_dir(dest)?;

    let mut written = Vec::new();
    for i in 0..archive.len() {
        let mut entry = archive
            .by_index(i)
            .with_context(|| format!("failed to read entry {} of {}", i, bundle.display()))?;
        let Some(rel) = entry.enclosed_name() else {
            tracing::warn!("skipping unsafe entry {} in {}", entry.name(), bundle.display());
            continue;
        };
        let out_path = dest.join(rel);
        if entry.is_dir() {
            ensure_dir(&out_path)?;
            continue;
        }
        if let Some(parent) = out_path.parent() {
            ensure_dir(parent)?;
        }
        let mut out = File::create(&out_path)
            .with_context(|| format!("failed to create {}", out_path.display()))?;
        io::copy(&mut entry, &mut out)
            .with_context(|| format!("failed to extract {}", out_path.display()))?;
        written.push(out_path);
    }
    written.sort();
    Ok(written)
}

/// Class names already provided by the application itself.
pub trait ClassNamespace: Send + Sync {
    fn contains(&self, class_name: &str) -> bool;
}

/// The application's namespace as the union of a set of archives.
#[derive(Debug, Clone, Default)]
pub struct ArchiveNamespace {
    names: HashSet<String>,
}

impl ArchiveNamespace {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        ArchiveNamespace {
            names: names.into_iter().map(Into::into).collect(),
        }
    }

    /// Read every class name of `archives`. Missing archives contribute nothing.
    pub fn load(archives: &[PathBuf], class_extension: &str) -> Result<Self> {
        let per_archive: Vec<Vec<String>> = archives
            .par_iter()
            .filter(|path| path.is_file())
            .map(|path| class_names_in_archive(path, class_extension))
            .collect::<Result<_>>()?;

        let names: HashSet<String> = per_archive.into_iter().flatten().collect();
        tracing::debug!(
            "built-in namespace: {} class(es) from {} archive(s)",
            names.len(),
            archives.len()
        );
        Ok(ArchiveNamespace { names })
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

impl ClassNamespace for ArchiveNamespace {
    fn contains(&self, class_name: &str) -> bool {
        self.names.contains(class_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::fixtures::{write_aar, write_jar};
    use tempfile::TempDir;

    #[test]
    fn test_class_name_for_entry() {
        assert_eq!(
            class_name_for_entry("com/x/Foo.class", "class"),
            Some("com.x.Foo".to_string())
        );
        assert_eq!(
            class_name_for_entry("com/x/Foo$Inner.class", "class"),
            Some("com.x.Foo$Inner".to_string())
        );
        assert_eq!(class_name_for_entry("com/x/", "class"), None);
        assert_eq!(class_name_for_entry("com/x/res.png", "class"), None);
        assert_eq!(class_name_for_entry("META-INF/versions/9/A.class", "class"), None);
    }

    #[test]
    fn test_class_names_in_archive() {
        let tmp = TempDir::new().unwrap();
        let jar = tmp.path().join("foo.jar");
        write_jar(&jar, &["com/x/Foo.class", "com/x/Bar.class", "com/x/readme.txt"]);

        let names = class_names_in_archive(&jar, "class").unwrap();
        assert_eq!(names, vec!["com.x.Bar".to_string(), "com.x.Foo".to_string()]);
    }

    #[test]
    fn test_unreadable_archive() {
        let tmp = TempDir::new().unwrap();
        let bogus = tmp.path().join("bogus.jar");
        std::fs::write(&bogus, b"not a zip").unwrap();
        assert!(class_names_in_archive(&bogus, "class").is_err());
    }

    #[test]
    fn test_unpack_bundle() {
        let tmp = TempDir::new().unwrap();
        let aar = tmp.path().join("vision.aar");
        write_aar(&aar, &["com/v/Camera.class"], &["jni/arm64-v8a/libvision.so"]);

        let out = tmp.path().join("unpacked");
        let files = unpack_bundle(&aar, &out).unwrap();

        assert!(out.join("classes.jar").is_file());
        assert!(out.join("jni/arm64-v8a/libvision.so").is_file());
        assert_eq!(files.len(), 2);
    }

    #[test]
    fn test_archive_namespace() {
        let tmp = TempDir::new().unwrap();
        let support = tmp.path().join("app.jar");
        let platform = tmp.path().join("android.jar");
        write_jar(&support, &["org/app/Main.class"]);
        write_jar(&platform, &["android/app/Activity.class"]);

        let ns = ArchiveNamespace::load(
            &[support, platform, tmp.path().join("missing.jar")],
            "class",
        )
        .unwrap();

        assert_eq!(ns.len(), 2);
        assert!(ns.contains("org.app.Main"));
        assert!(ns.contains("android.app.Activity"));
        assert!(!ns.contains("com.x.Foo"));
    }
}
