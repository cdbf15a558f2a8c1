//! Consolidation of compiled classes into a single archive.

use std::fs::File;
use std::io::{self, Write};
use std::path::Path;

use anyhow::{Context, Result};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::util::fs::{ensure_dir, files_under, relative_path};

const MANIFEST_ENTRY: &str = "META-INF/MANIFEST.MF";
const MANIFEST: &str = "Manifest-Version: 1.0\r\nCreated-By: berth\r\n\r\n";

/// Zip every class file under `classes_dir` into `archive`.
///
/// Entry names are relative to `classes_dir` with `/` separators. The
/// archive is written to a temporary sibling and renamed into place, so it
/// either exists complete or not at all. Returns the number of classes.
pub fn consolidate(classes_dir: &Path, class_extension: &str, archive: &Path) -> Result<usize> {
    let parent = archive
        .parent()
        .with_context(|| format!("archive path has no parent: {}", archive.display()))?;
    ensure_dir(parent)?;

    let classes = files_under(classes_dir, class_extension);
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    let tmp = tempfile::NamedTempFile::new_in(parent)
        .with_context(|| format!("failed to create temp file in {}", parent.display()))?;
    let mut zip = ZipWriter::new(tmp);

    zip.start_file(MANIFEST_ENTRY, options)?;
    zip.write_all(MANIFEST.as_bytes())?;

    for class in &classes {
        let name = entry_name(&relative_path(classes_dir, class));
        zip.start_file(name.as_str(), options)?;
        let mut src =
            File::open(class).with_context(|| format!("failed to open {}", class.display()))?;
        io::copy(&mut src, &mut zip).with_context(|| format!("failed to add {}", name))?;
    }

    let tmp = zip
        .finish()
        .with_context(|| format!("failed to finish {}", archive.display()))?;
    tmp.as_file().sync_all()?;
    tmp.persist(archive)
        .with_context(|| format!("failed to write {}", archive.display()))?;

    tracing::debug!("consolidated {} class(es) into {}", classes.len(), archive.display());
    Ok(classes.len())
}

fn entry_name(rel: &Path) -> String {
    rel.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}
