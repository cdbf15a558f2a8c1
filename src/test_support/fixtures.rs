//! Archive fixtures.

use std::io::{Cursor, Write};
use std::path::Path;

use zip::write::SimpleFileOptions;
use zip::ZipWriter;

const CLASS_MAGIC: &[u8] = &[0xCA, 0xFE, 0xBA, 0xBE, 0x00, 0x00, 0x00, 0x41];

fn zip_bytes<'a>(entries: impl IntoIterator<Item = (&'a str, Vec<u8>)>) -> Vec<u8> {
    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default();
    for (name, contents) in entries {
        zip.start_file(name, options).unwrap();
        zip.write_all(&contents).unwrap();
    }
    zip.finish().unwrap().into_inner()
}

fn entry_contents(name: &str) -> Vec<u8> {
    if name.ends_with(".class") {
        CLASS_MAGIC.to_vec()
    } else {
        format!("contents of {}\n", name).into_bytes()
    }
}

/// A code archive containing `entries` (paths like `com/x/Foo.class`).
pub fn jar_bytes(entries: &[&str]) -> Vec<u8> {
    zip_bytes(entries.iter().map(|e| (*e, entry_contents(e))))
}

/// Write a code archive to `path`.
pub fn write_jar(path: &Path, entries: &[&str]) {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(path, jar_bytes(entries)).unwrap();
}

/// Write a bundle holding `classes.jar` with `classes` plus the `native` files.
pub fn write_aar(path: &Path, classes: &[&str], native: &[&str]) {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    let mut entries = vec![("classes.jar", jar_bytes(classes))];
    entries.extend(native.iter().map(|n| (*n, entry_contents(n))));
    std::fs::write(path, zip_bytes(entries)).unwrap();
}
