//! Implementation of `berth lib add|remove|list`.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::Serialize;

use crate::builder::context::BuildContext;
use crate::libraries::{ExternalLibrary, LibraryError, LibraryManager};

/// One upload as shown by `lib list`.
#[derive(Debug, Clone, Serialize)]
pub struct LibraryListing {
    pub name: String,
    /// Whether the library currently contributes code
    pub active: bool,
    pub classes: usize,
    pub loadable_files: usize,
}

/// Open the library manager for `ctx` and re-admit existing uploads.
pub fn open_manager(ctx: &BuildContext) -> Result<LibraryManager> {
    let manager = LibraryManager::new(ctx.clone())?;
    let report = manager.start()?;
    for (name, err) in &report.dropped {
        tracing::warn!("library {} is inactive: {}", name, err);
    }
    Ok(manager)
}

/// Upload the library file at `path`.
///
/// A rejection comes back as a [`LibraryError`] inside the `anyhow` error.
pub fn add_library(manager: &LibraryManager, path: &Path) -> Result<Arc<ExternalLibrary>> {
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .with_context(|| format!("not a file name: {}", path.display()))?;
    let bytes = std::fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    let lib = manager.upload(&bytes, name)?;
    Ok(lib)
}

/// Delete an uploaded library by file name.
pub fn remove_library(manager: &LibraryManager, name: &str) -> Result<(), LibraryError> {
    manager.delete(name)
}

/// Every upload, active or not.
pub fn list_libraries(manager: &LibraryManager) -> Result<Vec<LibraryListing>> {
    let active = manager.libraries();
    let listings = manager
        .library_names()?
        .into_iter()
        .map(|name| {
            let lib = active.iter().find(|l| l.name() == name);
            LibraryListing {
                active: lib.is_some(),
                classes: lib.map_or(0, |l| l.class_names().len()),
                loadable_files: lib.map_or(0, |l| l.loadable_files().len()),
                name,
            }
        })
        .collect();
    Ok(listings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::layout::Layout;
    use crate::libraries::ArchiveNamespace;
    use crate::test_support::fixtures::write_jar;
    use crate::test_support::{FakeCompiler, FakeTranslator};
    use crate::util::config::Config;
    use tempfile::TempDir;

    fn manager(tmp: &TempDir) -> LibraryManager {
        let layout = Layout::new(tmp.path().join("root"));
        layout.ensure().unwrap();
        let ctx = BuildContext::new(layout, Config::default())
            .with_tools(Arc::new(FakeCompiler::new()), Arc::new(FakeTranslator::new()));
        LibraryManager::with_namespace(ctx, Arc::new(ArchiveNamespace::empty()))
    }

    #[test]
    fn test_add_list_remove() {
        let tmp = TempDir::new().unwrap();
        let mgr = manager(&tmp);
        let jar = tmp.path().join("foo.jar");
        write_jar(&jar, &["com/x/Foo.class"]);

        let lib = add_library(&mgr, &jar).unwrap();
        assert_eq!(lib.name(), "foo.jar");

        let listing = list_libraries(&mgr).unwrap();
        assert_eq!(listing.len(), 1);
        assert!(listing[0].active);
        assert_eq!(listing[0].classes, 1);

        remove_library(&mgr, "foo.jar").unwrap();
        assert!(list_libraries(&mgr).unwrap().is_empty());
    }

    #[test]
    fn test_rejection_is_a_library_error() {
        let tmp = TempDir::new().unwrap();
        let mgr = manager(&tmp);
        let foo = tmp.path().join("foo.jar");
        let bar = tmp.path().join("bar.jar");
        write_jar(&foo, &["com/x/Foo.class"]);
        write_jar(&bar, &["com/x/Foo.class"]);

        add_library(&mgr, &foo).unwrap();
        let err = add_library(&mgr, &bar).unwrap_err();

        let lib_err = err.downcast_ref::<LibraryError>().unwrap();
        assert!(lib_err.is_collision());
    }
}
