//! External library manager.
//!
//! Uploaded archives live in `externalLibraries/`. Each accepted library has
//! a private directory next to its upload and contributes one set of class
//! names and loadable files to the code-loading graph. A single mutex guards
//! the live library set together with its graph, and ingestion runs under it,
//! so collision checks and registration see a consistent set.

pub mod error;
pub mod graph;
pub mod inventory;
pub mod library;
pub mod native;

use std::collections::HashSet;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use parking_lot::Mutex;

use crate::builder::context::BuildContext;
use crate::util::fs::{ensure_dir, files_in, remove_dir_all_if_exists, remove_path};

pub use error::LibraryError;
pub use graph::{LoaderGraph, LoaderLink};
pub use inventory::{ArchiveNamespace, ClassNamespace};
pub use library::{ExternalLibrary, LibraryKind, LibraryState};
pub use native::NativeStager;

type ChangeListener = Box<dyn Fn(&LoaderGraph) + Send + Sync>;

struct LiveSet {
    libraries: Vec<Arc<ExternalLibrary>>,
    graph: Arc<LoaderGraph>,
}

/// What happened at start of process.
#[derive(Debug, Default)]
pub struct StartupReport {
    /// Libraries now active, in upload order
    pub accepted: Vec<String>,
    /// Libraries whose upload was kept but which contribute no code
    pub dropped: Vec<(String, LibraryError)>,
}

/// Owner of the uploads directory and the code-loading graph.
pub struct LibraryManager {
    ctx: BuildContext,
    libraries_dir: PathBuf,
    builtin: Arc<dyn ClassNamespace>,
    native: NativeStager,
    live: Mutex<LiveSet>,
    listeners: Mutex<Vec<ChangeListener>>,
}

impl LibraryManager {
    /// Manager whose built-in namespace is the configured support and
    /// platform archives.
    pub fn new(ctx: BuildContext) -> Result<Self> {
        let mut archives = ctx.support_classpath();
        archives.extend(ctx.platform_classpath());
        let builtin = ArchiveNamespace::load(&archives, ctx.class_extension())
            .context("failed to read the application's class names")?;
        Ok(Self::with_namespace(ctx, Arc::new(builtin)))
    }

    /// Manager with an explicit built-in namespace.
    pub fn with_namespace(ctx: BuildContext, builtin: Arc<dyn ClassNamespace>) -> Self {
        let native = NativeStager::new(
            ctx.layout.native_dir(),
            ctx.config.libraries.native_abi(),
        );
        LibraryManager {
            libraries_dir: ctx.layout.external_libraries_dir(),
            ctx,
            builtin,
            native,
            live: Mutex::new(LiveSet {
                libraries: Vec::new(),
                graph: Arc::new(LoaderGraph::empty()),
            }),
            listeners: Mutex::new(Vec::new()),
        }
    }

    pub fn libraries_dir(&self) -> &Path {
        &self.libraries_dir
    }

    /// Re-admit every previously accepted upload, oldest first.
    ///
    /// Nothing is translated again: a library stays active only if it still
    /// inventories cleanly and its recorded translated files all exist.
    /// Anything else is dropped from the active set but keeps its upload.
    pub fn start(&self) -> Result<StartupReport> {
        ensure_dir(&self.libraries_dir)?;
        let mut report = StartupReport::default();
        let mut live = self.live.lock();
        let mut accepted: Vec<Arc<ExternalLibrary>> = Vec::new();

        for upload in self.uploads_by_age()? {
            let mut lib = match ExternalLibrary::open(&upload, &self.libraries_dir) {
                Ok(lib) => lib,
                Err(e) => {
                    tracing::warn!("ignoring {}: {}", upload.display(), e);
                    continue;
                }
            };
            match self.readmit(&mut lib, &accepted) {
                Ok(()) => {
                    tracing::info!("library {} active ({} classes)", lib.name(), lib.class_names().len());
                    report.accepted.push(lib.name().to_string());
                    accepted.push(Arc::new(lib));
                }
                Err(e) => {
                    lib.reject();
                    tracing::warn!("library {} dropped: {}", lib.name(), e);
                    report.dropped.push((lib.name().to_string(), e));
                }
            }
        }

        let generation = live.graph.generation() + 1;
        live.graph = Arc::new(LoaderGraph::rebuilt(
            generation,
            accepted.iter().map(|l| &**l),
        ));
        live.libraries = accepted;
        self.prune_native(&live.libraries)?;
        let graph = live.graph.clone();
        drop(live);

        self.notify(&graph);
        Ok(report)
    }

    fn readmit(
        &self,
        lib: &mut ExternalLibrary,
        accepted: &[Arc<ExternalLibrary>],
    ) -> Result<(), LibraryError> {
        lib.unpack(self.ctx.config.libraries.native_extension(), false)?;
        lib.inventory(
            accepted.iter().map(|l| &**l),
            self.builtin.as_ref(),
            self.ctx.class_extension(),
        )?;
        lib.restore()?;
        self.stage_native(lib)?;
        Ok(())
    }

    /// Ingest an uploaded library.
    ///
    /// On rejection every trace of the library, including the upload, is
    /// removed before the error is returned.
    pub fn upload(&self, bytes: &[u8], filename: &str) -> Result<Arc<ExternalLibrary>, LibraryError> {
        ExternalLibrary::validate_name(filename)?;
        ensure_dir(&self.libraries_dir).map_err(|e| LibraryError::io(filename, e))?;

        let mut live = self.live.lock();
        let upload = self.libraries_dir.join(filename);
        if upload.exists() {
            return Err(LibraryError::Duplicate {
                name: filename.to_string(),
            });
        }
        self.write_upload(&upload, bytes)
            .map_err(|e| LibraryError::io(filename, e))?;

        let mut lib = match ExternalLibrary::open(&upload, &self.libraries_dir) {
            Ok(lib) => lib,
            Err(e) => {
                self.roll_back(&upload, None);
                return Err(e);
            }
        };

        if let Err(e) = self.ingest(&mut lib, &live.libraries) {
            lib.reject();
            tracing::warn!("library {} rejected: {}", lib.name(), e);
            self.roll_back(&upload, Some(lib.subdir()));
            return Err(e);
        }

        let lib = Arc::new(lib);
        live.libraries.push(lib.clone());
        live.graph = Arc::new(live.graph.extended(LoaderLink::for_libraries([&*lib])));
        let graph = live.graph.clone();
        drop(live);

        tracing::info!(
            "library {} accepted ({} classes, {} loadable files)",
            lib.name(),
            lib.class_names().len(),
            lib.loadable_files().len()
        );
        self.notify(&graph);
        Ok(lib)
    }

    fn ingest(
        &self,
        lib: &mut ExternalLibrary,
        accepted: &[Arc<ExternalLibrary>],
    ) -> Result<(), LibraryError> {
        lib.unpack(self.ctx.config.libraries.native_extension(), true)?;
        lib.inventory(
            accepted.iter().map(|l| &**l),
            self.builtin.as_ref(),
            self.ctx.class_extension(),
        )?;

        let others: Vec<PathBuf> = accepted
            .iter()
            .flat_map(|l| l.code_archives().iter().cloned())
            .collect();
        let classpath = self.ctx.classpath_with(&others);
        lib.translate(&self.ctx.translate_stage(), &classpath)?;

        self.stage_native(lib)?;
        lib.accept()
    }

    fn stage_native(&self, lib: &mut ExternalLibrary) -> Result<(), LibraryError> {
        let (_, dirs) = self
            .native
            .stage(lib)
            .map_err(|e| LibraryError::io(lib.name(), e))?;
        lib.set_native_search_dirs(dirs);
        Ok(())
    }

    fn write_upload(&self, upload: &Path, bytes: &[u8]) -> Result<()> {
        let mut tmp = tempfile::NamedTempFile::new_in(&self.libraries_dir)
            .with_context(|| format!("failed to create temp file in {}", self.libraries_dir.display()))?;
        tmp.write_all(bytes)
            .with_context(|| format!("failed to write {}", upload.display()))?;
        tmp.as_file().sync_all()?;
        tmp.persist_noclobber(upload)
            .with_context(|| format!("failed to store upload {}", upload.display()))?;
        Ok(())
    }

    fn roll_back(&self, upload: &Path, subdir: Option<&Path>) {
        if let Some(subdir) = subdir {
            if let Err(e) = remove_dir_all_if_exists(subdir) {
                tracing::error!("failed to roll back {}: {:#}", subdir.display(), e);
            }
        }
        if let Err(e) = remove_path(upload) {
            tracing::error!("failed to roll back {}: {:#}", upload.display(), e);
        }
    }

    /// Delete a library's upload and private directory, then rebuild the graph.
    ///
    /// Always a full rebuild: native code mapped by a live loader cannot be
    /// unmapped.
    pub fn delete(&self, name: &str) -> Result<(), LibraryError> {
        let kind = ExternalLibrary::validate_name(name)?;
        let mut live = self.live.lock();

        let upload = self.libraries_dir.join(name);
        if !upload.is_file() {
            return Err(LibraryError::NotFound {
                name: name.to_string(),
            });
        }
        let subdir = self
            .libraries_dir
            .join(ExternalLibrary::subdir_name(name, kind));

        // Leave the live set before touching disk.
        live.libraries.retain(|l| l.name() != name);
        let generation = live.graph.generation() + 1;
        live.graph = Arc::new(LoaderGraph::rebuilt(
            generation,
            live.libraries.iter().map(|l| &**l),
        ));
        let graph = live.graph.clone();

        let removed = remove_path(&upload)
            .and_then(|()| remove_dir_all_if_exists(&subdir))
            .and_then(|()| self.prune_native(&live.libraries))
            .map_err(|e| LibraryError::io(name, e));
        drop(live);
        self.notify(&graph);
        removed?;

        tracing::info!("library {} deleted", name);
        Ok(())
    }

    fn prune_native(&self, libraries: &[Arc<ExternalLibrary>]) -> Result<()> {
        let keep: HashSet<PathBuf> = libraries
            .iter()
            .flat_map(|lib| self.native.staged_paths(lib))
            .map(|(_, dest)| dest)
            .collect();
        self.native.prune(&keep)?;
        Ok(())
    }

    /// The current code-loading graph of external libraries.
    pub fn graph(&self) -> Arc<LoaderGraph> {
        self.live.lock().graph.clone()
    }

    /// Active libraries in upload order.
    pub fn libraries(&self) -> Vec<Arc<ExternalLibrary>> {
        self.live.lock().libraries.clone()
    }

    /// Code archives of active libraries, for the build classpath.
    pub fn code_archives(&self) -> Vec<PathBuf> {
        self.live
            .lock()
            .libraries
            .iter()
            .flat_map(|l| l.code_archives().iter().cloned())
            .collect()
    }

    /// Every upload on disk, active or not, sorted by name.
    pub fn library_names(&self) -> Result<Vec<String>> {
        Ok(files_in(&self.libraries_dir)?
            .into_iter()
            .filter_map(|p| p.file_name().and_then(|n| n.to_str()).map(str::to_string))
            .filter(|n| ExternalLibrary::validate_name(n).is_ok())
            .collect())
    }

    /// Whether `name` currently contributes code.
    pub fn is_active(&self, name: &str) -> bool {
        self.live.lock().libraries.iter().any(|l| l.name() == name)
    }

    /// The active library that provides `class_name`.
    pub fn owner_of(&self, class_name: &str) -> Option<String> {
        self.live
            .lock()
            .libraries
            .iter()
            .find(|l| l.contains_class(class_name))
            .map(|l| l.name().to_string())
    }

    /// Register a callback run after every change to the library set.
    pub fn on_change(&self, listener: impl Fn(&LoaderGraph) + Send + Sync + 'static) {
        self.listeners.lock().push(Box::new(listener));
    }

    fn notify(&self, graph: &LoaderGraph) {
        for listener in self.listeners.lock().iter() {
            listener(graph);
        }
    }

    fn uploads_by_age(&self) -> Result<Vec<PathBuf>> {
        let mut uploads: Vec<(std::time::SystemTime, PathBuf)> = files_in(&self.libraries_dir)?
            .into_iter()
            .filter(|p| {
                p.file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| ExternalLibrary::validate_name(n).is_ok())
            })
            .map(|p| {
                let mtime = std::fs::metadata(&p)
                    .and_then(|m| m.modified())
                    .unwrap_or(std::time::UNIX_EPOCH);
                (mtime, p)
            })
            .collect();
        uploads.sort();
        Ok(uploads.into_iter().map(|(_, p)| p).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::layout::Layout;
    use crate::test_support::fixtures::{jar_bytes, write_aar};
    use crate::test_support::{FakeCompiler, FakeTranslator};
    use crate::util::config::Config;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    fn manager_with(tmp: &TempDir, translator: FakeTranslator, builtin: &[&str]) -> LibraryManager {
        let layout = Layout::new(tmp.path());
        layout.ensure().unwrap();
        let ctx = BuildContext::new(layout, Config::default())
            .with_tools(Arc::new(FakeCompiler::new()), Arc::new(translator));
        LibraryManager::with_namespace(ctx, Arc::new(ArchiveNamespace::from_names(builtin.iter().copied())))
    }

    fn manager(tmp: &TempDir) -> LibraryManager {
        manager_with(tmp, FakeTranslator::new(), &[])
    }

    #[test]
    fn test_upload_accepts_library() {
        let tmp = TempDir::new().unwrap();
        let mgr = manager(&tmp);

        let lib = mgr.upload(&jar_bytes(&["com/x/Foo.class"]), "foo.jar").unwrap();

        assert_eq!(lib.state(), LibraryState::Accepted);
        assert!(mgr.is_active("foo.jar"));
        assert_eq!(mgr.owner_of("com.x.Foo"), Some("foo.jar".to_string()));
        assert!(lib.manifest_path().is_file());
        assert_eq!(mgr.graph().links().len(), 1);
        assert!(mgr.graph().locate("com.x.Foo").is_some());
    }

    #[test]
    fn test_collision_rejects_second_upload() {
        let tmp = TempDir::new().unwrap();
        let mgr = manager(&tmp);
        mgr.upload(&jar_bytes(&["com/x/Foo.class"]), "foo.jar").unwrap();

        let err = mgr
            .upload(&jar_bytes(&["com/x/Foo.class"]), "bar.jar")
            .unwrap_err();

        assert!(matches!(err, LibraryError::LibraryCollision { .. }));
        assert!(err.to_string().contains("com.x.Foo"));
        assert!(mgr.is_active("foo.jar"));
        assert!(!mgr.is_active("bar.jar"));
        assert!(!mgr.libraries_dir().join("bar.jar").exists());
        assert!(!mgr.libraries_dir().join("bar_jar").exists());
        assert_eq!(mgr.library_names().unwrap(), vec!["foo.jar".to_string()]);
    }

    #[test]
    fn test_collision_order_decides_rejection() {
        for (first, second) in [("a.jar", "b.jar"), ("b.jar", "a.jar")] {
            let tmp = TempDir::new().unwrap();
            let mgr = manager(&tmp);
            let bytes = jar_bytes(&["com/x/X.class"]);

            assert!(mgr.upload(&bytes, first).is_ok());
            assert!(mgr.upload(&bytes, second).is_err());
            assert!(mgr.is_active(first));
            assert!(!mgr.is_active(second));
        }
    }

    #[test]
    fn test_application_collision() {
        let tmp = TempDir::new().unwrap();
        let mgr = manager_with(&tmp, FakeTranslator::new(), &["org.app.Main"]);

        let err = mgr
            .upload(&jar_bytes(&["org/app/Main.class"]), "dup.jar")
            .unwrap_err();
        assert!(matches!(err, LibraryError::ApplicationCollision { .. }));
        assert!(mgr.library_names().unwrap().is_empty());
    }

    #[test]
    fn test_translation_failure_rolls_back() {
        let tmp = TempDir::new().unwrap();
        let mgr = manager_with(&tmp, FakeTranslator::new().fail_with("bad bytecode"), &[]);

        let err = mgr.upload(&jar_bytes(&["com/x/Foo.class"]), "foo.jar").unwrap_err();
        assert!(matches!(err, LibraryError::TranslationFailed { .. }));
        assert!(mgr.library_names().unwrap().is_empty());
        assert!(mgr.graph().is_empty());
    }

    #[test]
    fn test_translator_without_output_rejects_library() {
        let tmp = TempDir::new().unwrap();
        let mgr = manager_with(&tmp, FakeTranslator::new().silent(), &[]);

        let err = mgr.upload(&jar_bytes(&["com/x/Foo.class"]), "foo.jar").unwrap_err();

        assert!(matches!(err, LibraryError::TranslationFailed { .. }));
        assert!(!mgr.is_active("foo.jar"));
        assert!(mgr.graph().locate("com.x.Foo").is_none());
        assert!(mgr.library_names().unwrap().is_empty());
    }

    #[test]
    fn test_extension_case_does_not_share_private_dir() {
        let tmp = TempDir::new().unwrap();
        let mgr = manager(&tmp);
        let foo = mgr.upload(&jar_bytes(&["com/x/Foo.class"]), "foo.jar").unwrap();

        assert!(matches!(
            mgr.upload(&jar_bytes(&["com/x/Foo.class"]), "foo.JAR"),
            Err(LibraryError::Unsupported { .. })
        ));
        assert!(matches!(
            mgr.upload(&jar_bytes(&["com/y/Bar.class"]), "foo.Jar"),
            Err(LibraryError::Unsupported { .. })
        ));
        assert!(matches!(
            mgr.delete("foo.JAR"),
            Err(LibraryError::Unsupported { .. })
        ));

        assert!(mgr.is_active("foo.jar"));
        assert!(foo.manifest_path().is_file());
        assert!(foo.loadable_files().iter().all(|f| f.is_file()));
        assert!(!foo.loadable_files().is_empty());
        assert_eq!(mgr.library_names().unwrap(), vec!["foo.jar".to_string()]);
    }

    #[test]
    fn test_invalid_uploads() {
        let tmp = TempDir::new().unwrap();
        let mgr = manager(&tmp);
        assert!(matches!(
            mgr.upload(b"x", "notes.txt"),
            Err(LibraryError::Unsupported { .. })
        ));
        assert!(matches!(
            mgr.upload(b"x", "../evil.jar"),
            Err(LibraryError::InvalidName { .. })
        ));
        assert!(matches!(
            mgr.upload(b"not a zip", "broken.jar"),
            Err(LibraryError::Unreadable { .. })
        ));
        assert!(mgr.library_names().unwrap().is_empty());

        mgr.upload(&jar_bytes(&["com/x/Foo.class"]), "foo.jar").unwrap();
        assert!(matches!(
            mgr.upload(&jar_bytes(&["com/y/Y.class"]), "foo.jar"),
            Err(LibraryError::Duplicate { .. })
        ));
    }

    #[test]
    fn test_delete_rebuilds_graph() {
        let tmp = TempDir::new().unwrap();
        let mgr = manager(&tmp);
        mgr.upload(&jar_bytes(&["com/x/Foo.class"]), "foo.jar").unwrap();
        mgr.upload(&jar_bytes(&["com/y/Bar.class"]), "bar.jar").unwrap();
        assert_eq!(mgr.graph().links().len(), 2);
        let before = mgr.graph().generation();

        mgr.delete("foo.jar").unwrap();

        let graph = mgr.graph();
        assert_eq!(graph.links().len(), 1);
        assert!(graph.generation() > before);
        assert!(graph.locate("com.x.Foo").is_none());
        assert!(graph.locate("com.y.Bar").is_some());
        assert!(!mgr.libraries_dir().join("foo_jar").exists());
        assert!(matches!(
            mgr.delete("foo.jar"),
            Err(LibraryError::NotFound { .. })
        ));
    }

    #[test]
    fn test_failed_delete_still_deactivates() {
        let tmp = TempDir::new().unwrap();
        let mgr = manager(&tmp);
        mgr.upload(&jar_bytes(&["com/x/Foo.class"]), "foo.jar").unwrap();
        // a plain file where the private directory should be makes removal fail
        let subdir = mgr.libraries_dir().join("foo_jar");
        std::fs::remove_dir_all(&subdir).unwrap();
        std::fs::write(&subdir, "not a directory").unwrap();

        let err = mgr.delete("foo.jar").unwrap_err();

        assert!(matches!(err, LibraryError::Io { .. }));
        assert!(!mgr.is_active("foo.jar"));
        assert!(mgr.graph().locate("com.x.Foo").is_none());
        assert!(mgr.libraries().is_empty());
    }

    #[test]
    fn test_listeners_run_on_change() {
        let tmp = TempDir::new().unwrap();
        let mgr = manager(&tmp);
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = seen.clone();
        mgr.on_change(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        mgr.upload(&jar_bytes(&["com/x/Foo.class"]), "foo.jar").unwrap();
        mgr.delete("foo.jar").unwrap();

        assert_eq!(seen.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_restart_readmits_without_translating() {
        let tmp = TempDir::new().unwrap();
        {
            let mgr = manager(&tmp);
            mgr.upload(&jar_bytes(&["com/x/Foo.class"]), "foo.jar").unwrap();
        }

        let translator = FakeTranslator::new();
        let calls = translator.call_counter();
        let mgr = manager_with(&tmp, translator, &[]);
        let report = mgr.start().unwrap();

        assert_eq!(report.accepted, vec!["foo.jar".to_string()]);
        assert!(mgr.is_active("foo.jar"));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(mgr.graph().links().len(), 1);
    }

    #[test]
    fn test_restart_drops_library_with_missing_translation() {
        let tmp = TempDir::new().unwrap();
        let loadable = {
            let mgr = manager(&tmp);
            let lib = mgr.upload(&jar_bytes(&["com/x/Foo.class"]), "foo.jar").unwrap();
            lib.loadable_files().to_vec()
        };
        for file in &loadable {
            std::fs::remove_file(file).unwrap();
        }

        let mgr = manager(&tmp);
        let report = mgr.start().unwrap();

        assert!(report.accepted.is_empty());
        assert_eq!(report.dropped.len(), 1);
        assert!(matches!(report.dropped[0].1, LibraryError::Incomplete { .. }));
        assert!(!mgr.is_active("foo.jar"));
        assert!(mgr.graph().is_empty());
        assert_eq!(mgr.library_names().unwrap(), vec!["foo.jar".to_string()]);
    }

    #[test]
    fn test_bundle_native_code_is_staged_and_pruned() {
        let tmp = TempDir::new().unwrap();
        let mgr = manager(&tmp);
        let aar = tmp.path().join("vision.aar");
        write_aar(&aar, &["com/v/Camera.class"], &["jni/arm64-v8a/libvision.so"]);

        let lib = mgr
            .upload(&std::fs::read(&aar).unwrap(), "vision.aar")
            .unwrap();
        assert_eq!(lib.native_search_dirs().len(), 1);
        let staged = tmp.path().join("native/vision_aar/jni/arm64-v8a/libvision.so");
        assert!(staged.is_file());
        assert_eq!(mgr.graph().native_search_dirs(), lib.native_search_dirs());

        mgr.delete("vision.aar").unwrap();
        assert!(!staged.exists());
    }
}
