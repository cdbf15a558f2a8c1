//! The long-lived build service.
//!
//! Owns the build controller and the library manager for one layout, and is
//! what a host embeds: it queues builds, answers status queries from
//! published state, ingests libraries and hands out the current code loader.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::{Arc, Weak};
use std::time::Duration;

use anyhow::{Context, Result};
use parking_lot::Mutex;

use crate::builder::context::BuildContext;
use crate::builder::controller::BuildController;
use crate::builder::executor::{BuildExecutor, BuildReport};
use crate::builder::versions::VersionStore;
use crate::builder::watch::RequestWatcher;
use crate::core::layout::Layout;
use crate::core::status::BuildStatus;
use crate::libraries::inventory::class_names_in_archive;
use crate::libraries::{ExternalLibrary, LibraryError, LibraryManager, LoaderGraph, LoaderLink};
use crate::util::durable;
use crate::util::fs::files_under;

/// Build service for one layout.
pub struct Service {
    ctx: BuildContext,
    versions: VersionStore,
    libraries: Arc<LibraryManager>,
    // Declared before the controller so the watcher stops first.
    watcher: Mutex<Option<RequestWatcher>>,
    controller: Arc<BuildController>,
}

impl Service {
    /// Recover the layout, re-admit libraries and start the build worker.
    pub fn start(ctx: BuildContext) -> Result<Self> {
        let libraries = Arc::new(LibraryManager::new(ctx.clone())?);
        Self::start_with(ctx, libraries)
    }

    /// Like [`Service::start`] with a prepared library manager.
    pub fn start_with(ctx: BuildContext, libraries: Arc<LibraryManager>) -> Result<Self> {
        recover_layout(&ctx.layout)?;
        let report = libraries.start()?;
        tracing::info!(
            "{} external librar{} active, {} dropped",
            report.accepted.len(),
            if report.accepted.len() == 1 { "y" } else { "ies" },
            report.dropped.len()
        );

        let executor = BuildExecutor::new(ctx.clone(), libraries.clone());
        let controller = Arc::new(BuildController::start(executor)?);
        Ok(Service {
            versions: VersionStore::new(&ctx.layout),
            ctx,
            libraries,
            watcher: Mutex::new(None),
            controller,
        })
    }

    pub fn context(&self) -> &BuildContext {
        &self.ctx
    }

    /// Queue a build and return immediately.
    pub fn trigger_build(&self) {
        self.controller.trigger();
    }

    pub fn build_status(&self) -> BuildStatus {
        self.controller.status()
    }

    pub fn last_report(&self) -> Option<BuildReport> {
        self.controller.last_report()
    }

    pub fn completed_builds(&self) -> u64 {
        self.controller.completed_builds()
    }

    /// Block until no build is queued or running.
    pub fn wait_for_idle(&self, timeout: Duration) -> bool {
        self.controller.wait_for_idle(timeout)
    }

    pub fn published_version(&self) -> Option<PathBuf> {
        self.versions.current()
    }

    /// Loadable files of the published version.
    pub fn published_loadable_files(&self) -> BTreeSet<PathBuf> {
        self.versions
            .current()
            .map(|v| files_under(&v, self.ctx.loadable_extension()))
            .unwrap_or_default()
            .into_iter()
            .collect()
    }

    /// Class names in the published version's consolidated archive.
    pub fn published_class_names(&self) -> Result<BTreeSet<String>> {
        let Some(version) = self.versions.current() else {
            return Ok(BTreeSet::new());
        };
        let archive = version.join(self.ctx.archive_name());
        let names = class_names_in_archive(&archive, self.ctx.class_extension())?;
        Ok(names.into_iter().collect())
    }

    pub fn upload_library(
        &self,
        bytes: &[u8],
        filename: &str,
    ) -> Result<Arc<ExternalLibrary>, LibraryError> {
        self.libraries.upload(bytes, filename)
    }

    pub fn delete_library(&self, filename: &str) -> Result<(), LibraryError> {
        self.libraries.delete(filename)
    }

    pub fn libraries(&self) -> &Arc<LibraryManager> {
        &self.libraries
    }

    /// The loader for user code: the library graph plus one link over the
    /// published loadable files.
    pub fn code_loader(&self) -> Result<Arc<LoaderGraph>> {
        let graph = self.libraries.graph();
        let files = self.published_loadable_files();
        if files.is_empty() {
            return Ok(graph);
        }
        let link = LoaderLink {
            classpath: files.into_iter().collect(),
            native_search_dirs: Vec::new(),
            libraries: Vec::new(),
            class_names: self.published_class_names()?,
        };
        Ok(Arc::new(graph.extended(link)))
    }

    /// Start turning writes of the request sentinel into builds.
    pub fn watch_requests(&self) -> Result<()> {
        let mut slot = self.watcher.lock();
        if slot.is_some() {
            return Ok(());
        }
        let controller: Weak<BuildController> = Arc::downgrade(&self.controller);
        let watcher = RequestWatcher::spawn(&self.ctx.layout, move || {
            if let Some(controller) = controller.upgrade() {
                tracing::debug!("build requested");
                controller.trigger();
            }
        })?;
        *slot = Some(watcher);
        Ok(())
    }
}

/// Finish every interrupted durable write under the layout.
pub fn recover_layout(layout: &Layout) -> Result<usize> {
    layout.ensure()?;
    let mut recovered = 0;
    for dir in [
        layout.status_dir(),
        layout.control_dir(),
        layout.src_dir(),
        layout.jars_dir(),
        layout.external_libraries_dir(),
    ] {
        recovered += durable::commit_all(&dir)
            .with_context(|| format!("failed to recover {}", dir.display()))?;
    }
    if recovered > 0 {
        tracing::info!("recovered {} interrupted write(s)", recovered);
    }
    Ok(recovered)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::watch::request_build;
    use crate::libraries::ArchiveNamespace;
    use crate::test_support::fixtures::jar_bytes;
    use crate::test_support::{FakeCompiler, FakeTranslator};
    use crate::util::config::Config;
    use tempfile::TempDir;

    const WAIT: Duration = Duration::from_secs(10);

    fn service(tmp: &TempDir) -> Service {
        let layout = Layout::new(tmp.path());
        layout.ensure().unwrap();
        let ctx = BuildContext::new(layout, Config::default())
            .with_tools(Arc::new(FakeCompiler::new()), Arc::new(FakeTranslator::new()));
        let libraries = Arc::new(LibraryManager::with_namespace(
            ctx.clone(),
            Arc::new(ArchiveNamespace::empty()),
        ));
        Service::start_with(ctx, libraries).unwrap()
    }

    fn write_source(tmp: &TempDir, name: &str, text: &str) {
        let dir = tmp.path().join("src/org");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join(name), text).unwrap();
    }

    #[test]
    fn test_first_build_publishes_loadable_files() {
        let tmp = TempDir::new().unwrap();
        write_source(&tmp, "Example.java", "package org; class Example {}");
        let svc = service(&tmp);
        assert_eq!(svc.build_status(), BuildStatus::NotStarted);
        assert!(svc.published_version().is_none());

        svc.trigger_build();
        assert!(svc.wait_for_idle(WAIT));

        assert_eq!(svc.build_status(), BuildStatus::Successful);
        assert!(svc.published_version().is_some());
        assert!(!svc.published_loadable_files().is_empty());
        assert!(svc.published_class_names().unwrap().contains("org.Example"));
    }

    #[test]
    fn test_syntax_error_leaves_published_version() {
        let tmp = TempDir::new().unwrap();
        write_source(&tmp, "Example.java", "package org; class Example {}");
        let svc = service(&tmp);
        svc.trigger_build();
        assert!(svc.wait_for_idle(WAIT));
        let before = svc.published_version();

        write_source(&tmp, "Broken.java", "package org; syntax error");
        svc.trigger_build();
        assert!(svc.wait_for_idle(WAIT));

        assert_eq!(svc.build_status(), BuildStatus::Failed);
        assert_eq!(svc.published_version(), before);
    }

    #[test]
    fn test_code_loader_layers_user_code_over_libraries() {
        let tmp = TempDir::new().unwrap();
        write_source(&tmp, "Example.java", "package org; class Example {}");
        let svc = service(&tmp);
        svc.upload_library(&jar_bytes(&["com/x/Foo.class"]), "foo.jar")
            .unwrap();
        svc.trigger_build();
        assert!(svc.wait_for_idle(WAIT));

        let loader = svc.code_loader().unwrap();

        assert_eq!(loader.links().len(), 2);
        assert_eq!(loader.locate("com.x.Foo").unwrap().libraries, vec!["foo.jar"]);
        assert!(loader.locate("org.Example").unwrap().libraries.is_empty());
    }

    #[test]
    fn test_collision_scenario() {
        let tmp = TempDir::new().unwrap();
        let svc = service(&tmp);

        svc.upload_library(&jar_bytes(&["com/x/Foo.class"]), "foo.jar")
            .unwrap();
        let err = svc
            .upload_library(&jar_bytes(&["com/x/Foo.class"]), "bar.jar")
            .unwrap_err();

        assert!(err.is_collision());
        assert!(svc.libraries().is_active("foo.jar"));
        assert!(svc.code_loader().unwrap().locate("com.x.Foo").is_some());
    }

    #[test]
    fn test_sentinel_write_triggers_build() {
        let tmp = TempDir::new().unwrap();
        write_source(&tmp, "Example.java", "package org; class Example {}");
        let svc = service(&tmp);
        svc.watch_requests().unwrap();

        request_build(&svc.context().layout).unwrap();

        let deadline = std::time::Instant::now() + WAIT;
        while svc.completed_builds() == 0 && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(20));
        }
        assert!(svc.wait_for_idle(WAIT));
        assert_eq!(svc.build_status(), BuildStatus::Successful);
    }

    #[test]
    fn test_restart_recovers_interrupted_status_write() {
        let tmp = TempDir::new().unwrap();
        let layout = Layout::new(tmp.path());
        layout.ensure().unwrap();
        let marker = layout.build_complete_file();
        std::fs::write(&marker, "garbage").unwrap();
        std::fs::write(durable::staging_path(&marker), "2024-01-01T00:00:00.000Z\nBuild complete\n")
            .unwrap();

        assert_eq!(recover_layout(&layout).unwrap(), 1);
        assert!(std::fs::read_to_string(&marker).unwrap().starts_with("2024"));
    }
}
