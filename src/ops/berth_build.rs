//! Implementation of `berth build` and `berth clean`.
//!
//! A one-shot build runs the same pipeline as the long-lived service, on the
//! calling thread, under the same build lock.

use std::sync::Arc;

use anyhow::{bail, Result};

use crate::builder::context::BuildContext;
use crate::builder::events::BuildEvent;
use crate::builder::executor::{BuildExecutor, BuildReport};
use crate::builder::lock::BuildLock;
use crate::builder::versions::VersionStore;
use crate::core::status::StatusCell;
use crate::libraries::LibraryManager;
use crate::util::diagnostic::suggestions;
use crate::util::fs::remove_dir_all_if_exists;

type EventSink = Box<dyn Fn(&BuildEvent) + Send + Sync>;

/// Options for a one-shot build.
#[derive(Default)]
pub struct BuildOptions {
    /// Receives build events as they happen
    pub on_event: Option<EventSink>,
}

/// Build once and wait for the outcome.
pub fn build(ctx: BuildContext, opts: BuildOptions) -> Result<BuildReport> {
    if !ctx.layout.exists() {
        bail!(
            "no build layout in {}\n{}",
            ctx.layout.root().display(),
            suggestions::NO_LAYOUT
        );
    }

    let libraries = Arc::new(LibraryManager::new(ctx.clone())?);
    libraries.start()?;
    build_with(ctx, libraries, opts)
}

/// Build once against an already started library manager.
pub fn build_with(
    ctx: BuildContext,
    libraries: Arc<LibraryManager>,
    opts: BuildOptions,
) -> Result<BuildReport> {
    let mut executor = BuildExecutor::new(ctx, libraries);
    if let Some(sink) = opts.on_event {
        executor = executor.with_events(sink);
    }
    let report = executor.run(&StatusCell::new())?;
    Ok(report)
}

/// What `clean` removed.
#[derive(Debug, Clone, Default)]
pub struct CleanResult {
    pub versions_removed: usize,
}

/// Remove intermediate output and every unpublished version.
///
/// Refuses to run while a build holds the lock.
pub fn clean(ctx: &BuildContext) -> Result<CleanResult> {
    let lock = BuildLock::new(&ctx.layout.build_lock_dir());
    let Some(_guard) = lock.try_acquire()? else {
        bail!("a build is running\n{}", suggestions::LOCK_BUSY);
    };

    remove_dir_all_if_exists(&ctx.layout.classes_dir())?;
    remove_dir_all_if_exists(&ctx.layout.gensrc_dir())?;
    let versions_removed = VersionStore::new(&ctx.layout).reclaim(None)?;
    tracing::info!("removed {} unpublished version(s)", versions_removed);

    Ok(CleanResult { versions_removed })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::layout::Layout;
    use crate::core::status::BuildStatus;
    use crate::libraries::ArchiveNamespace;
    use crate::test_support::{FakeCompiler, FakeTranslator};
    use crate::util::config::Config;
    use tempfile::TempDir;

    fn context(tmp: &TempDir) -> BuildContext {
        let layout = Layout::new(tmp.path());
        layout.ensure().unwrap();
        BuildContext::new(layout, Config::default())
            .with_tools(Arc::new(FakeCompiler::new()), Arc::new(FakeTranslator::new()))
    }

    fn manager(ctx: &BuildContext) -> Arc<LibraryManager> {
        Arc::new(LibraryManager::with_namespace(
            ctx.clone(),
            Arc::new(ArchiveNamespace::empty()),
        ))
    }

    #[test]
    fn test_build_without_layout_fails() {
        let tmp = TempDir::new().unwrap();
        let ctx = BuildContext::new(Layout::new(tmp.path().join("absent")), Config::default());
        let err = build(ctx, BuildOptions::default()).unwrap_err();
        assert!(err.to_string().contains("no build layout"));
    }

    #[test]
    fn test_build_with_reports_status() {
        let tmp = TempDir::new().unwrap();
        let ctx = context(&tmp);
        let src = tmp.path().join("src/org");
        std::fs::create_dir_all(&src).unwrap();
        std::fs::write(src.join("Example.java"), "package org; class Example {}").unwrap();

        let report = build_with(ctx.clone(), manager(&ctx), BuildOptions::default()).unwrap();

        assert_eq!(report.status, BuildStatus::Successful);
        assert!(report.version.is_some());
    }

    #[test]
    fn test_clean_removes_unpublished_versions() {
        let tmp = TempDir::new().unwrap();
        let ctx = context(&tmp);
        let versions = VersionStore::new(&ctx.layout);
        let published = versions.begin_new_version().unwrap();
        versions.publish(&published).unwrap();
        versions.begin_new_version().unwrap();
        std::fs::create_dir_all(ctx.layout.classes_dir().join("org")).unwrap();

        let result = clean(&ctx).unwrap();

        assert_eq!(result.versions_removed, 1);
        assert_eq!(versions.list().unwrap(), vec![published]);
        assert!(!ctx.layout.classes_dir().exists());
    }

    #[test]
    fn test_clean_refuses_while_locked() {
        let tmp = TempDir::new().unwrap();
        let ctx = context(&tmp);
        let lock = BuildLock::new(&ctx.layout.build_lock_dir());
        let _held = lock.try_acquire().unwrap().unwrap();

        assert!(clean(&ctx).is_err());
    }
}
