//! One run of the build pipeline.

use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;

use crate::builder::consolidate::consolidate;
use crate::builder::context::BuildContext;
use crate::builder::events::BuildEvent;
use crate::builder::lock::{BuildLock, LockError};
use crate::builder::toolchain::{error_count, panic_message};
use crate::builder::trace_stage;
use crate::builder::versions::VersionStore;
use crate::core::status::{BuildStatus, StatusCell, StatusMarker};
use crate::libraries::LibraryManager;
use crate::util::diagnostic::{render_all, Diagnostic};
use crate::util::durable;
use crate::util::fs::remove_dir_all_if_exists;

type EventSink = Arc<dyn Fn(&BuildEvent) + Send + Sync>;

/// Outcome of one pipeline run.
#[derive(Debug, Clone)]
pub struct BuildReport {
    pub status: BuildStatus,
    /// Version published by this run
    pub version: Option<PathBuf>,
    pub diagnostics: Vec<Diagnostic>,
    /// Loadable files of the published version
    pub loadable_files: Vec<PathBuf>,
    pub duration: Duration,
}

impl BuildReport {
    pub fn is_success(&self) -> bool {
        self.status == BuildStatus::Successful
    }

    pub fn error_count(&self) -> usize {
        error_count(&self.diagnostics)
    }
}

#[derive(Default)]
struct PipelineRun {
    diagnostics: Vec<Diagnostic>,
    log: String,
    version: Option<PathBuf>,
    loadable_files: Vec<PathBuf>,
}

impl PipelineRun {
    fn absorb(&mut self, diagnostics: &[Diagnostic], log: &str) {
        self.diagnostics.extend_from_slice(diagnostics);
        if !log.trim().is_empty() {
            self.log.push_str(log);
            if !log.ends_with('\n') {
                self.log.push('\n');
            }
        }
    }
}

/// Runs the pipeline under the build lock.
pub struct BuildExecutor {
    ctx: BuildContext,
    versions: VersionStore,
    lock: BuildLock,
    libraries: Arc<LibraryManager>,
    events: Option<EventSink>,
}

impl BuildExecutor {
    pub fn new(ctx: BuildContext, libraries: Arc<LibraryManager>) -> Self {
        BuildExecutor {
            versions: VersionStore::new(&ctx.layout),
            lock: BuildLock::new(&ctx.layout.build_lock_dir()),
            ctx,
            libraries,
            events: None,
        }
    }

    /// Receive machine-readable events as the run progresses.
    pub fn with_events(mut self, sink: impl Fn(&BuildEvent) + Send + Sync + 'static) -> Self {
        self.events = Some(Arc::new(sink));
        self
    }

    pub fn context(&self) -> &BuildContext {
        &self.ctx
    }

    pub fn versions(&self) -> &VersionStore {
        &self.versions
    }

    /// Run the pipeline once.
    ///
    /// Only a lock that can not be acquired in time is an error; the
    /// attempt is then abandoned and `status` is left alone. Every other
    /// failure, including a panic, ends as a `Failed` report.
    pub fn run(&self, status: &StatusCell) -> Result<BuildReport, LockError> {
        let _guard = self.lock.acquire(self.ctx.lock_timeout())?;
        let started = Instant::now();
        let layout = &self.ctx.layout;

        status.set(BuildStatus::Running);
        self.emit(&BuildEvent::started(layout.root()));
        write_marker(&layout.build_started_file(), "Build started");

        let mut run = PipelineRun::default();
        let success = match panic::catch_unwind(AssertUnwindSafe(|| self.pipeline(&mut run))) {
            Ok(Ok(success)) => success,
            Ok(Err(e)) => {
                tracing::error!("build failed: {:#}", e);
                run.diagnostics
                    .push(Diagnostic::error(format!("build failed: {:#}", e)));
                false
            }
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                tracing::error!("build crashed: {}", message);
                run.diagnostics
                    .push(Diagnostic::error(format!("build crashed: {}", message)));
                false
            }
        };

        if let Err(e) = self.versions.reclaim(None) {
            tracing::warn!("failed to reclaim old versions: {:#}", e);
        }
        self.write_log(&run);

        for diag in &run.diagnostics {
            self.emit(&BuildEvent::from_diagnostic(diag));
        }

        let final_status = if success {
            BuildStatus::Successful
        } else {
            BuildStatus::Failed
        };
        let version = if success { run.version.clone() } else { None };
        if let Some(version) = &version {
            write_marker(
                &layout.build_successful_file(),
                &format!("Build successful: {}", version.display()),
            );
            self.emit(&BuildEvent::artifact(version, run.loadable_files.clone()));
        }
        let errors = error_count(&run.diagnostics);
        let message = if success {
            "Build complete".to_string()
        } else {
            format!("Build failed with {} error(s)", errors)
        };
        write_marker(&layout.build_complete_file(), &message);
        status.set(final_status);

        let duration = started.elapsed();
        self.emit(&BuildEvent::finished(success, duration.as_millis() as u64));
        if success {
            tracing::info!("build succeeded in {:.2}s", duration.as_secs_f64());
        } else {
            tracing::info!("build failed with {} error(s)", errors);
        }

        Ok(BuildReport {
            status: final_status,
            version,
            diagnostics: run.diagnostics,
            loadable_files: if success { run.loadable_files } else { Vec::new() },
            duration,
        })
    }

    /// Returns whether the run succeeded; `Err` for failures outside the tools.
    fn pipeline(&self, run: &mut PipelineRun) -> Result<bool> {
        let layout = &self.ctx.layout;
        let src = layout.src_dir();
        let classes = layout.classes_dir();
        let gensrc = layout.gensrc_dir();

        trace_stage("recovery", || -> Result<()> {
            let recovered = durable::commit_all(&src)?;
            if recovered > 0 {
                tracing::info!("recovered {} interrupted source write(s)", recovered);
            }
            remove_dir_all_if_exists(&classes)?;
            remove_dir_all_if_exists(&gensrc)?;
            self.versions.reclaim(None)?;
            Ok(())
        })?;

        let classpath = self.ctx.classpath_with(&self.libraries.code_archives());
        let compiled = trace_stage("compile", || {
            self.ctx
                .compile_stage()
                .run(&src, &classes, &gensrc, &classpath)
        });
        run.absorb(&compiled.diagnostics, &compiled.log);
        if !compiled.success {
            return Ok(false);
        }

        let version = self.versions.begin_new_version()?;
        let archive = version.join(self.ctx.archive_name());
        let class_count = trace_stage("consolidate", || {
            consolidate(&classes, self.ctx.class_extension(), &archive)
        })?;
        durable::write_string(
            &layout.working_dir_file(),
            &format!("{}\n", version.display()),
        )?;
        run.version = Some(version.clone());

        if class_count == 0 {
            tracing::info!("no classes compiled, skipping translation");
        } else {
            let translated = trace_stage("translate", || {
                self.ctx
                    .translate_stage()
                    .run(std::slice::from_ref(&archive), &classpath, &version)
            });
            run.absorb(&translated.diagnostics, &translated.log);
            if !translated.success {
                return Ok(false);
            }
            run.loadable_files = translated.loadable_files;
        }

        trace_stage("publish", || self.versions.publish(&version))?;
        Ok(true)
    }

    fn write_log(&self, run: &PipelineRun) {
        let mut text = render_all(&run.diagnostics);
        if !run.log.is_empty() {
            text.push_str("\n--- tool output ---\n");
            text.push_str(&run.log);
        }
        let path = self.ctx.layout.build_log_file();
        if let Err(e) = durable::write_string(&path, &text) {
            tracing::warn!("failed to write {}: {:#}", path.display(), e);
        }
    }

    fn emit(&self, event: &BuildEvent) {
        if let Some(sink) = &self.events {
            sink(event);
        }
    }
}

fn write_marker(path: &Path, message: &str) {
    if let Err(e) = StatusMarker::now(message).write(path) {
        tracing::warn!("failed to write {}: {:#}", path.display(), e);
    }
}
