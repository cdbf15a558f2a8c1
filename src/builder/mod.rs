//! Build pipeline.
//!
//! Compiles the user source tree, consolidates the classes into one archive,
//! translates it to the loadable format and publishes the result as a new
//! version. One worker thread runs the pipeline; triggers coalesce.

pub mod compile;
pub mod consolidate;
pub mod context;
pub mod controller;
pub mod events;
pub mod executor;
pub mod lock;
pub mod toolchain;
pub mod translate;
pub mod versions;
pub mod watch;

pub use context::BuildContext;
pub use controller::BuildController;
pub use events::BuildEvent;
pub use executor::{BuildExecutor, BuildReport};
pub use lock::{BuildLock, LockError};
pub use toolchain::{
    CommandSpec, CompileRequest, Compiler, ExternalCompiler, ExternalTranslator, ToolOutput,
    TranslateRequest, Translator,
};
pub use versions::VersionStore;
pub use watch::{request_build, RequestWatcher};

/// Run `f` between entry and exit trace lines for `stage`.
pub(crate) fn trace_stage<T>(stage: &str, f: impl FnOnce() -> T) -> T {
    tracing::debug!("{}...", stage);
    let result = f();
    tracing::debug!("...{}", stage);
    result
}
