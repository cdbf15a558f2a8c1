//! In-process tools for unit tests.
//!
//! `FakeCompiler` and `FakeTranslator` implement the tool traits without
//! spawning anything, so pipeline and library tests run hermetically.
//!
//! # Example
//!
//! ```rust,ignore
//! use berth::test_support::{FakeCompiler, FakeTranslator};
//!
//! let ctx = BuildContext::new(layout, Config::default())
//!     .with_tools(Arc::new(FakeCompiler::new()), Arc::new(FakeTranslator::new()));
//! ```

pub mod fixtures;

use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use parking_lot::Mutex;
use zip::write::SimpleFileOptions;
use zip::ZipWriter;

use crate::builder::toolchain::{
    parse_diagnostics, CompileRequest, Compiler, ToolOutput, TranslateRequest, Translator,
};
use crate::util::diagnostic::Diagnostic;

/// Source text that makes `FakeCompiler` report a compile error.
pub const SYNTAX_ERROR_MARKER: &str = "syntax error";

/// Tracks how many calls run at once.
#[derive(Debug, Clone, Default)]
pub struct ConcurrencyProbe {
    active: Arc<AtomicUsize>,
    max: Arc<AtomicUsize>,
}

impl ConcurrencyProbe {
    fn enter(&self) -> ProbeGuard {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max.fetch_max(now, Ordering::SeqCst);
        ProbeGuard(self.active.clone())
    }

    pub fn max_concurrent(&self) -> usize {
        self.max.load(Ordering::SeqCst)
    }
}

struct ProbeGuard(Arc<AtomicUsize>);

impl Drop for ProbeGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

fn tool_failure(message: &str) -> ToolOutput {
    let mut diagnostics = parse_diagnostics(message);
    if !diagnostics.iter().any(Diagnostic::is_error) {
        diagnostics = vec![Diagnostic::error(message)];
    }
    ToolOutput {
        success: false,
        diagnostics,
        log: message.to_string(),
    }
}

/// Compiler that writes one class file per source.
///
/// The class lands at `<output>/<package path>/<file stem>.class`, taking
/// the package from a leading `package a.b;` declaration. A source that
/// contains [`SYNTAX_ERROR_MARKER`] fails the compile.
#[derive(Debug, Clone, Default)]
pub struct FakeCompiler {
    failure: Option<String>,
    panics: bool,
    delay: Option<Duration>,
    calls: Arc<AtomicUsize>,
    probe: ConcurrencyProbe,
}

impl FakeCompiler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail every compile with `message`.
    pub fn fail_with(mut self, message: impl Into<String>) -> Self {
        self.failure = Some(message.into());
        self
    }

    pub fn panicking(mut self) -> Self {
        self.panics = true;
        self
    }

    /// Sleep this long inside every compile.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn concurrency_probe(&self) -> ConcurrencyProbe {
        self.probe.clone()
    }
}

fn package_of(text: &str) -> Option<String> {
    let rest = text.trim_start().strip_prefix("package ")?;
    let name = rest.split(';').next()?.trim();
    (!name.is_empty()).then(|| name.to_string())
}

impl Compiler for FakeCompiler {
    fn name(&self) -> &str {
        "fake-javac"
    }

    fn compile(&self, request: &CompileRequest) -> Result<ToolOutput> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let _active = self.probe.enter();
        if let Some(delay) = self.delay {
            std::thread::sleep(delay);
        }
        if self.panics {
            panic!("compiler exploded");
        }
        if let Some(message) = &self.failure {
            return Ok(tool_failure(message));
        }

        let mut log = String::new();
        for source in &request.sources {
            let text = std::fs::read_to_string(source)
                .with_context(|| format!("failed to read {}", source.display()))?;
            if text.contains(SYNTAX_ERROR_MARKER) {
                log.push_str(&format!("{}:1: error: {}\n", source.display(), SYNTAX_ERROR_MARKER));
            }
        }
        if !log.is_empty() {
            return Ok(tool_failure(&log));
        }

        for source in &request.sources {
            let text = std::fs::read_to_string(source)?;
            let stem = source
                .file_stem()
                .and_then(|s| s.to_str())
                .context("source without a file name")?;
            let mut dir = request.output_dir.clone();
            if let Some(package) = package_of(&text) {
                dir.extend(package.split('.'));
            }
            std::fs::create_dir_all(&dir)?;
            std::fs::write(dir.join(format!("{}.class", stem)), [0xCA, 0xFE, 0xBA, 0xBE])?;
        }
        Ok(ToolOutput::success())
    }
}

/// Translator that writes `classes.dex` into the output directory.
#[derive(Debug, Clone, Default)]
pub struct FakeTranslator {
    failure: Option<String>,
    panics: bool,
    zip_output: bool,
    silent: bool,
    calls: Arc<AtomicUsize>,
    last_classpath: Arc<Mutex<Vec<PathBuf>>>,
}

impl FakeTranslator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_with(mut self, message: impl Into<String>) -> Self {
        self.failure = Some(message.into());
        self
    }

    pub fn panicking(mut self) -> Self {
        self.panics = true;
        self
    }

    /// Produce `output.zip` holding `classes.dex` instead of a bare file.
    pub fn zip_output(mut self) -> Self {
        self.zip_output = true;
        self
    }

    /// Report success without writing any output.
    pub fn silent(mut self) -> Self {
        self.silent = true;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Shared call counter, usable after the translator was moved.
    pub fn call_counter(&self) -> Arc<AtomicUsize> {
        self.calls.clone()
    }

    pub fn last_classpath(&self) -> Vec<PathBuf> {
        self.last_classpath.lock().clone()
    }
}

impl Translator for FakeTranslator {
    fn name(&self) -> &str {
        "fake-d8"
    }

    fn translate(&self, request: &TranslateRequest) -> Result<ToolOutput> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_classpath.lock() = request.classpath.clone();
        if self.panics {
            panic!("translator exploded");
        }
        if let Some(message) = &self.failure {
            return Ok(tool_failure(message));
        }
        if self.silent {
            return Ok(ToolOutput::success());
        }

        let dex = b"dex\n035\0".to_vec();
        if self.zip_output {
            let file = std::fs::File::create(request.output_dir.join("output.zip"))?;
            let mut zip = ZipWriter::new(file);
            zip.start_file("classes.dex", SimpleFileOptions::default())?;
            zip.write_all(&dex)?;
            zip.finish()?;
        } else {
            std::fs::write(request.output_dir.join("classes.dex"), dex)?;
        }
        Ok(ToolOutput::success())
    }
}
