//! Compilation stage.

use std::path::{Path, PathBuf};

use crate::builder::toolchain::{guarded, CompileRequest, Compiler, ToolOutput};
use crate::util::diagnostic::Diagnostic;
use crate::util::durable;
use crate::util::fs::{ensure_dir, files_under};

/// Result of compiling the source tree.
#[derive(Debug, Clone)]
pub struct CompileOutcome {
    pub success: bool,
    pub diagnostics: Vec<Diagnostic>,
    /// Raw compiler output
    pub log: String,
    /// Class files produced, sorted
    pub class_files: Vec<PathBuf>,
}

impl CompileOutcome {
    fn from_output(output: ToolOutput) -> Self {
        CompileOutcome {
            success: output.success,
            diagnostics: output.diagnostics,
            log: output.log,
            class_files: Vec::new(),
        }
    }
}

/// Runs the compiler over a source tree.
pub struct CompileStage<'a> {
    compiler: &'a dyn Compiler,
    source_extension: String,
    class_extension: String,
}

impl<'a> CompileStage<'a> {
    pub fn new(compiler: &'a dyn Compiler) -> Self {
        CompileStage {
            compiler,
            source_extension: "java".to_string(),
            class_extension: "class".to_string(),
        }
    }

    pub fn source_extension(mut self, ext: impl Into<String>) -> Self {
        self.source_extension = ext.into();
        self
    }

    pub fn class_extension(mut self, ext: impl Into<String>) -> Self {
        self.class_extension = ext.into();
        self
    }

    /// Compile every source file under `src_dir` into `classes_dir`.
    ///
    /// Never fails: a compiler that errors or panics yields `success = false`
    /// with a synthesized diagnostic.
    pub fn run(
        &self,
        src_dir: &Path,
        classes_dir: &Path,
        gensrc_dir: &Path,
        classpath: &[PathBuf],
    ) -> CompileOutcome {
        // Never let the compiler observe a half-written source file.
        match durable::commit_all(src_dir) {
            Ok(0) => {}
            Ok(n) => tracing::info!("recovered {} interrupted source write(s)", n),
            Err(e) => {
                return CompileOutcome::from_output(ToolOutput::failure(Diagnostic::error(
                    format!("failed to recover source tree: {:#}", e),
                )))
            }
        }

        for dir in [classes_dir, gensrc_dir] {
            if let Err(e) = ensure_dir(dir) {
                return CompileOutcome::from_output(ToolOutput::failure(Diagnostic::error(
                    format!("{:#}", e),
                )));
            }
        }

        let sources = files_under(src_dir, &self.source_extension);
        if sources.is_empty() {
            tracing::info!("no .{} sources under {}", self.source_extension, src_dir.display());
            return CompileOutcome::from_output(ToolOutput::success());
        }
        tracing::debug!("compiling {} source file(s)", sources.len());

        let request = CompileRequest {
            sources,
            classpath: classpath.to_vec(),
            output_dir: classes_dir.to_path_buf(),
            gensrc_dir: gensrc_dir.to_path_buf(),
        };
        let output = guarded(self.compiler.name(), || self.compiler.compile(&request));

        let mut outcome = CompileOutcome::from_output(output);
        if outcome.success {
            outcome.class_files = files_under(classes_dir, &self.class_extension);
        }
        outcome
    }
}
