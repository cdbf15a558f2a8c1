//! Translation stage.
//!
//! The translator writes into a scoped temporary directory inside the output
//! directory. Whatever it produced with the loadable extension is then moved
//! into the output directory; container output (`.zip`/`.jar`) is unpacked
//! first. The temporary directory is removed on every exit path.

use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use walkdir::WalkDir;

use crate::builder::toolchain::{guarded, ToolOutput, TranslateRequest, Translator};
use crate::util::diagnostic::Diagnostic;
use crate::util::fs::{ensure_dir, files_under, has_extension};

/// Result of a translation.
#[derive(Debug, Clone)]
pub struct TranslateOutcome {
    pub success: bool,
    pub diagnostics: Vec<Diagnostic>,
    /// Raw translator output
    pub log: String,
    /// Loadable files now in the output directory, sorted
    pub loadable_files: Vec<PathBuf>,
}

impl TranslateOutcome {
    fn failed(output: ToolOutput) -> Self {
        TranslateOutcome {
            success: false,
            diagnostics: output.diagnostics,
            log: output.log,
            loadable_files: Vec::new(),
        }
    }
}

/// Runs the translator over class-bearing inputs.
pub struct TranslateStage<'a> {
    translator: &'a dyn Translator,
    loadable_extension: String,
}

impl<'a> TranslateStage<'a> {
    pub fn new(translator: &'a dyn Translator) -> Self {
        TranslateStage {
            translator,
            loadable_extension: "dex".to_string(),
        }
    }

    pub fn loadable_extension(mut self, ext: impl Into<String>) -> Self {
        self.loadable_extension = ext.into();
        self
    }

    /// Translate `inputs` against the ordered `classpath` into `output_dir`.
    ///
    /// Never fails: tool errors, panics, I/O problems and a run that leaves
    /// no loadable file are reported as `success = false`.
    pub fn run(&self, inputs: &[PathBuf], classpath: &[PathBuf], output_dir: &Path) -> TranslateOutcome {
        let missing: Vec<&PathBuf> = inputs.iter().filter(|i| !i.exists()).collect();
        if !missing.is_empty() {
            let mut diag = Diagnostic::error("translation inputs are missing");
            for path in missing {
                diag = diag.with_context(path.display().to_string());
            }
            return TranslateOutcome::failed(ToolOutput::failure(diag));
        }

        match self.run_scoped(inputs, classpath, output_dir) {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::error!("translation into {} failed: {:#}", output_dir.display(), e);
                TranslateOutcome::failed(ToolOutput::failure(Diagnostic::error(format!(
                    "translation failed: {:#}",
                    e
                ))))
            }
        }
    }

    fn run_scoped(
        &self,
        inputs: &[PathBuf],
        classpath: &[PathBuf],
        output_dir: &Path,
    ) -> Result<TranslateOutcome> {
        ensure_dir(output_dir)?;
        let scratch = tempfile::Builder::new()
            .prefix(".translate-")
            .tempdir_in(output_dir)
            .with_context(|| format!("failed to create scratch dir in {}", output_dir.display()))?;

        let request = TranslateRequest {
            inputs: inputs.to_vec(),
            classpath: classpath.to_vec(),
            output_dir: scratch.path().to_path_buf(),
        };
        let output = guarded(self.translator.name(), || self.translator.translate(&request));
        if !output.success {
            return Ok(TranslateOutcome::failed(output));
        }

        self.collect(scratch.path(), output_dir)?;
        scratch
            .close()
            .with_context(|| format!("failed to remove scratch dir in {}", output_dir.display()))?;

        let loadable_files = files_under(output_dir, &self.loadable_extension);
        if loadable_files.is_empty() {
            let message = format!(
                "{} produced no .{} files",
                self.translator.name(),
                self.loadable_extension
            );
            tracing::warn!("{}", message);
            let mut failed = TranslateOutcome::failed(output);
            failed.diagnostics.push(Diagnostic::error(message));
            return Ok(failed);
        }

        Ok(TranslateOutcome {
            success: true,
            diagnostics: output.diagnostics,
            log: output.log,
            loadable_files,
        })
    }

    /// Move loadable output from `scratch` into `output_dir`.
    fn collect(&self, scratch: &Path, output_dir: &Path) -> Result<()> {
        let produced: Vec<PathBuf> = WalkDir::new(scratch)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .map(|e| e.into_path())
            .collect();

        for path in produced {
            if has_extension(&path, "zip") || has_extension(&path, "jar") {
                self.unpack_loadable(&path, output_dir)?;
            } else if has_extension(&path, &self.loadable_extension) {
                let rel = path.strip_prefix(scratch).unwrap_or(&path);
                let dest = output_dir.join(rel);
                if let Some(parent) = dest.parent() {
                    ensure_dir(parent)?;
                }
                std::fs::rename(&path, &dest).with_context(|| {
                    format!("failed to move {} to {}", path.display(), dest.display())
                })?;
            }
        }
        Ok(())
    }

    fn unpack_loadable(&self, container: &Path, output_dir: &Path) -> Result<()> {
        let file = File::open(container)
            .with_context(|| format!("failed to open {}", container.display()))?;
        let mut archive = zip::ZipArchive::new(file)
            .with_context(|| format!("failed to read {}", container.display()))?;

        for i in 0..archive.len() {
            let mut entry = archive.by_index(i)?;
            let Some(name) = entry.enclosed_name() else {
                tracing::warn!("skipping unsafe entry {} in {}", entry.name(), container.display());
                continue;
            };
            if entry.is_dir() || !has_extension(&name, &self.loadable_extension) {
                continue;
            }
            let dest = output_dir.join(&name);
            if let Some(parent) = dest.parent() {
                ensure_dir(parent)?;
            }
            let mut out = File::create(&dest)
                .with_context(|| format!("failed to create {}", dest.display()))?;
            io::copy(&mut entry, &mut out)
                .with_context(|| format!("failed to extract {}", dest.display()))?;
            out.sync_all()?;
        }
        Ok(())
    }
}
