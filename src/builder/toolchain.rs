//! Compiler and translator seams.
//!
//! The source compiler and the bytecode translator are opaque external tools.
//! Both sit behind a trait so the pipeline can run against the configured
//! programs (javac-style and d8-style command lines) or an in-process fake.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use anyhow::{Context, Result};
use regex::Regex;

use crate::util::config::{CompilerConfig, TranslatorConfig};
use crate::util::diagnostic::{Diagnostic, Severity};
use crate::util::process::{combined_output, resolve_tool, ProcessBuilder};

/// A command to execute, with program, arguments, and environment.
#[derive(Debug, Clone)]
pub struct CommandSpec {
    /// The program to run (e.g., "javac", "d8")
    pub program: PathBuf,
    /// Command arguments
    pub args: Vec<String>,
    /// Environment variables to set
    pub env: Vec<(String, String)>,
}

impl CommandSpec {
    /// Create a new command spec.
    pub fn new(program: impl Into<PathBuf>) -> Self {
        CommandSpec {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
        }
    }

    /// Add an argument.
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Add multiple arguments.
    pub fn args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.args.extend(args.into_iter().map(|a| a.into()));
        self
    }

    /// Add an environment variable.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Turn the spec into a runnable process.
    pub fn to_process(&self) -> ProcessBuilder {
        let mut cmd = ProcessBuilder::new(&self.program).args(&self.args);
        for (key, value) in &self.env {
            cmd = cmd.env(key, value);
        }
        cmd
    }
}

/// Input for a compile step.
#[derive(Debug, Clone)]
pub struct CompileRequest {
    /// Source files to compile
    pub sources: Vec<PathBuf>,
    /// Ordered classpath the sources are compiled against
    pub classpath: Vec<PathBuf>,
    /// Directory receiving class files
    pub output_dir: PathBuf,
    /// Directory receiving generated sources
    pub gensrc_dir: PathBuf,
}

/// Input for a translate step.
#[derive(Debug, Clone)]
pub struct TranslateRequest {
    /// Class archives or class files to translate
    pub inputs: Vec<PathBuf>,
    /// Ordered classpath used to resolve referenced symbols
    pub classpath: Vec<PathBuf>,
    /// Directory receiving the tool's raw output
    pub output_dir: PathBuf,
}

/// What a tool reported.
#[derive(Debug, Clone, Default)]
pub struct ToolOutput {
    pub success: bool,
    pub diagnostics: Vec<Diagnostic>,
    /// Raw tool output, kept for the build log
    pub log: String,
}

impl ToolOutput {
    pub fn success() -> Self {
        ToolOutput {
            success: true,
            ..Default::default()
        }
    }

    pub fn failure(diagnostic: Diagnostic) -> Self {
        ToolOutput {
            success: false,
            log: diagnostic.to_string(),
            diagnostics: vec![diagnostic],
        }
    }
}

/// Source compiler.
pub trait Compiler: Send + Sync {
    /// Tool name for messages.
    fn name(&self) -> &str;

    /// Compile `request.sources` into `request.output_dir`.
    ///
    /// Compile errors are reported through `ToolOutput`; `Err` means the
    /// tool could not be run at all.
    fn compile(&self, request: &CompileRequest) -> Result<ToolOutput>;
}

/// Bytecode translator producing loadable files.
pub trait Translator: Send + Sync {
    /// Tool name for messages.
    fn name(&self) -> &str;

    /// Translate `request.inputs` into `request.output_dir`.
    fn translate(&self, request: &TranslateRequest) -> Result<ToolOutput>;
}

/// A compiler driven through a javac-style command line.
#[derive(Debug, Clone)]
pub struct ExternalCompiler {
    program: PathBuf,
    args: Vec<String>,
    output_flag: String,
    gensrc_flag: String,
    classpath_flag: String,
}

impl ExternalCompiler {
    pub fn from_config(config: &CompilerConfig) -> Self {
        ExternalCompiler {
            program: resolve_tool(&config.program()),
            args: config.args.clone(),
            output_flag: config.output_flag().to_string(),
            gensrc_flag: config.gensrc_flag().to_string(),
            classpath_flag: config.classpath_flag().to_string(),
        }
    }

    /// Generate the compile command.
    pub fn command(&self, request: &CompileRequest) -> Result<CommandSpec> {
        let mut spec = CommandSpec::new(&self.program)
            .args(self.args.iter().cloned())
            .arg(&self.output_flag)
            .arg(path_arg(&request.output_dir))
            .arg(&self.gensrc_flag)
            .arg(path_arg(&request.gensrc_dir));

        if !request.classpath.is_empty() {
            let joined = std::env::join_paths(&request.classpath)
                .context("classpath entry contains a path separator")?;
            spec = spec
                .arg(&self.classpath_flag)
                .arg(joined.to_string_lossy().into_owned());
        }

        Ok(spec.args(request.sources.iter().map(|s| path_arg(s))))
    }
}

impl Compiler for ExternalCompiler {
    fn name(&self) -> &str {
        tool_name(&self.program)
    }

    fn compile(&self, request: &CompileRequest) -> Result<ToolOutput> {
        let output = self.command(request)?.to_process().exec()?;
        let log = combined_output(&output);
        Ok(ToolOutput {
            success: output.status.success(),
            diagnostics: parse_diagnostics(&log),
            log,
        })
    }
}

/// A translator driven through a d8-style command line.
#[derive(Debug, Clone)]
pub struct ExternalTranslator {
    program: PathBuf,
    args: Vec<String>,
    output_flag: String,
    classpath_flag: String,
}

impl ExternalTranslator {
    pub fn from_config(config: &TranslatorConfig) -> Self {
        ExternalTranslator {
            program: resolve_tool(&config.program()),
            args: config.args.clone(),
            output_flag: config.output_flag().to_string(),
            classpath_flag: config.classpath_flag().to_string(),
        }
    }

    /// Generate the translate command. Classpath entries keep their order.
    pub fn command(&self, request: &TranslateRequest) -> CommandSpec {
        let mut spec = CommandSpec::new(&self.program)
            .args(self.args.iter().cloned())
            .arg(&self.output_flag)
            .arg(path_arg(&request.output_dir));
        for entry in &request.classpath {
            spec = spec.arg(&self.classpath_flag).arg(path_arg(entry));
        }
        spec.args(request.inputs.iter().map(|i| path_arg(i)))
    }
}

impl Translator for ExternalTranslator {
    fn name(&self) -> &str {
        tool_name(&self.program)
    }

    fn translate(&self, request: &TranslateRequest) -> Result<ToolOutput> {
        let output = self.command(request).to_process().exec()?;
        let log = combined_output(&output);
        let mut diagnostics = parse_diagnostics(&log);
        if !output.status.success() && !diagnostics.iter().any(Diagnostic::is_error) {
            diagnostics.push(Diagnostic::error(format!(
                "{} exited with {}",
                tool_name(&self.program),
                output.status
            )));
        }
        Ok(ToolOutput {
            success: output.status.success(),
            diagnostics,
            log,
        })
    }
}

fn path_arg(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

fn tool_name(program: &Path) -> &str {
    program
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("tool")
}

static DIAGNOSTIC_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?P<path>[^:\s][^:]*):(?P<line>\d+):\s*(?P<level>error|warning|note):\s*(?P<msg>.*)$")
        .expect("diagnostic pattern is valid")
});

/// Parse `path:line: error|warning: message` lines into diagnostics.
///
/// Lines that don't start a diagnostic are attached as context to the
/// preceding one, or become notes when there is none.
pub fn parse_diagnostics(text: &str) -> Vec<Diagnostic> {
    let mut diagnostics: Vec<Diagnostic> = Vec::new();

    for line in text.lines() {
        if line.trim().is_empty() {
            continue;
        }
        if let Some(caps) = DIAGNOSTIC_LINE.captures(line) {
            let message = caps["msg"].trim().to_string();
            let mut diag = match &caps["level"] {
                "error" => Diagnostic::error(message),
                "warning" => Diagnostic::warning(message),
                _ => Diagnostic::note(message),
            }
            .with_location(&caps["path"]);
            if let Ok(n) = caps["line"].parse() {
                diag = diag.with_line(n);
            }
            diagnostics.push(diag);
        } else if let Some(last) = diagnostics.last_mut() {
            last.context.push(line.trim_end().to_string());
        } else if line.trim_start().starts_with("error:") {
            let message = line.trim_start().trim_start_matches("error:").trim();
            diagnostics.push(Diagnostic::error(message));
        } else {
            diagnostics.push(Diagnostic::note(line.trim_end()));
        }
    }

    diagnostics
}

/// Run a tool invocation, turning both `Err` and panics into a failed output.
pub(crate) fn guarded(tool: &str, f: impl FnOnce() -> Result<ToolOutput>) -> ToolOutput {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(Ok(mut output)) => {
            if !output.success && !output.diagnostics.iter().any(Diagnostic::is_error) {
                output
                    .diagnostics
                    .push(Diagnostic::error(format!("{} reported failure", tool)));
            }
            output
        }
        Ok(Err(e)) => {
            tracing::error!("{} failed to run: {:#}", tool, e);
            ToolOutput::failure(Diagnostic::error(format!("{} failed to run: {:#}", tool, e)))
        }
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            tracing::error!("{} crashed: {}", tool, message);
            ToolOutput::failure(Diagnostic::error(format!("{} crashed: {}", tool, message)))
        }
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Count of error diagnostics.
pub fn error_count(diagnostics: &[Diagnostic]) -> usize {
    diagnostics
        .iter()
        .filter(|d| d.severity == Severity::Error)
        .count()
}
