//! CLI output.
//!
//! Human mode prints right-aligned status words to stderr and shows a
//! spinner while a build runs. JSON mode prints one event object per line to
//! stdout and nothing else.

use std::fmt::Display;
use std::io::{self, IsTerminal, Write};
use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;

/// Shell output mode. Human and Json are mutually exclusive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShellMode {
    Human { verbose: bool, color: bool },
    Json,
}

/// Semantic status of a message; the shell picks word and color.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Created,
    Added,
    Removed,
    Cleaned,
    Finished,
    Building,
    Requested,
    Watching,
    Info,
    Rejected,
    Failed,
    Warning,
    Error,
}

impl Status {
    fn as_str(&self) -> &'static str {
        match self {
            Status::Created => "Created",
            Status::Added => "Added",
            Status::Removed => "Removed",
            Status::Cleaned => "Cleaned",
            Status::Finished => "Finished",
            Status::Building => "Building",
            Status::Requested => "Requested",
            Status::Watching => "Watching",
            Status::Info => "Info",
            Status::Rejected => "Rejected",
            Status::Failed => "Failed",
            Status::Warning => "Warning",
            Status::Error => "error",
        }
    }

    fn color_code(&self) -> &'static str {
        match self {
            Status::Created | Status::Added | Status::Removed | Status::Cleaned | Status::Finished => {
                "\x1b[1;32m"
            }
            Status::Building | Status::Requested | Status::Watching => "\x1b[1;36m",
            Status::Info => "\x1b[1;34m",
            Status::Warning => "\x1b[1;33m",
            Status::Rejected | Status::Failed | Status::Error => "\x1b[1;31m",
        }
    }
}

const STATUS_WIDTH: usize = 12;

/// Central shell for all CLI output.
#[derive(Debug)]
pub struct Shell {
    mode: ShellMode,
}

impl Shell {
    pub fn new(mode: ShellMode) -> Self {
        let mode = match mode {
            ShellMode::Human { verbose, color } => ShellMode::Human {
                verbose,
                color: color && io::stderr().is_terminal(),
            },
            ShellMode::Json => ShellMode::Json,
        };
        Shell { mode }
    }

    /// Shell for the global CLI flags. JSON wins over everything else.
    pub fn from_flags(verbose: bool, color: bool, json: bool) -> Self {
        if json {
            Shell::new(ShellMode::Json)
        } else {
            Shell::new(ShellMode::Human { verbose, color })
        }
    }

    pub fn is_json(&self) -> bool {
        matches!(self.mode, ShellMode::Json)
    }

    pub fn is_verbose(&self) -> bool {
        matches!(self.mode, ShellMode::Human { verbose: true, .. })
    }

    pub fn use_color(&self) -> bool {
        matches!(self.mode, ShellMode::Human { color: true, .. })
    }

    /// Print `{status:>12} {message}` to stderr. Ignored in JSON mode.
    pub fn status(&self, status: Status, msg: impl Display) {
        if self.is_json() {
            return;
        }
        eprintln!("{} {}", self.format_status(status), msg);
    }

    pub fn warn(&self, msg: impl Display) {
        self.status(Status::Warning, msg);
    }

    /// Print one JSON line to stdout. Ignored in human mode.
    pub fn json_line(&self, value: &impl Serialize) {
        if !self.is_json() {
            return;
        }
        let text = serde_json::to_string(value).unwrap_or_default();
        let mut stdout = io::stdout().lock();
        let _ = writeln!(stdout, "{}", text);
        let _ = stdout.flush();
    }

    /// A spinner for a long step, or `None` when it would clutter output.
    pub fn spinner(&self, msg: impl Into<String>) -> Option<ProgressBar> {
        if self.is_json() || self.is_verbose() || !io::stderr().is_terminal() {
            return None;
        }
        let pb = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.green} {msg}") {
            pb.set_style(style);
        }
        pb.set_message(msg.into());
        pb.enable_steady_tick(Duration::from_millis(100));
        Some(pb)
    }

    fn format_status(&self, status: Status) -> String {
        let text = status.as_str();
        if self.use_color() {
            format!(
                "{}{:>width$}\x1b[0m",
                status.color_code(),
                text,
                width = STATUS_WIDTH
            )
        } else {
            format!("{:>width$}", text, width = STATUS_WIDTH)
        }
    }
}

/// Format a duration in a human-readable way.
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs_f64();
    if secs < 60.0 {
        format!("{:.2}s", secs)
    } else {
        format!("{:.1}m", secs / 60.0)
    }
}
