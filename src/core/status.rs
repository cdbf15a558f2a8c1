//! Build status and the status marker files.

use std::fmt;
use std::path::Path;
use std::sync::atomic::{AtomicU8, Ordering};

use anyhow::Result;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;

use crate::core::layout::Layout;
use crate::util::durable;

/// Outcome of the most recent build, as seen by this process.
///
/// `NotStarted -> Running -> {Successful, Failed} -> Running -> ...`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BuildStatus {
    NotStarted,
    Running,
    Successful,
    Failed,
}

impl BuildStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BuildStatus::NotStarted => "NOT_STARTED",
            BuildStatus::Running => "RUNNING",
            BuildStatus::Successful => "SUCCESSFUL",
            BuildStatus::Failed => "FAILED",
        }
    }

    /// Whether a build has finished (either way).
    pub fn is_settled(&self) -> bool {
        matches!(self, BuildStatus::Successful | BuildStatus::Failed)
    }

    fn to_u8(self) -> u8 {
        match self {
            BuildStatus::NotStarted => 0,
            BuildStatus::Running => 1,
            BuildStatus::Successful => 2,
            BuildStatus::Failed => 3,
        }
    }

    fn from_u8(v: u8) -> Self {
        match v {
            1 => BuildStatus::Running,
            2 => BuildStatus::Successful,
            3 => BuildStatus::Failed,
            _ => BuildStatus::NotStarted,
        }
    }
}

impl fmt::Display for BuildStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Process-wide build status with atomic reads.
///
/// Only the build controller writes it; everyone else reads.
#[derive(Debug)]
pub struct StatusCell(AtomicU8);

impl StatusCell {
    pub fn new() -> Self {
        StatusCell(AtomicU8::new(BuildStatus::NotStarted.to_u8()))
    }

    pub fn get(&self) -> BuildStatus {
        BuildStatus::from_u8(self.0.load(Ordering::Acquire))
    }

    pub(crate) fn set(&self, status: BuildStatus) {
        self.0.store(status.to_u8(), Ordering::Release);
    }
}

impl Default for StatusCell {
    fn default() -> Self {
        Self::new()
    }
}

/// One status marker file: a timestamp line, then a message line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusMarker {
    pub timestamp: DateTime<Utc>,
    pub message: String,
}

impl StatusMarker {
    pub fn now(message: impl Into<String>) -> Self {
        StatusMarker {
            timestamp: Utc::now(),
            message: message.into(),
        }
    }

    /// Serialize to the two-line file format.
    pub fn render(&self) -> String {
        format!(
            "{}\n{}\n",
            self.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true),
            self.message
        )
    }

    /// Parse the two-line file format. Anything else is treated as missing.
    pub fn parse(text: &str) -> Option<Self> {
        let mut lines = text.lines();
        let timestamp = DateTime::parse_from_rfc3339(lines.next()?.trim())
            .ok()?
            .with_timezone(&Utc);
        let message = lines.next().unwrap_or_default().trim().to_string();
        Some(StatusMarker { timestamp, message })
    }

    /// Durably write this marker to `path`.
    pub fn write(&self, path: &Path) -> Result<()> {
        durable::write_string(path, &self.render())
    }

    /// Read a marker; an absent or unparsable file is `None`.
    pub fn read(path: &Path) -> Option<Self> {
        match durable::read_to_string(path) {
            Ok(Some(text)) => Self::parse(&text),
            Ok(None) => None,
            Err(e) => {
                tracing::warn!("treating {} as missing: {:#}", path.display(), e);
                None
            }
        }
    }
}

/// Last known build state reconstructed from the marker files.
///
/// This is what another process (a status screen, `berth status`) sees.
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub status: BuildStatus,
    pub started: Option<StatusMarker>,
    pub completed: Option<StatusMarker>,
    pub successful: Option<StatusMarker>,
}

impl StatusReport {
    pub fn load(layout: &Layout) -> Self {
        let started = StatusMarker::read(&layout.build_started_file());
        let completed = StatusMarker::read(&layout.build_complete_file());
        let successful = StatusMarker::read(&layout.build_successful_file());
        let status = infer_status(started.as_ref(), completed.as_ref(), successful.as_ref());
        StatusReport {
            status,
            started,
            completed,
            successful,
        }
    }
}

fn infer_status(
    started: Option<&StatusMarker>,
    completed: Option<&StatusMarker>,
    successful: Option<&StatusMarker>,
) -> BuildStatus {
    let Some(started) = started else {
        return BuildStatus::NotStarted;
    };
    match completed {
        Some(completed) if completed.timestamp >= started.timestamp => match successful {
            Some(successful) if successful.timestamp >= started.timestamp => {
                BuildStatus::Successful
            }
            _ => BuildStatus::Failed,
        },
        _ => BuildStatus::Running,
    }
}
