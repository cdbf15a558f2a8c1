//! Implementation of `berth status`.

use std::fmt::Write as _;
use std::path::PathBuf;

use serde::Serialize;

use crate::builder::versions::VersionStore;
use crate::core::layout::Layout;
use crate::core::status::StatusReport;
use crate::util::durable;
use crate::util::fs::files_under;

/// Everything `status` shows.
#[derive(Debug, Clone, Serialize)]
pub struct StatusSummary {
    #[serde(flatten)]
    pub report: StatusReport,
    /// Published version directory
    pub current_version: Option<PathBuf>,
    /// Loadable files of the published version
    pub loadable_files: Vec<PathBuf>,
    /// Version directory of the latest attempt
    pub working_dir: Option<PathBuf>,
}

/// Reconstruct the build state from the files on disk.
pub fn status(layout: &Layout, loadable_extension: &str) -> StatusSummary {
    let report = StatusReport::load(layout);
    let current_version = VersionStore::new(layout).current();
    let loadable_files = current_version
        .as_deref()
        .map(|v| files_under(v, loadable_extension))
        .unwrap_or_default();
    let working_dir = match durable::read_to_string(&layout.working_dir_file()) {
        Ok(Some(text)) if !text.trim().is_empty() => Some(PathBuf::from(text.trim())),
        Ok(_) => None,
        Err(e) => {
            tracing::warn!("unreadable working dir record: {:#}", e);
            None
        }
    };

    StatusSummary {
        report,
        current_version,
        loadable_files,
        working_dir,
    }
}

/// Human-readable rendering of a summary.
pub fn format_status(summary: &StatusSummary) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "status: {}", summary.report.status);
    for (label, marker) in [
        ("started", &summary.report.started),
        ("completed", &summary.report.completed),
        ("successful", &summary.report.successful),
    ] {
        if let Some(marker) = marker {
            let _ = writeln!(
                out,
                "{:>10}: {} ({})",
                label,
                marker.timestamp.to_rfc3339(),
                marker.message
            );
        }
    }
    match &summary.current_version {
        Some(version) => {
            let _ = writeln!(out, "published: {}", version.display());
            for file in &summary.loadable_files {
                let _ = writeln!(out, "  {}", file.display());
            }
        }
        None => {
            let _ = writeln!(out, "published: none");
        }
    }
    out
}
