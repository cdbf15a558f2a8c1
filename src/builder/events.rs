//! Build event types for JSON output.
//!
//! This module defines the stable JSON schema for machine-readable build output.
//! These events are emitted when using `--message-format=json`.
//!
//! # Event Types
//!
//! - `build-started`: A pipeline run began
//! - `compiler-error` / `compiler-warning`: A tool diagnostic
//! - `build-artifact`: A version directory was published
//! - `build-finished`: Build completed (success or failure)
//! - `library-accepted` / `library-rejected`: Outcome of a library upload
//!
//! # Stability
//!
//! New fields may be added, but existing fields should not be removed or renamed.

use std::path::PathBuf;

use serde::Serialize;

use crate::util::diagnostic::{Diagnostic, Severity};

/// An event emitted while building or ingesting libraries.
///
/// Each event is serialized as a single JSON object per line.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "reason")]
pub enum BuildEvent {
    /// A pipeline run began.
    #[serde(rename = "build-started")]
    BuildStarted {
        /// Layout root
        root: PathBuf,
    },

    /// A compiler or translator error.
    #[serde(rename = "compiler-error")]
    CompilerError {
        /// Message text
        message: String,
        /// Source file (if available)
        #[serde(skip_serializing_if = "Option::is_none")]
        file: Option<PathBuf>,
        /// Line number (if available)
        #[serde(skip_serializing_if = "Option::is_none")]
        line: Option<u32>,
    },

    /// A compiler or translator warning.
    #[serde(rename = "compiler-warning")]
    CompilerWarning {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        file: Option<PathBuf>,
        #[serde(skip_serializing_if = "Option::is_none")]
        line: Option<u32>,
    },

    /// A version was published.
    #[serde(rename = "build-artifact")]
    BuildArtifact {
        /// Published version directory
        version: PathBuf,
        /// Loadable files in it
        filenames: Vec<PathBuf>,
    },

    /// Build completed (success or failure).
    #[serde(rename = "build-finished")]
    BuildFinished {
        /// Whether the build succeeded
        success: bool,
        /// Total build duration in milliseconds
        duration_ms: u64,
    },

    /// An uploaded library was accepted.
    #[serde(rename = "library-accepted")]
    LibraryAccepted {
        name: String,
        /// Number of classes it contributes
        classes: usize,
    },

    /// An uploaded library was rejected and rolled back.
    #[serde(rename = "library-rejected")]
    LibraryRejected { name: String, message: String },

    /// A generic diagnostic message.
    #[serde(rename = "diagnostic")]
    Diagnostic {
        /// Severity level ("error", "warning", "note", "help")
        level: String,
        /// Message text
        message: String,
    },
}

impl BuildEvent {
    /// Create a build started event.
    pub fn started(root: impl Into<PathBuf>) -> Self {
        BuildEvent::BuildStarted { root: root.into() }
    }

    /// Create a build finished event.
    pub fn finished(success: bool, duration_ms: u64) -> Self {
        BuildEvent::BuildFinished {
            success,
            duration_ms,
        }
    }

    /// Create a published-version event.
    pub fn artifact(version: impl Into<PathBuf>, filenames: Vec<PathBuf>) -> Self {
        BuildEvent::BuildArtifact {
            version: version.into(),
            filenames,
        }
    }

    /// Map a tool diagnostic to the matching event.
    pub fn from_diagnostic(diag: &Diagnostic) -> Self {
        match diag.severity {
            Severity::Error => BuildEvent::CompilerError {
                message: diag.message.clone(),
                file: diag.location.clone(),
                line: diag.line,
            },
            Severity::Warning => BuildEvent::CompilerWarning {
                message: diag.message.clone(),
                file: diag.location.clone(),
                line: diag.line,
            },
            other => BuildEvent::Diagnostic {
                level: other.to_string(),
                message: diag.message.clone(),
            },
        }
    }

    /// Serialize this event to a JSON string.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}
