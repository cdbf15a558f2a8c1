//! External library errors.

use std::path::PathBuf;

use miette::Diagnostic as MietteDiagnostic;
use thiserror::Error;

use crate::util::diagnostic::{suggestions, Diagnostic};

/// Why an upload, deletion or restart check of a library failed.
#[derive(Debug, Error, MietteDiagnostic)]
pub enum LibraryError {
    #[error("`{name}` is not a supported library file")]
    #[diagnostic(
        code(berth::library::unsupported),
        help("Upload a code archive (.jar) or a library bundle (.aar)")
    )]
    Unsupported { name: String },

    #[error("`{name}` is not a valid library file name")]
    #[diagnostic(code(berth::library::invalid_name))]
    InvalidName { name: String },

    #[error("a library named `{name}` already exists")]
    #[diagnostic(
        code(berth::library::duplicate),
        help("Remove the existing library first with `berth lib remove {name}`")
    )]
    Duplicate { name: String },

    #[error("`{name}` can not be used because class `{class}` already exists in external library `{other}`")]
    #[diagnostic(code(berth::library::collision))]
    LibraryCollision {
        name: String,
        class: String,
        other: String,
    },

    #[error("`{name}` can not be used because class `{class}` already exists in the application")]
    #[diagnostic(code(berth::library::application_collision))]
    ApplicationCollision { name: String, class: String },

    #[error("`{name}` could not be read: {reason}")]
    #[diagnostic(code(berth::library::unreadable))]
    Unreadable { name: String, reason: String },

    #[error("`{name}` could not be translated")]
    #[diagnostic(code(berth::library::translation))]
    TranslationFailed { name: String, details: Vec<String> },

    #[error("`{name}` is incomplete: its translated files are missing")]
    #[diagnostic(
        code(berth::library::incomplete),
        help("Remove the library and upload it again")
    )]
    Incomplete { name: String, missing: Vec<PathBuf> },

    #[error("no library named `{name}`")]
    #[diagnostic(code(berth::library::not_found))]
    NotFound { name: String },

    #[error("I/O failure while handling `{name}`: {message}")]
    #[diagnostic(code(berth::library::io))]
    Io { name: String, message: String },
}

impl LibraryError {
    /// Wrap an internal failure for library `name`.
    pub fn io(name: &str, err: anyhow::Error) -> Self {
        LibraryError::Io {
            name: name.to_string(),
            message: format!("{:#}", err),
        }
    }

    /// Name of the library the error is about.
    pub fn library(&self) -> &str {
        match self {
            LibraryError::Unsupported { name }
            | LibraryError::InvalidName { name }
            | LibraryError::Duplicate { name }
            | LibraryError::LibraryCollision { name, .. }
            | LibraryError::ApplicationCollision { name, .. }
            | LibraryError::Unreadable { name, .. }
            | LibraryError::TranslationFailed { name, .. }
            | LibraryError::Incomplete { name, .. }
            | LibraryError::NotFound { name }
            | LibraryError::Io { name, .. } => name,
        }
    }

    pub fn is_collision(&self) -> bool {
        matches!(
            self,
            LibraryError::LibraryCollision { .. } | LibraryError::ApplicationCollision { .. }
        )
    }

    /// Convert to a user-facing diagnostic.
    pub fn to_diagnostic(&self) -> Diagnostic {
        let diag = Diagnostic::error(self.to_string());
        match self {
            LibraryError::Unsupported { .. } => {
                diag.with_suggestion("Upload a code archive (.jar) or a library bundle (.aar)")
            }
            LibraryError::Duplicate { name } => diag.with_suggestion(format!(
                "Remove the existing library first with `berth lib remove {}`",
                name
            )),
            LibraryError::LibraryCollision { .. } => {
                diag.with_suggestion(suggestions::LIBRARY_COLLISION)
            }
            LibraryError::ApplicationCollision { .. } => {
                diag.with_suggestion(suggestions::APPLICATION_COLLISION)
            }
            LibraryError::TranslationFailed { details, .. } => details
                .iter()
                .fold(diag, |d, line| d.with_context(line.clone())),
            LibraryError::Incomplete { missing, .. } => missing
                .iter()
                .fold(diag, |d, path| d.with_context(path.display().to_string()))
                .with_suggestion("Remove the library and upload it again"),
            _ => diag,
        }
    }
}
