//! berth - an on-device build orchestrator
//!
//! This crate compiles a user source tree, translates the result into a
//! loadable format, publishes it as an atomically switched version, and
//! manages uploaded external libraries with their code-loading graph.

pub mod builder;
pub mod core;
pub mod libraries;
pub mod ops;
pub mod util;

/// In-process compiler, translator and archive fixtures for unit tests.
///
/// This module is only available when compiling with `--cfg test`.
#[cfg(test)]
pub mod test_support;

pub use core::{BuildStatus, Layout, StatusReport};
pub use libraries::{LibraryError, LibraryManager, LoaderGraph};
pub use ops::Service;
pub use util::context::GlobalContext;
