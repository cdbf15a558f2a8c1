//! Global context for berth operations.
//!
//! Provides centralized access to the project root, configuration and
//! output preferences.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::core::layout::Layout;
use crate::util::config::{global_config_path, load_config, Config, PROJECT_CONFIG_FILE};

/// Global context containing configuration and paths.
#[derive(Debug, Clone)]
pub struct GlobalContext {
    /// Root of the persisted layout
    root: PathBuf,

    /// Whether to use verbose output
    verbose: bool,

    /// Whether to use colors in output
    color: bool,
}

impl GlobalContext {
    /// Create a new GlobalContext rooted at the current directory.
    pub fn new() -> Result<Self> {
        let cwd = std::env::current_dir().context("failed to get current directory")?;
        Ok(Self::with_root(cwd))
    }

    /// Create a GlobalContext with a specific layout root.
    pub fn with_root(root: PathBuf) -> Self {
        GlobalContext {
            root: crate::util::fs::absolute(&root),
            verbose: false,
            color: true,
        }
    }

    /// Set verbose mode.
    pub fn set_verbose(&mut self, verbose: bool) {
        self.verbose = verbose;
    }

    /// Set color output.
    pub fn set_color(&mut self, color: bool) {
        self.color = color;
    }

    /// Get the layout root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The persisted directory layout under the root.
    pub fn layout(&self) -> Layout {
        Layout::new(&self.root)
    }

    /// Path of the project configuration file.
    pub fn project_config_path(&self) -> PathBuf {
        self.root.join(PROJECT_CONFIG_FILE)
    }

    /// Load the merged global + project configuration.
    pub fn config(&self) -> Config {
        load_config(
            global_config_path().as_deref(),
            &self.project_config_path(),
        )
    }

    /// Check if verbose mode is enabled.
    pub fn is_verbose(&self) -> bool {
        self.verbose
    }

    /// Check if color output is enabled.
    pub fn color(&self) -> bool {
        self.color
    }
}
