//! Implementation of `berth init`.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};

use crate::core::layout::Layout;
use crate::util::config::PROJECT_CONFIG_FILE;

/// What `init` created.
#[derive(Debug, Clone, Default)]
pub struct InitResult {
    /// Whether a fresh `berth.toml` was written
    pub created_config: bool,
}

/// Create the persisted layout under `root`.
///
/// Existing directories and an existing `berth.toml` are left as they are.
pub fn init_layout(root: &Path) -> Result<InitResult> {
    let layout = Layout::new(root);
    layout
        .ensure()
        .with_context(|| format!("failed to create layout in {}", root.display()))?;

    let config_path = root.join(PROJECT_CONFIG_FILE);
    let created_config = !config_path.exists();
    if created_config {
        fs::write(&config_path, default_config())
            .with_context(|| format!("failed to write {}", config_path.display()))?;
    }
    tracing::debug!("initialized layout in {}", root.display());

    Ok(InitResult { created_config })
}

/// Commented default project configuration.
pub fn default_config() -> String {
    r#"# berth project configuration

[compiler]
# program = "javac"
# args = ["-source", "8", "-target", "8"]
# source_extension = "java"

[translator]
# program = "d8"
# args = ["--min-api", "26"]
# loadable_extension = "dex"

[classpath]
# Archives under lib/, in classpath order.
# support = ["app-classes.jar"]
# platform = ["android.jar"]

[build]
# lock_timeout_secs = 30
# archive_name = "user-code.jar"

[libraries]
# native_abi = "arm64"
"#
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::config::Config;
    use tempfile::TempDir;

    #[test]
    fn test_init_creates_layout_and_config() {
        let tmp = TempDir::new().unwrap();

        let result = init_layout(tmp.path()).unwrap();

        assert!(result.created_config);
        assert!(Layout::new(tmp.path()).exists());
        let config = Config::load(&tmp.path().join(PROJECT_CONFIG_FILE)).unwrap();
        assert_eq!(config.build.archive_name(), "user-code.jar");
    }

    #[test]
    fn test_init_keeps_existing_config() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join(PROJECT_CONFIG_FILE);
        fs::write(&path, "[build]\nlock_timeout_secs = 5\n").unwrap();

        let result = init_layout(tmp.path()).unwrap();

        assert!(!result.created_config);
        assert_eq!(
            fs::read_to_string(&path).unwrap(),
            "[build]\nlock_timeout_secs = 5\n"
        );
    }
}
