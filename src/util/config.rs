//! Configuration file support for berth.
//!
//! berth reads two configuration files:
//! - Global: `~/.berth/config.toml` - User-wide defaults
//! - Project: `<root>/berth.toml` - Project-specific overrides
//!
//! Project config takes precedence over global config, field by field.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Name of the project configuration file at the layout root.
pub const PROJECT_CONFIG_FILE: &str = "berth.toml";

/// berth configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Source compiler invocation
    pub compiler: CompilerConfig,

    /// Bytecode translator invocation
    pub translator: TranslatorConfig,

    /// Support and platform libraries
    pub classpath: ClasspathConfig,

    /// Build pipeline settings
    pub build: BuildConfig,

    /// External library settings
    pub libraries: LibrariesConfig,
}

/// How to invoke the external source compiler.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CompilerConfig {
    /// Compiler executable (path or name looked up in PATH)
    pub program: Option<PathBuf>,

    /// Extra arguments passed before the generated ones
    pub args: Vec<String>,

    /// Extension of source files under `src/`
    pub source_extension: Option<String>,

    /// Flag naming the class output directory
    pub output_flag: Option<String>,

    /// Flag naming the generated-source directory
    pub gensrc_flag: Option<String>,

    /// Flag introducing the classpath
    pub classpath_flag: Option<String>,
}

impl CompilerConfig {
    pub fn program(&self) -> PathBuf {
        self.program.clone().unwrap_or_else(|| PathBuf::from("javac"))
    }

    pub fn source_extension(&self) -> &str {
        self.source_extension.as_deref().unwrap_or("java")
    }

    pub fn output_flag(&self) -> &str {
        self.output_flag.as_deref().unwrap_or("-d")
    }

    pub fn gensrc_flag(&self) -> &str {
        self.gensrc_flag.as_deref().unwrap_or("-s")
    }

    pub fn classpath_flag(&self) -> &str {
        self.classpath_flag.as_deref().unwrap_or("-classpath")
    }
}

/// How to invoke the external bytecode translator.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TranslatorConfig {
    /// Translator executable (path or name looked up in PATH)
    pub program: Option<PathBuf>,

    /// Extra arguments passed before the generated ones
    pub args: Vec<String>,

    /// Flag naming the output directory
    pub output_flag: Option<String>,

    /// Flag introducing one classpath entry (repeated per entry)
    pub classpath_flag: Option<String>,

    /// Extension of the loadable files the translator produces
    pub loadable_extension: Option<String>,
}

impl TranslatorConfig {
    pub fn program(&self) -> PathBuf {
        self.program.clone().unwrap_or_else(|| PathBuf::from("d8"))
    }

    pub fn output_flag(&self) -> &str {
        self.output_flag.as_deref().unwrap_or("--output")
    }

    pub fn classpath_flag(&self) -> &str {
        self.classpath_flag.as_deref().unwrap_or("--classpath")
    }

    pub fn loadable_extension(&self) -> &str {
        self.loadable_extension.as_deref().unwrap_or("dex")
    }
}

/// Archives (relative to `lib/`) that user code is compiled and translated against.
///
/// Support libraries come first on the classpath, platform libraries last.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ClasspathConfig {
    pub support: Option<Vec<String>>,
    pub platform: Option<Vec<String>>,
}

impl ClasspathConfig {
    pub fn support(&self) -> Vec<String> {
        self.support
            .clone()
            .unwrap_or_else(|| vec!["app-classes.jar".to_string()])
    }

    pub fn platform(&self) -> Vec<String> {
        self.platform
            .clone()
            .unwrap_or_else(|| vec!["android.jar".to_string()])
    }
}

/// Build-related configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildConfig {
    /// Seconds to wait for the build lock before abandoning a build
    pub lock_timeout_secs: Option<u64>,

    /// File name of the consolidated archive inside each version directory
    pub archive_name: Option<String>,

    /// Extension of compiled class files
    pub class_extension: Option<String>,
}

impl BuildConfig {
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_secs(self.lock_timeout_secs.unwrap_or(30))
    }

    pub fn archive_name(&self) -> &str {
        self.archive_name.as_deref().unwrap_or("user-code.jar")
    }

    pub fn class_extension(&self) -> &str {
        self.class_extension.as_deref().unwrap_or("class")
    }
}

/// External library configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LibrariesConfig {
    /// Prefix of the native-code ABI directory to use from bundles (e.g. `arm64`)
    pub native_abi: Option<String>,

    /// Extension of native-code files inside bundles
    pub native_extension: Option<String>,
}

impl LibrariesConfig {
    pub fn native_abi(&self) -> &str {
        self.native_abi.as_deref().unwrap_or("arm64")
    }

    pub fn native_extension(&self) -> &str {
        self.native_extension.as_deref().unwrap_or("so")
    }
}

impl Config {
    /// Load configuration from a file.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;

        toml::from_str(&contents)
            .with_context(|| format!("failed to parse config file: {}", path.display()))
    }

    /// Load configuration with fallback to defaults if file doesn't exist.
    pub fn load_or_default(path: &Path) -> Self {
        if path.exists() {
            Self::load(path).unwrap_or_else(|e| {
                tracing::warn!("Failed to load config from {}: {:#}", path.display(), e);
                Self::default()
            })
        } else {
            Self::default()
        }
    }

    /// Merge another config into this one (other takes precedence).
    pub fn merge(&mut self, other: Config) {
        // Compiler
        if other.compiler.program.is_some() {
            self.compiler.program = other.compiler.program;
        }
        if !other.compiler.args.is_empty() {
            self.compiler.args = other.compiler.args;
        }
        if other.compiler.source_extension.is_some() {
            self.compiler.source_extension = other.compiler.source_extension;
        }
        if other.compiler.output_flag.is_some() {
            self.compiler.output_flag = other.compiler.output_flag;
        }
        if other.compiler.gensrc_flag.is_some() {
            self.compiler.gensrc_flag = other.compiler.gensrc_flag;
        }
        if other.compiler.classpath_flag.is_some() {
            self.compiler.classpath_flag = other.compiler.classpath_flag;
        }

        // Translator
        if other.translator.program.is_some() {
            self.translator.program = other.translator.program;
        }
        if !other.translator.args.is_empty() {
            self.translator.args = other.translator.args;
        }
        if other.translator.output_flag.is_some() {
            self.translator.output_flag = other.translator.output_flag;
        }
        if other.translator.classpath_flag.is_some() {
            self.translator.classpath_flag = other.translator.classpath_flag;
        }
        if other.translator.loadable_extension.is_some() {
            self.translator.loadable_extension = other.translator.loadable_extension;
        }

        // Classpath
        if other.classpath.support.is_some() {
            self.classpath.support = other.classpath.support;
        }
        if other.classpath.platform.is_some() {
            self.classpath.platform = other.classpath.platform;
        }

        // Build
        if other.build.lock_timeout_secs.is_some() {
            self.build.lock_timeout_secs = other.build.lock_timeout_secs;
        }
        if other.build.archive_name.is_some() {
            self.build.archive_name = other.build.archive_name;
        }
        if other.build.class_extension.is_some() {
            self.build.class_extension = other.build.class_extension;
        }

        // Libraries
        if other.libraries.native_abi.is_some() {
            self.libraries.native_abi = other.libraries.native_abi;
        }
        if other.libraries.native_extension.is_some() {
            self.libraries.native_extension = other.libraries.native_extension;
        }
    }
}

/// Load merged configuration from global and project locations.
///
/// Order of precedence (highest to lowest):
/// 1. Project config (`<root>/berth.toml`)
/// 2. Global config (`~/.berth/config.toml`)
/// 3. Defaults
pub fn load_config(global_path: Option<&Path>, project_path: &Path) -> Config {
    let mut config = Config::default();

    if let Some(global_path) = global_path {
        if global_path.exists() {
            config.merge(Config::load_or_default(global_path));
        }
    }

    if project_path.exists() {
        config.merge(Config::load_or_default(project_path));
    }

    config
}

/// Get the global berth config directory (`~/.berth`).
pub fn global_config_dir() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|b| b.home_dir().join(".berth"))
}

/// Get the global config path (`~/.berth/config.toml`).
pub fn global_config_path() -> Option<PathBuf> {
    global_config_dir().map(|dir| dir.join("config.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert_eq!(config.compiler.program(), PathBuf::from("javac"));
        assert_eq!(config.translator.program(), PathBuf::from("d8"));
        assert_eq!(config.translator.loadable_extension(), "dex");
        assert_eq!(config.build.lock_timeout(), Duration::from_secs(30));
        assert_eq!(config.build.archive_name(), "user-code.jar");
        assert_eq!(config.libraries.native_abi(), "arm64");
        assert_eq!(config.classpath.platform(), vec!["android.jar"]);
    }

    #[test]
    fn test_config_load() {
        let tmp = TempDir::new().unwrap();
        let config_path = tmp.path().join("berth.toml");

        std::fs::write(
            &config_path,
            r#"
[compiler]
program = "/usr/bin/javac"
args = ["-source", "1.8"]

[translator]
program = "/opt/d8"
loadable_extension = "odex"

[classpath]
support = ["robot.jar", "lambda-stubs.jar"]
platform = []

[build]
lock_timeout_secs = 5
"#,
        )
        .unwrap();

        let config = Config::load(&config_path).unwrap();
        assert_eq!(config.compiler.program(), PathBuf::from("/usr/bin/javac"));
        assert_eq!(config.compiler.args, vec!["-source", "1.8"]);
        assert_eq!(config.translator.loadable_extension(), "odex");
        assert_eq!(config.classpath.support(), vec!["robot.jar", "lambda-stubs.jar"]);
        assert!(config.classpath.platform().is_empty());
        assert_eq!(config.build.lock_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn test_config_merge() {
        let mut base = Config::default();
        base.compiler.program = Some(PathBuf::from("javac"));
        base.build.lock_timeout_secs = Some(10);

        let mut override_cfg = Config::default();
        override_cfg.compiler.program = Some(PathBuf::from("ecj"));

        base.merge(override_cfg);

        assert_eq!(base.compiler.program(), PathBuf::from("ecj"));
        assert_eq!(base.build.lock_timeout_secs, Some(10)); // Not overridden
    }

    #[test]
    fn test_load_config_precedence() {
        let tmp = TempDir::new().unwrap();
        let global_path = tmp.path().join("global.toml");
        let project_path = tmp.path().join("berth.toml");

        std::fs::write(
            &global_path,
            r#"
[compiler]
program = "javac"
[libraries]
native_abi = "armeabi"
"#,
        )
        .unwrap();
        std::fs::write(
            &project_path,
            r#"
[compiler]
program = "ecj"
"#,
        )
        .unwrap();

        let config = load_config(Some(&global_path), &project_path);
        assert_eq!(config.compiler.program(), PathBuf::from("ecj"));
        assert_eq!(config.libraries.native_abi(), "armeabi");
    }

    #[test]
    fn test_invalid_config_falls_back_to_default() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("berth.toml");
        std::fs::write(&path, "this is = = not toml").unwrap();

        let config = Config::load_or_default(&path);
        assert!(config.compiler.program.is_none());
    }
}
