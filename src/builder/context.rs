//! Build context - layout, configuration and tools.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::builder::compile::CompileStage;
use crate::builder::toolchain::{Compiler, ExternalCompiler, ExternalTranslator, Translator};
use crate::builder::translate::TranslateStage;
use crate::core::layout::Layout;
use crate::util::config::Config;
use crate::util::GlobalContext;

/// Everything a pipeline run or a library ingestion needs.
#[derive(Clone)]
pub struct BuildContext {
    /// Persisted layout
    pub layout: Layout,

    /// Merged configuration
    pub config: Config,

    /// Source compiler
    pub compiler: Arc<dyn Compiler>,

    /// Bytecode translator
    pub translator: Arc<dyn Translator>,
}

impl fmt::Debug for BuildContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BuildContext")
            .field("layout", &self.layout)
            .field("compiler", &self.compiler.name())
            .field("translator", &self.translator.name())
            .finish()
    }
}

impl BuildContext {
    /// Context using the configured external tools.
    pub fn new(layout: Layout, config: Config) -> Self {
        let compiler: Arc<dyn Compiler> = Arc::new(ExternalCompiler::from_config(&config.compiler));
        let translator: Arc<dyn Translator> =
            Arc::new(ExternalTranslator::from_config(&config.translator));
        BuildContext {
            layout,
            config,
            compiler,
            translator,
        }
    }

    /// Context for the layout and configuration of a global context.
    pub fn from_global(gctx: &GlobalContext) -> Self {
        Self::new(gctx.layout(), gctx.config())
    }

    /// Replace the tools (used to run against in-process implementations).
    pub fn with_tools(mut self, compiler: Arc<dyn Compiler>, translator: Arc<dyn Translator>) -> Self {
        self.compiler = compiler;
        self.translator = translator;
        self
    }

    /// Support archives of the application, in configured order.
    pub fn support_classpath(&self) -> Vec<PathBuf> {
        self.lib_paths(self.config.classpath.support())
    }

    /// Platform archives, in configured order.
    pub fn platform_classpath(&self) -> Vec<PathBuf> {
        self.lib_paths(self.config.classpath.platform())
    }

    /// The fixed classpath ordering: support, then `libraries`, then platform.
    pub fn classpath_with(&self, libraries: &[PathBuf]) -> Vec<PathBuf> {
        let mut classpath = self.support_classpath();
        classpath.extend(libraries.iter().cloned());
        classpath.extend(self.platform_classpath());
        classpath
    }

    fn lib_paths(&self, names: Vec<String>) -> Vec<PathBuf> {
        let lib_dir = self.layout.lib_dir();
        names
            .into_iter()
            .map(|name| lib_dir.join(name))
            .filter(|path| {
                let present = path.is_file();
                if !present {
                    tracing::debug!("classpath entry {} is missing, skipping", path.display());
                }
                present
            })
            .collect()
    }

    pub fn compile_stage(&self) -> CompileStage<'_> {
        CompileStage::new(self.compiler.as_ref())
            .source_extension(self.config.compiler.source_extension())
            .class_extension(self.config.build.class_extension())
    }

    pub fn translate_stage(&self) -> TranslateStage<'_> {
        TranslateStage::new(self.translator.as_ref())
            .loadable_extension(self.config.translator.loadable_extension())
    }

    pub fn lock_timeout(&self) -> Duration {
        self.config.build.lock_timeout()
    }

    pub fn archive_name(&self) -> &str {
        self.config.build.archive_name()
    }

    pub fn class_extension(&self) -> &str {
        self.config.build.class_extension()
    }

    pub fn loadable_extension(&self) -> &str {
        self.config.translator.loadable_extension()
    }
}
