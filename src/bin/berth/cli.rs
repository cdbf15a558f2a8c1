//! CLI definitions using clap.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};
use clap_complete::Shell;

/// berth - compile, translate and publish user code on the device
#[derive(Parser)]
#[command(name = "berth")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,

    /// Root of the build layout (defaults to the current directory)
    #[arg(long, global = true, env = "BERTH_ROOT")]
    pub root: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create the build layout and a default berth.toml
    Init(InitArgs),

    /// Build once and wait for the outcome
    Build(BuildArgs),

    /// Ask a running `berth watch` for a build
    Request,

    /// Run the build service until interrupted
    Watch(WatchArgs),

    /// Show the last build outcome and the published version
    Status(StatusArgs),

    /// Manage external libraries
    Lib(LibArgs),

    /// Remove intermediate output and unpublished versions
    Clean,

    /// Generate shell completions
    Completions(CompletionsArgs),
}

#[derive(Args)]
pub struct InitArgs {
    /// Directory to initialize (defaults to the layout root)
    pub path: Option<PathBuf>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum MessageFormat {
    Human,
    Json,
}

#[derive(Args)]
pub struct BuildArgs {
    /// Output format for build messages
    #[arg(long, value_enum, default_value = "human")]
    pub message_format: MessageFormat,
}

#[derive(Args)]
pub struct WatchArgs {
    /// Build once right after starting
    #[arg(long)]
    pub build_on_start: bool,
}

#[derive(Args)]
pub struct StatusArgs {
    /// Print the report as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Args)]
pub struct LibArgs {
    #[command(subcommand)]
    pub command: LibCommands,
}

#[derive(Subcommand)]
pub enum LibCommands {
    /// Upload a library (.jar or .aar)
    Add {
        /// Library file to upload
        file: PathBuf,
    },

    /// Delete an uploaded library
    Remove {
        /// File name of the library, e.g. `foo.jar`
        name: String,
    },

    /// List uploaded libraries
    List {
        /// Print the list as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Args)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    #[arg(value_enum)]
    pub shell: Shell,
}
