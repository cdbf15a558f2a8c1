//! berth CLI

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

mod cli;
mod commands;

use berth::util::GlobalContext;
use cli::{Cli, Commands};

fn main() {
    if let Err(e) = run() {
        eprintln!("error: {:#}", e);
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("berth=debug")
    } else {
        EnvFilter::new("berth=info")
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .without_time()
        .init();

    let mut gctx = match cli.root {
        Some(root) => GlobalContext::with_root(root),
        None => GlobalContext::new()?,
    };
    gctx.set_verbose(cli.verbose);
    gctx.set_color(!cli.no_color);

    match cli.command {
        Commands::Init(args) => commands::init::execute(args, &gctx),
        Commands::Build(args) => commands::build::execute(args, &gctx),
        Commands::Request => commands::request::execute(&gctx),
        Commands::Watch(args) => commands::watch::execute(args, &gctx),
        Commands::Status(args) => commands::status::execute(args, &gctx),
        Commands::Lib(args) => commands::lib::execute(args, &gctx),
        Commands::Clean => commands::clean::execute(&gctx),
        Commands::Completions(args) => commands::completions::execute(args),
    }
}
