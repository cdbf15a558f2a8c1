//! `berth init` command

use anyhow::Result;

use crate::cli::InitArgs;
use berth::ops::init_layout;
use berth::util::{GlobalContext, Shell, Status};

pub fn execute(args: InitArgs, gctx: &GlobalContext) -> Result<()> {
    let shell = Shell::from_flags(gctx.is_verbose(), gctx.color(), false);
    let root = args
        .path
        .map(|p| berth::util::fs::absolute(&p))
        .unwrap_or_else(|| gctx.root().to_path_buf());

    let result = init_layout(&root)?;

    shell.status(Status::Created, format!("build layout in {}", root.display()));
    if result.created_config {
        shell.status(Status::Created, "berth.toml");
    }
    Ok(())
}
