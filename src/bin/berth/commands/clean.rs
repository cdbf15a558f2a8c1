//! `berth clean` command

use anyhow::Result;

use berth::builder::BuildContext;
use berth::ops::clean;
use berth::util::{GlobalContext, Shell, Status};

pub fn execute(gctx: &GlobalContext) -> Result<()> {
    let shell = Shell::from_flags(gctx.is_verbose(), gctx.color(), false);
    let ctx = BuildContext::from_global(gctx);

    let result = clean(&ctx)?;

    shell.status(
        Status::Cleaned,
        format!("{} unpublished version(s)", result.versions_removed),
    );
    Ok(())
}
