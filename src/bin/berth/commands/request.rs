//! `berth request` command

use anyhow::{bail, Result};

use berth::builder::request_build;
use berth::util::diagnostic::suggestions;
use berth::util::{GlobalContext, Shell, Status};

pub fn execute(gctx: &GlobalContext) -> Result<()> {
    let shell = Shell::from_flags(gctx.is_verbose(), gctx.color(), false);
    let layout = gctx.layout();
    if !layout.exists() {
        bail!("no build layout in {}\n{}", layout.root().display(), suggestions::NO_LAYOUT);
    }

    request_build(&layout)?;

    shell.status(Status::Requested, layout.build_request_file().display());
    Ok(())
}
