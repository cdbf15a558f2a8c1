//! `berth status` command

use anyhow::Result;

use crate::cli::StatusArgs;
use berth::ops::{format_status, status};
use berth::util::GlobalContext;

pub fn execute(args: StatusArgs, gctx: &GlobalContext) -> Result<()> {
    let config = gctx.config();
    let summary = status(&gctx.layout(), config.translator.loadable_extension());

    if args.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        print!("{}", format_status(&summary));
    }
    Ok(())
}
