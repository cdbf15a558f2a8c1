//! `berth lib` command

use anyhow::{bail, Result};

use crate::cli::{LibArgs, LibCommands};
use berth::builder::BuildContext;
use berth::libraries::LibraryError;
use berth::ops::{add_library, list_libraries, open_manager, remove_library};
use berth::util::diagnostic::emit;
use berth::util::{GlobalContext, Shell, Status};

pub fn execute(args: LibArgs, gctx: &GlobalContext) -> Result<()> {
    let shell = Shell::from_flags(gctx.is_verbose(), gctx.color(), false);
    let ctx = BuildContext::from_global(gctx);
    let manager = open_manager(&ctx)?;

    match args.command {
        LibCommands::Add { file } => match add_library(&manager, &file) {
            Ok(lib) => {
                shell.status(
                    Status::Added,
                    format!(
                        "{} ({} classes, {} loadable file(s))",
                        lib.name(),
                        lib.class_names().len(),
                        lib.loadable_files().len()
                    ),
                );
                Ok(())
            }
            Err(e) => match e.downcast_ref::<LibraryError>() {
                Some(lib_err) => {
                    emit(&lib_err.to_diagnostic(), shell.use_color());
                    shell.status(Status::Rejected, lib_err.library());
                    bail!("library rejected")
                }
                None => Err(e),
            },
        },
        LibCommands::Remove { name } => {
            if let Err(e) = remove_library(&manager, &name) {
                emit(&e.to_diagnostic(), shell.use_color());
                bail!("could not remove `{}`", name);
            }
            shell.status(Status::Removed, &name);
            Ok(())
        }
        LibCommands::List { json } => {
            let listing = list_libraries(&manager)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&listing)?);
                return Ok(());
            }
            if listing.is_empty() {
                println!("no external libraries");
            }
            for lib in &listing {
                let state = if lib.active { "active" } else { "inactive" };
                println!(
                    "{:<32} {:<8} {:>6} classes  {:>3} loadable",
                    lib.name, state, lib.classes, lib.loadable_files
                );
            }
            Ok(())
        }
    }
}
