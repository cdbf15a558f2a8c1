//! `berth build` command

use std::sync::Arc;

use anyhow::{bail, Result};

use crate::cli::{BuildArgs, MessageFormat};
use berth::builder::{BuildContext, BuildEvent};
use berth::ops::{build, BuildOptions};
use berth::util::diagnostic::{emit, suggestions};
use berth::util::shell::format_duration;
use berth::util::{GlobalContext, Shell, Status};

pub fn execute(args: BuildArgs, gctx: &GlobalContext) -> Result<()> {
    let json = args.message_format == MessageFormat::Json;
    let shell = Arc::new(Shell::from_flags(gctx.is_verbose(), gctx.color(), json));
    let ctx = BuildContext::from_global(gctx);

    shell.status(Status::Building, gctx.root().display());
    let spinner = shell.spinner("compiling and translating");

    let events = shell.clone();
    let opts = BuildOptions {
        on_event: Some(Box::new(move |event: &BuildEvent| events.json_line(event))),
    };
    let result = build(ctx, opts);
    if let Some(pb) = spinner {
        pb.finish_and_clear();
    }
    let report = result?;

    if !shell.is_json() {
        for diag in &report.diagnostics {
            emit(diag, shell.use_color());
        }
    }

    if !report.is_success() {
        bail!(
            "build failed with {} error(s)\n{}",
            report.error_count(),
            suggestions::BUILD_FAILED
        );
    }

    let published = report
        .version
        .as_ref()
        .map(|v| v.display().to_string())
        .unwrap_or_default();
    shell.status(
        Status::Finished,
        format!("{} in {}", published, format_duration(report.duration)),
    );
    Ok(())
}
