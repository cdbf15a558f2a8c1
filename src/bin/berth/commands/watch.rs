//! `berth watch` command
//!
//! Runs the build service in the foreground until the process is stopped.

use std::time::Duration;

use anyhow::{bail, Result};

use crate::cli::WatchArgs;
use berth::builder::BuildContext;
use berth::ops::Service;
use berth::util::diagnostic::{emit, suggestions};
use berth::util::shell::format_duration;
use berth::util::{GlobalContext, Shell, Status};

const POLL_INTERVAL: Duration = Duration::from_millis(250);

pub fn execute(args: WatchArgs, gctx: &GlobalContext) -> Result<()> {
    let shell = Shell::from_flags(gctx.is_verbose(), gctx.color(), false);
    let layout = gctx.layout();
    if !layout.exists() {
        bail!("no build layout in {}\n{}", layout.root().display(), suggestions::NO_LAYOUT);
    }

    let service = Service::start(BuildContext::from_global(gctx))?;
    service.watch_requests()?;
    shell.status(Status::Watching, layout.build_request_file().display());

    if args.build_on_start {
        service.trigger_build();
    }

    let mut seen = service.completed_builds();
    loop {
        std::thread::sleep(POLL_INTERVAL);
        let completed = service.completed_builds();
        if completed == seen {
            continue;
        }
        seen = completed;

        let Some(report) = service.last_report() else {
            continue;
        };
        if report.is_success() {
            let published = report
                .version
                .as_ref()
                .map(|v| v.display().to_string())
                .unwrap_or_default();
            shell.status(
                Status::Finished,
                format!("{} in {}", published, format_duration(report.duration)),
            );
        } else {
            for diag in &report.diagnostics {
                emit(diag, shell.use_color());
            }
            shell.status(
                Status::Failed,
                format!("build failed with {} error(s)", report.error_count()),
            );
        }
    }
}
