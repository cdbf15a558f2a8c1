//! Build request sentinel.
//!
//! Any write to `control/buildRequest.txt` asks for a build. The watcher
//! only detects writes and hands them to a callback; queueing and coalescing
//! belong to the controller.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{SecondsFormat, Utc};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};

use crate::core::layout::Layout;
use crate::util::durable;
use crate::util::fs::ensure_dir;

/// Write the sentinel, requesting a build from whoever watches it.
pub fn request_build(layout: &Layout) -> Result<()> {
    let path = layout.build_request_file();
    if let Some(parent) = path.parent() {
        ensure_dir(parent)?;
    }
    let stamp = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
    durable::write_string(&path, &format!("{}\n", stamp))?;
    tracing::debug!("requested build via {}", path.display());
    Ok(())
}

/// Watches the sentinel for as long as it is alive.
pub struct RequestWatcher {
    sentinel: PathBuf,
    _watcher: RecommendedWatcher,
}

impl RequestWatcher {
    /// Call `on_request` for every write to the sentinel.
    pub fn spawn(layout: &Layout, on_request: impl Fn() + Send + 'static) -> Result<Self> {
        let sentinel = layout.build_request_file();
        let dir = layout.control_dir();
        ensure_dir(&dir)?;

        let target = sentinel.clone();
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
            Ok(event) if is_request(&event, &target) => on_request(),
            Ok(_) => {}
            Err(e) => tracing::warn!("watch error: {}", e),
        })
        .context("failed to create file watcher")?;
        watcher
            .watch(&dir, RecursiveMode::NonRecursive)
            .with_context(|| format!("failed to watch {}", dir.display()))?;
        tracing::info!("watching {}", sentinel.display());

        Ok(RequestWatcher {
            sentinel,
            _watcher: watcher,
        })
    }

    pub fn sentinel(&self) -> &Path {
        &self.sentinel
    }
}

fn is_request(event: &Event, sentinel: &Path) -> bool {
    let relevant = matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_));
    relevant
        && event
            .paths
            .iter()
            .any(|p| p.file_name() == sentinel.file_name())
}
