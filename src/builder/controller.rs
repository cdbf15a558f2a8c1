//! Build controller.
//!
//! A single worker thread runs builds. Triggers only set a flag and return:
//! any number of triggers while a build runs collapse into one follow-up
//! build, and a running build is never interrupted.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use parking_lot::{Condvar, Mutex};

use crate::builder::executor::{BuildExecutor, BuildReport};
use crate::core::status::{BuildStatus, StatusCell};

#[derive(Default)]
struct QueueState {
    pending: bool,
    running: bool,
    shutdown: bool,
    completed: u64,
    last_report: Option<BuildReport>,
}

struct Shared {
    state: Mutex<QueueState>,
    wake: Condvar,
    idle: Condvar,
    status: StatusCell,
}

/// Owner of the build worker and the process-wide build status.
pub struct BuildController {
    shared: Arc<Shared>,
    worker: Option<JoinHandle<()>>,
}

impl BuildController {
    /// Start the worker thread.
    pub fn start(executor: BuildExecutor) -> Result<Self> {
        let shared = Arc::new(Shared {
            state: Mutex::new(QueueState::default()),
            wake: Condvar::new(),
            idle: Condvar::new(),
            status: StatusCell::new(),
        });
        let worker_shared = shared.clone();
        let worker = thread::Builder::new()
            .name("berth-build".to_string())
            .spawn(move || worker_loop(&worker_shared, &executor))
            .context("failed to spawn build worker")?;
        Ok(BuildController {
            shared,
            worker: Some(worker),
        })
    }

    /// Request a build. Returns immediately.
    pub fn trigger(&self) {
        let mut state = self.shared.state.lock();
        if state.shutdown {
            return;
        }
        if state.pending {
            tracing::debug!("build already queued, coalescing trigger");
        }
        state.pending = true;
        self.shared.wake.notify_one();
    }

    pub fn status(&self) -> BuildStatus {
        self.shared.status.get()
    }

    /// Block until nothing is queued or running, or `timeout` passes.
    ///
    /// Returns whether the controller went idle.
    pub fn wait_for_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.shared.state.lock();
        while state.pending || state.running {
            if self
                .shared
                .idle
                .wait_until(&mut state, deadline)
                .timed_out()
            {
                return !(state.pending || state.running);
            }
        }
        true
    }

    /// Number of pipeline runs that reached a settled status.
    pub fn completed_builds(&self) -> u64 {
        self.shared.state.lock().completed
    }

    pub fn last_report(&self) -> Option<BuildReport> {
        self.shared.state.lock().last_report.clone()
    }
}

impl Drop for BuildController {
    fn drop(&mut self) {
        {
            let mut state = self.shared.state.lock();
            state.shutdown = true;
            if state.pending {
                tracing::debug!("dropping queued build on shutdown");
                state.pending = false;
            }
            self.shared.wake.notify_all();
        }
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                tracing::error!("build worker panicked");
            }
        }
    }
}

fn worker_loop(shared: &Shared, executor: &BuildExecutor) {
    loop {
        {
            let mut state = shared.state.lock();
            while !state.pending && !state.shutdown {
                shared.wake.wait(&mut state);
            }
            if state.shutdown {
                shared.idle.notify_all();
                return;
            }
            state.pending = false;
            state.running = true;
        }

        let result = executor.run(&shared.status);

        let mut state = shared.state.lock();
        state.running = false;
        match result {
            Ok(report) => {
                state.completed += 1;
                state.last_report = Some(report);
            }
            Err(e) => {
                tracing::warn!("build abandoned: {}", e);
            }
        }
        if !state.pending {
            shared.idle.notify_all();
        }
    }
}
