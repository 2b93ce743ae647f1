//! Trigger surface: start a full sync in the background and keep
//! incremental syncs running after it

use chrono::Utc;
use log::{error, info};
use std::sync::Arc;
use std::sync::mpsc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use super::schedule::{StopSignal, schedule_periodic, time_until_due};
use super::SyncOrchestrator;
use crate::error::SyncError;
use crate::models::RunSummary;

type RunHandle = JoinHandle<Result<RunSummary, SyncError>>;

/// Owns an orchestrator and the threads driving it
pub struct SyncService {
    orchestrator: Arc<SyncOrchestrator>,
    interval: Duration,
    stop: StopSignal,
}

impl SyncService {
    /// Retry waits in `orchestrator` become interruptible by [`SyncHandle::stop`]
    pub fn new(orchestrator: SyncOrchestrator, interval: Duration) -> Self {
        let stop = StopSignal::new();
        let orchestrator = orchestrator.with_sleeper(Arc::new(stop.clone()));
        Self {
            orchestrator: Arc::new(orchestrator),
            interval,
            stop,
        }
    }

    pub fn orchestrator(&self) -> &Arc<SyncOrchestrator> {
        &self.orchestrator
    }

    /// Run a full sync on a background thread, then arm the periodic
    /// incremental loop
    ///
    /// The first incremental run comes one full interval after the full run
    /// ends, whether or not it succeeded.
    pub fn start(&self, selection: Vec<String>) -> std::io::Result<SyncHandle> {
        let (done_tx, done_rx) = mpsc::channel::<()>();

        let run = {
            let orchestrator = self.orchestrator.clone();
            let selection = selection.clone();
            thread::Builder::new()
                .name("fitsync-full".into())
                .spawn(move || {
                    let result = orchestrator.run_full(selection);
                    match &result {
                        Ok(summary) => {
                            info!("Full history sync finished: {}", summary.headline())
                        }
                        Err(e) => error!("Full history sync failed: {}", e),
                    }
                    let _ = done_tx.send(());
                    result
                })?
        };

        let scheduler = {
            let orchestrator = self.orchestrator.clone();
            let stop = self.stop.clone();
            let interval = self.interval;
            thread::Builder::new()
                .name("fitsync-scheduler".into())
                .spawn(move || {
                    // Sender dropped without a message means the full run panicked
                    let _ = done_rx.recv();
                    schedule_periodic(&orchestrator, &selection, interval, interval, &stop);
                })?
        };

        Ok(SyncHandle {
            run: Some(run),
            scheduler: Some(scheduler),
            stop: self.stop.clone(),
        })
    }

    /// Keep running incremental syncs without a full sync first
    ///
    /// The cadence continues from the last recorded run, so a restart does
    /// not move the schedule; with no recorded run the first sync starts
    /// right away.
    pub fn resume(&self, selection: Vec<String>) -> std::io::Result<SyncHandle> {
        let first_wait = time_until_due(
            self.orchestrator.sync_state().map(|s| s.last_run_at),
            self.interval,
            Utc::now(),
        );
        info!("Next incremental sync in {}s", first_wait.as_secs());

        let scheduler = {
            let orchestrator = self.orchestrator.clone();
            let stop = self.stop.clone();
            let interval = self.interval;
            thread::Builder::new()
                .name("fitsync-scheduler".into())
                .spawn(move || {
                    schedule_periodic(&orchestrator, &selection, first_wait, interval, &stop);
                })?
        };

        Ok(SyncHandle {
            run: None,
            scheduler: Some(scheduler),
            stop: self.stop.clone(),
        })
    }

    /// Run an incremental sync on a background thread
    pub fn trigger_incremental(&self, selection: Vec<String>) -> std::io::Result<RunHandle> {
        let orchestrator = self.orchestrator.clone();
        thread::Builder::new()
            .name("fitsync-incremental".into())
            .spawn(move || orchestrator.run_incremental(selection))
    }
}

/// Handle to the threads started by [`SyncService::start`] or
/// [`SyncService::resume`]
pub struct SyncHandle {
    run: Option<RunHandle>,
    scheduler: Option<JoinHandle<()>>,
    stop: StopSignal,
}

impl SyncHandle {
    /// Block until the initial full sync finishes
    ///
    /// Returns `None` if already waited on, if there was no full sync, or if
    /// the run thread panicked.
    pub fn wait_full(&mut self) -> Option<Result<RunSummary, SyncError>> {
        match self.run.take()?.join() {
            Ok(result) => Some(result),
            Err(_) => {
                error!("Full sync thread panicked");
                None
            }
        }
    }

    /// Ask both threads to stop at their next wait
    pub fn stop(&self) {
        self.stop.stop();
    }

    /// Stop and wait for both threads
    pub fn shutdown(mut self) {
        self.stop();
        self.wait_full();
        self.join_scheduler();
    }

    /// Block until the scheduler exits (after [`stop`](Self::stop))
    pub fn join_scheduler(&mut self) {
        if let Some(scheduler) = self.scheduler.take() {
            if scheduler.join().is_err() {
                error!("Scheduler thread panicked");
            }
        }
    }
}
