//! Periodic incremental sync and the stop signal that ends it

use chrono::{DateTime, Utc};
use log::{error, info};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::Duration;

use super::SyncOrchestrator;
use super::retry::Sleeper;
use crate::error::SyncError;

/// Shared stop flag whose waits wake up as soon as it is raised
#[derive(Clone, Default)]
pub struct StopSignal {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        let (lock, condvar) = &*self.inner;
        *lock.lock().unwrap_or_else(PoisonError::into_inner) = true;
        condvar.notify_all();
    }

    pub fn is_stopped(&self) -> bool {
        *self.inner.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Wait up to `timeout`; returns `true` if stopped
    pub fn wait(&self, timeout: Duration) -> bool {
        let (lock, condvar) = &*self.inner;
        let guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
        let (guard, _) = condvar
            .wait_timeout_while(guard, timeout, |stopped| !*stopped)
            .unwrap_or_else(PoisonError::into_inner);
        *guard
    }
}

impl Sleeper for StopSignal {
    fn sleep(&self, duration: Duration) -> bool {
        !self.wait(duration)
    }
}

/// Time left before the next periodic run is due
///
/// Zero if the last run is at least `interval` old or there never was one.
pub fn time_until_due(
    last_run_at: Option<DateTime<Utc>>,
    interval: Duration,
    now: DateTime<Utc>,
) -> Duration {
    let Some(last) = last_run_at else {
        return Duration::ZERO;
    };
    let elapsed = (now - last).to_std().unwrap_or(Duration::ZERO);
    interval.saturating_sub(elapsed)
}

/// Run incremental syncs until `stop` is raised
///
/// Blocks the calling thread. The first run comes after `first_wait`, the
/// following ones every `interval`. Runs skipped because another run holds
/// the lock are not retried before the next tick.
pub fn schedule_periodic(
    orchestrator: &SyncOrchestrator,
    selection: &[String],
    first_wait: Duration,
    interval: Duration,
    stop: &StopSignal,
) {
    let mut wait = first_wait;

    loop {
        if stop.is_stopped() || stop.wait(wait) {
            break;
        }
        wait = interval;

        match orchestrator.run_incremental(selection.to_vec()) {
            Ok(summary) => info!("Scheduled {}", summary.headline()),
            Err(SyncError::RunInProgress) => {
                info!("Scheduled sync skipped: a run is already in progress")
            }
            Err(e) => error!("Scheduled sync failed: {}", e),
        }
    }

    info!("Periodic sync stopped");
}
