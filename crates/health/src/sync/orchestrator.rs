//! Run orchestration: credential check, then each metric through
//! planner → fetcher → retry → sink
//!
//! One run at a time: the sink lives behind a mutex that doubles as the run
//! lock. A run that cannot take it immediately is skipped rather than queued.

use chrono::{DateTime, TimeDelta, TimeZone, Utc};
use log::{error, info, warn};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError, TryLockError};
use std::time::Instant;

use super::fetch::MetricFetcher;
use super::planner::{WindowPlan, WindowPlanner};
use super::progress::{LogProgress, Phase, ProgressEvent, ProgressListener};
use super::retry::{RetryPolicy, Sleeper, ThreadSleeper, WindowOutcome};
use crate::error::{AuthError, SyncError};
use crate::google::{Credential, CredentialManager, FitnessApi};
use crate::models::{
    MetricDescriptor, MetricRegistry, MetricStatus, RunState, RunSummary, SyncMode, SyncResult,
    SyncRun, SyncState,
};
use crate::storage::Sink;

/// Engine tuning
#[derive(Debug, Clone, PartialEq)]
pub struct SyncOptions {
    /// Largest span covered by one remote query
    pub window_size: TimeDelta,
    /// Remote aggregation bucket
    pub bucket: TimeDelta,
    /// Start of a full sync
    pub history_start: DateTime<Utc>,
    /// Minimum span of an incremental sync
    pub incremental_lookback: TimeDelta,
    pub retry: RetryPolicy,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            window_size: TimeDelta::days(30),
            bucket: TimeDelta::days(1),
            history_start: Utc
                .with_ymd_and_hms(2022, 1, 1, 0, 0, 0)
                .single()
                .unwrap_or_default(),
            incremental_lookback: TimeDelta::days(1),
            retry: RetryPolicy::default(),
        }
    }
}

/// How one metric's fetch phase ended
enum MetricRun {
    Done(SyncResult),
    /// Stop requested during a backoff wait
    Interrupted(SyncResult),
    /// The access token was rejected
    Unauthorized(String),
}

/// Drives sync runs over a metric registry
pub struct SyncOrchestrator {
    credentials: CredentialManager,
    fetcher: MetricFetcher,
    registry: MetricRegistry,
    options: SyncOptions,
    sink: Mutex<Box<dyn Sink>>,
    state: Mutex<RunState>,
    last_sync: Mutex<Option<SyncState>>,
    state_path: Option<PathBuf>,
    progress: Arc<dyn ProgressListener>,
    sleeper: Arc<dyn Sleeper>,
}

impl SyncOrchestrator {
    pub fn new(
        credentials: CredentialManager,
        api: Arc<dyn FitnessApi>,
        registry: MetricRegistry,
        sink: Box<dyn Sink>,
        options: SyncOptions,
    ) -> Self {
        Self {
            credentials,
            fetcher: MetricFetcher::new(api, options.bucket),
            registry,
            options,
            sink: Mutex::new(sink),
            state: Mutex::new(RunState::Idle),
            last_sync: Mutex::new(None),
            state_path: None,
            progress: Arc::new(LogProgress),
            sleeper: Arc::new(ThreadSleeper),
        }
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressListener>) -> Self {
        self.progress = progress;
        self
    }

    /// Wait between retries with `sleeper` (e.g. an interruptible stop signal)
    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    /// Persist sync state at `path`, loading what is already there
    pub fn with_state_path(mut self, path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        match SyncState::load(&path) {
            Ok(state) => self.last_sync = Mutex::new(state),
            Err(e) => warn!("Ignoring unreadable sync state: {:#}", e),
        }
        self.state_path = Some(path);
        self
    }

    pub fn registry(&self) -> &MetricRegistry {
        &self.registry
    }

    pub fn options(&self) -> &SyncOptions {
        &self.options
    }

    pub fn credentials(&self) -> &CredentialManager {
        &self.credentials
    }

    /// Current run state
    pub fn state(&self) -> RunState {
        self.state.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// What the last finished run recorded
    pub fn sync_state(&self) -> Option<SyncState> {
        self.last_sync
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Full history up to now
    pub fn run_full(&self, selection: Vec<String>) -> Result<RunSummary, SyncError> {
        self.run(SyncRun::full(selection, self.options.history_start, Utc::now()))
    }

    /// Catch up since the last run, covering at least the lookback
    ///
    /// The range is computed under the run lock, after any run that was
    /// in flight has recorded its state.
    pub fn run_incremental(&self, selection: Vec<String>) -> Result<RunSummary, SyncError> {
        self.run_locked(SyncMode::Incremental, |last| {
            SyncRun::incremental(
                selection,
                last.map(|s| s.last_window_end),
                self.options.incremental_lookback,
                Utc::now(),
            )
        })
    }

    /// Execute one run
    ///
    /// Returns an error only when the run could not start or was aborted:
    /// unknown metrics, failed authentication, a rejected token mid-run, or
    /// another run holding the lock. Per-metric failures are reported in
    /// the summary.
    pub fn run(&self, run: SyncRun) -> Result<RunSummary, SyncError> {
        self.run_locked(run.mode, |_| run)
    }

    fn run_locked(
        &self,
        mode: SyncMode,
        make_run: impl FnOnce(Option<SyncState>) -> SyncRun,
    ) -> Result<RunSummary, SyncError> {
        let mut sink = match self.sink.try_lock() {
            Ok(guard) => guard,
            Err(TryLockError::WouldBlock) => {
                info!("Skipping {} sync: another run is in progress", mode);
                return Err(SyncError::RunInProgress);
            }
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
        };

        let run = make_run(self.sync_state());
        let started = Instant::now();
        let metrics = self.registry.select(&run.selected_metrics)?;
        self.emit(ProgressEvent::run(
            Phase::RunStarted,
            format!(
                "{} sync of {} metric(s) from {} to {}",
                run.mode,
                metrics.len(),
                run.start,
                run.end
            ),
        ));

        let credential = self.authenticate(&metrics)?;
        let plan = WindowPlanner::new(self.options.window_size).plan(run.start, run.end);

        let mut results = Vec::with_capacity(metrics.len());
        let mut interrupted = false;
        for (index, metric) in metrics.iter().enumerate() {
            if interrupted {
                results.push(SyncResult {
                    metric: metric.key.clone(),
                    status: MetricStatus::Skipped {
                        reason: "run interrupted".to_string(),
                    },
                    record_count: 0,
                    windows_attempted: 0,
                    windows_lost: 0,
                    output: None,
                });
                continue;
            }

            self.set_state(RunState::FetchingMetric {
                index,
                metric: metric.key.clone(),
            });

            match self.sync_metric(&mut **sink, metric, &plan, &credential, run.mode) {
                MetricRun::Done(result) => results.push(result),
                MetricRun::Interrupted(result) => {
                    interrupted = true;
                    results.push(result);
                }
                MetricRun::Unauthorized(message) => {
                    for metric in &metrics {
                        sink.discard(metric);
                    }
                    self.set_state(RunState::AuthFailed);
                    self.emit(ProgressEvent::run(Phase::AuthFailed, message.clone()));
                    error!("Access token rejected mid-run, aborting: {}", message);
                    return Err(AuthError::Unauthorized(message).into());
                }
            }
        }
        let state = if results.iter().all(SyncResult::is_success) {
            RunState::Completed
        } else {
            RunState::PartiallyFailed
        };
        self.set_state(state.clone());
        self.record_sync_state(run.end, run.mode);

        let summary = RunSummary {
            mode: run.mode,
            start: run.start,
            end: run.end,
            state,
            results,
            duration_ms: started.elapsed().as_millis() as u64,
        };

        let written: Vec<String> = summary
            .results
            .iter()
            .filter_map(|r| r.output.as_ref())
            .map(|p| p.display().to_string())
            .collect();
        let detail = if written.is_empty() {
            summary.headline()
        } else {
            format!("{}; wrote {}", summary.headline(), written.join(", "))
        };
        self.emit(ProgressEvent::run(Phase::RunFinished, detail));
        drop(sink);

        Ok(summary)
    }

    fn authenticate(&self, metrics: &[&MetricDescriptor]) -> Result<Credential, SyncError> {
        self.set_state(RunState::AuthPending);
        self.emit(ProgressEvent::run(Phase::Authenticating, ""));

        let scopes = MetricRegistry::scopes_for(metrics);
        let result = self
            .credentials
            .load()
            .and_then(|stored| self.credentials.ensure_valid(stored, &scopes));

        match result {
            Ok(credential) => {
                self.set_state(RunState::AuthOk);
                self.emit(ProgressEvent::run(Phase::Authenticated, ""));
                Ok(credential)
            }
            Err(e) => {
                self.set_state(RunState::AuthFailed);
                self.emit(ProgressEvent::run(Phase::AuthFailed, e.to_string()));
                Err(e.into())
            }
        }
    }

    fn sync_metric(
        &self,
        sink: &mut dyn Sink,
        metric: &MetricDescriptor,
        plan: &WindowPlan,
        credential: &Credential,
        mode: SyncMode,
    ) -> MetricRun {
        let key = metric.key.as_str();
        self.emit(ProgressEvent::metric(
            key,
            Phase::MetricStarted,
            format!("{} window(s)", plan.len()),
        ));

        let mut result = SyncResult {
            metric: metric.key.clone(),
            status: MetricStatus::Succeeded,
            record_count: 0,
            windows_attempted: 0,
            windows_lost: 0,
            output: None,
        };
        let mut last_error = None;

        for window in plan {
            result.windows_attempted += 1;
            let outcome = self.options.retry.execute_observed(
                self.sleeper.as_ref(),
                |_| self.fetcher.fetch(metric, &window, credential),
                |attempt, err, delay| {
                    self.emit(ProgressEvent::metric(
                        key,
                        Phase::Retrying,
                        format!(
                            "attempt {} failed ({}), retrying in {:?}",
                            attempt, err, delay
                        ),
                    ))
                },
            );

            match outcome {
                WindowOutcome::Fetched { value, .. } => {
                    self.emit(ProgressEvent::metric(
                        key,
                        Phase::WindowFetched,
                        format!(
                            "{} point(s) in [{}, {})",
                            value.len(),
                            window.start,
                            window.end
                        ),
                    ));
                    sink.append(metric, value);
                }
                WindowOutcome::NoData => {
                    self.emit(ProgressEvent::metric(
                        key,
                        Phase::WindowEmpty,
                        format!("no data in [{}, {})", window.start, window.end),
                    ));
                }
                WindowOutcome::Exhausted {
                    attempts,
                    last_error: err,
                } => {
                    result.windows_lost += 1;
                    self.emit(ProgressEvent::metric(
                        key,
                        Phase::WindowLost,
                        format!(
                            "[{}, {}) after {} attempt(s): {}",
                            window.start, window.end, attempts, err
                        ),
                    ));
                    last_error = Some(err.to_string());
                }
                WindowOutcome::Forbidden(message) => {
                    sink.discard(metric);
                    result.status = MetricStatus::Skipped {
                        reason: format!("scope forbidden: {}", message),
                    };
                    self.finish_metric(&result);
                    return MetricRun::Done(result);
                }
                WindowOutcome::Unauthorized(message) => return MetricRun::Unauthorized(message),
                WindowOutcome::Interrupted { .. } => {
                    sink.discard(metric);
                    result.status = MetricStatus::Failed {
                        error: "interrupted by stop request".to_string(),
                    };
                    self.finish_metric(&result);
                    return MetricRun::Interrupted(result);
                }
            }
        }

        // The fetch phase completed, so whatever was fetched is written even
        // when some windows were lost
        match sink.flush(metric, mode) {
            Ok(report) => {
                result.record_count = report.records;
                result.output = report.location;
                if result.windows_lost > 0 {
                    result.status = MetricStatus::Failed {
                        error: format!(
                            "{} of {} window(s) lost, last error: {}",
                            result.windows_lost,
                            result.windows_attempted,
                            last_error.unwrap_or_default()
                        ),
                    };
                }
            }
            Err(e) => {
                error!("Failed to write {}: {:#}", key, e);
                result.status = MetricStatus::Failed {
                    error: format!("write failed: {:#}", e),
                };
            }
        }

        self.finish_metric(&result);
        MetricRun::Done(result)
    }

    fn finish_metric(&self, result: &SyncResult) {
        self.emit(ProgressEvent::metric(
            &result.metric,
            Phase::MetricFinished,
            format!("{}, {} record(s)", result.status, result.record_count),
        ));
    }

    fn record_sync_state(&self, end: DateTime<Utc>, mode: SyncMode) {
        let state = SyncState::new(end, mode);
        if let Some(path) = &self.state_path {
            if let Err(e) = state.save(path) {
                warn!("Failed to save sync state: {:#}", e);
            }
        }
        *self.last_sync.lock().unwrap_or_else(PoisonError::into_inner) = Some(state);
    }

    fn set_state(&self, state: RunState) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = state;
    }

    fn emit(&self, event: ProgressEvent) {
        self.progress.on_event(&event);
    }
}
