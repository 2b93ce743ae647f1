//! Sync engine
//!
//! - [`WindowPlanner`] splits a range into bounded windows
//! - [`MetricFetcher`] runs one remote query per (metric, window)
//! - [`RetryPolicy`] bounds retries per window
//! - [`SyncOrchestrator`] drives a run across metrics
//! - [`SyncService`] runs the full sync and the periodic incremental loop

mod fetch;
mod orchestrator;
mod planner;
mod progress;
mod retry;
mod schedule;
mod service;

pub use fetch::{MetricFetcher, extract_points};
pub use orchestrator::{SyncOptions, SyncOrchestrator};
pub use planner::{WindowPlan, WindowPlanner, Windows};
pub use progress::{ChannelProgress, LogProgress, Phase, ProgressEvent, ProgressListener};
pub use retry::{RetryPolicy, Sleeper, ThreadSleeper, WindowOutcome};
pub use schedule::{StopSignal, schedule_periodic, time_until_due};
pub use service::{SyncHandle, SyncService};
