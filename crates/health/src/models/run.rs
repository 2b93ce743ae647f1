//! Sync runs, their per-metric results and the run summary

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Which history a run covers, and which output file it replaces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
    /// Everything since the history start
    Full,
    /// The most recent lookback period
    Incremental,
}

impl SyncMode {
    /// Suffix used in output file names
    pub fn file_suffix(self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::Incremental => "daily",
        }
    }
}

impl fmt::Display for SyncMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Full => write!(f, "full"),
            Self::Incremental => write!(f, "incremental"),
        }
    }
}

/// One triggered run: what to sync and over which range
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncRun {
    pub mode: SyncMode,
    /// Metric keys; empty selects the whole registry
    pub selected_metrics: Vec<String>,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl SyncRun {
    /// Full history from `history_start` up to `now`
    pub fn full(
        selected_metrics: Vec<String>,
        history_start: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            mode: SyncMode::Full,
            selected_metrics,
            start: history_start,
            end: now,
        }
    }

    /// Incremental range ending at `now`
    ///
    /// Starts at the earlier of the last attempted window end and
    /// `now - lookback`, so a missed tick is caught up. A lookback reaching
    /// past the representable range starts at the earliest instant.
    pub fn incremental(
        selected_metrics: Vec<String>,
        last_window_end: Option<DateTime<Utc>>,
        lookback: TimeDelta,
        now: DateTime<Utc>,
    ) -> Self {
        let floor = now
            .checked_sub_signed(lookback)
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        let start = last_window_end.map_or(floor, |last| last.min(floor));
        Self {
            mode: SyncMode::Incremental,
            selected_metrics,
            start,
            end: now,
        }
    }
}

/// Outcome of syncing one metric
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MetricStatus {
    Succeeded,
    Skipped { reason: String },
    Failed { error: String },
}

impl fmt::Display for MetricStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Succeeded => write!(f, "succeeded"),
            Self::Skipped { reason } => write!(f, "skipped ({})", reason),
            Self::Failed { error } => write!(f, "failed ({})", error),
        }
    }
}

/// Per-metric result of a run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncResult {
    pub metric: String,
    pub status: MetricStatus,
    /// Rows written to the output
    pub record_count: usize,
    pub windows_attempted: usize,
    /// Windows given up on after the retry bound
    pub windows_lost: usize,
    /// Where the output was written, if the sink has a location
    pub output: Option<PathBuf>,
}

impl SyncResult {
    pub fn is_success(&self) -> bool {
        self.status == MetricStatus::Succeeded
    }
}

/// Observable orchestrator state
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunState {
    Idle,
    AuthPending,
    AuthOk,
    AuthFailed,
    FetchingMetric { index: usize, metric: String },
    Completed,
    PartiallyFailed,
}

/// Everything a consumer needs to report on a finished run
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub mode: SyncMode,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    /// `Completed` or `PartiallyFailed`
    pub state: RunState,
    pub results: Vec<SyncResult>,
    pub duration_ms: u64,
}

impl RunSummary {
    pub fn succeeded(&self) -> impl Iterator<Item = &SyncResult> {
        self.results.iter().filter(|r| r.is_success())
    }

    pub fn skipped(&self) -> impl Iterator<Item = &SyncResult> {
        self.results
            .iter()
            .filter(|r| matches!(r.status, MetricStatus::Skipped { .. }))
    }

    pub fn failed(&self) -> impl Iterator<Item = &SyncResult> {
        self.results
            .iter()
            .filter(|r| matches!(r.status, MetricStatus::Failed { .. }))
    }

    pub fn result(&self, metric: &str) -> Option<&SyncResult> {
        self.results.iter().find(|r| r.metric == metric)
    }

    pub fn total_records(&self) -> usize {
        self.results.iter().map(|r| r.record_count).sum()
    }

    /// One-line human summary
    pub fn headline(&self) -> String {
        format!(
            "{} sync: {} succeeded, {} skipped, {} failed, {} records",
            self.mode,
            self.succeeded().count(),
            self.skipped().count(),
            self.failed().count(),
            self.total_records()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_incremental_defaults_to_lookback() {
        let now = Utc.with_ymd_and_hms(2024, 5, 2, 12, 0, 0).unwrap();
        let run = SyncRun::incremental(vec![], None, TimeDelta::days(1), now);
        assert_eq!(run.start, now - TimeDelta::days(1));
        assert_eq!(run.end, now);
        assert_eq!(run.mode, SyncMode::Incremental);
    }

    #[test]
    fn test_incremental_catches_up_from_last_window_end() {
        let now = Utc.with_ymd_and_hms(2024, 5, 5, 12, 0, 0).unwrap();
        let last = Utc.with_ymd_and_hms(2024, 5, 2, 12, 0, 0).unwrap();
        let run = SyncRun::incremental(vec![], Some(last), TimeDelta::days(1), now);
        assert_eq!(run.start, last);
    }

    #[test]
    fn test_incremental_never_shorter_than_lookback() {
        let now = Utc.with_ymd_and_hms(2024, 5, 5, 12, 0, 0).unwrap();
        let last = now - TimeDelta::hours(1);
        let run = SyncRun::incremental(vec![], Some(last), TimeDelta::days(1), now);
        assert_eq!(run.start, now - TimeDelta::days(1));
    }

    #[test]
    fn test_incremental_with_huge_lookback_does_not_overflow() {
        let now = Utc.with_ymd_and_hms(2024, 5, 5, 12, 0, 0).unwrap();
        let run = SyncRun::incremental(vec![], None, TimeDelta::MAX, now);
        assert_eq!(run.start, DateTime::<Utc>::MIN_UTC);
        assert_eq!(run.end, now);
    }

    #[test]
    fn test_file_suffix() {
        assert_eq!(SyncMode::Full.file_suffix(), "full");
        assert_eq!(SyncMode::Incremental.file_suffix(), "daily");
    }
}
