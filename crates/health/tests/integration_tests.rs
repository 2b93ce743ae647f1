//! Integration tests for the health crate
//!
//! These tests drive the orchestrator end to end against an in-process
//! Fitness API and token endpoint.

use chrono::{DateTime, TimeDelta, TimeZone, Utc};
use health::google::api::{AggregateRequest, AggregateResponse, Bucket, Dataset, Point, Value};
use health::google::{
    AuthorizationCode, ConsentRequest, Credential, CredentialManager, FitnessApi,
    RedirectHandler, TokenEndpoint, TokenResponse, TokenStore,
};
use health::storage::{FlushReport, MemoryOutputs, MemorySink, Records};
use health::sync::{ChannelProgress, Phase, RetryPolicy, StopSignal, SyncOptions, SyncService};
use health::{
    AuthError, CsvSink, FetchError, MetricDescriptor, MetricRegistry, MetricStatus, RunState,
    Sink, SyncError, SyncMode, SyncOrchestrator, SyncRun, SyncState,
};
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, mpsc};
use std::thread;
use std::time::Duration;
use tempfile::TempDir;

const STEPS: &str = "com.google.step_count.delta";
const WEIGHT: &str = "com.google.weight";
const HEART_RATE: &str = "com.google.heart_rate.bpm";

type Handler =
    dyn Fn(&AggregateRequest, usize) -> Result<AggregateResponse, FetchError> + Send + Sync;

/// Fitness API answering through a handler that sees the per-type call number
struct FakeApi {
    handler: Box<Handler>,
    calls: Mutex<HashMap<String, usize>>,
}

impl FakeApi {
    fn new(
        handler: impl Fn(&AggregateRequest, usize) -> Result<AggregateResponse, FetchError>
        + Send
        + Sync
        + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            handler: Box::new(handler),
            calls: Mutex::new(HashMap::new()),
        })
    }

    /// Every query returns one point at the window start
    fn healthy() -> Arc<Self> {
        Self::new(|request, _| Ok(point_at_start(request)))
    }

    fn calls(&self, data_type: &str) -> usize {
        self.calls.lock().unwrap().get(data_type).copied().unwrap_or(0)
    }

    fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().values().sum()
    }
}

impl FitnessApi for FakeApi {
    fn aggregate(
        &self,
        access_token: &str,
        request: &AggregateRequest,
    ) -> Result<AggregateResponse, FetchError> {
        assert!(!access_token.is_empty());
        let data_type = request.aggregate_by[0].data_type_name.clone();
        let n = {
            let mut calls = self.calls.lock().unwrap();
            let n = calls.entry(data_type).or_insert(0);
            *n += 1;
            *n
        };
        (self.handler)(request, n)
    }
}

fn point_at_start(request: &AggregateRequest) -> AggregateResponse {
    let nanos = (request.start_time_millis * 1_000_000).to_string();
    let value = match request.aggregate_by[0].data_type_name.as_str() {
        HEART_RATE => vec![
            Value { fp_val: Some(70.0), ..Default::default() },
            Value { fp_val: Some(90.0), ..Default::default() },
            Value { fp_val: Some(55.0), ..Default::default() },
        ],
        WEIGHT => vec![Value { fp_val: Some(71.5), ..Default::default() }],
        _ => vec![Value { int_val: Some(100), ..Default::default() }],
    };

    AggregateResponse {
        bucket: vec![Bucket {
            start_time_millis: None,
            end_time_millis: None,
            dataset: vec![Dataset {
                data_source_id: None,
                point: vec![Point {
                    start_time_nanos: nanos.clone(),
                    end_time_nanos: nanos,
                    data_type_name: None,
                    value,
                }],
            }],
        }],
    }
}

#[derive(Default)]
struct CountingEndpoint {
    refreshes: AtomicUsize,
    exchanges: AtomicUsize,
}

impl TokenEndpoint for CountingEndpoint {
    fn exchange_code(&self, _code: &AuthorizationCode) -> Result<TokenResponse, AuthError> {
        self.exchanges.fetch_add(1, Ordering::SeqCst);
        Ok(token_response("consented"))
    }

    fn refresh(&self, _refresh_token: &str) -> Result<TokenResponse, AuthError> {
        self.refreshes.fetch_add(1, Ordering::SeqCst);
        Ok(token_response("refreshed"))
    }
}

fn token_response(access_token: &str) -> TokenResponse {
    TokenResponse {
        access_token: access_token.to_string(),
        refresh_token: None,
        expires_in: Some(3600),
        scope: None,
        token_type: Some("Bearer".to_string()),
    }
}

#[derive(Default)]
struct CountingRedirect {
    consents: AtomicUsize,
    deny: bool,
}

impl RedirectHandler for CountingRedirect {
    fn authorize(&self, _request: &ConsentRequest) -> Result<AuthorizationCode, AuthError> {
        self.consents.fetch_add(1, Ordering::SeqCst);
        if self.deny {
            return Err(AuthError::Rejected("access_denied".to_string()));
        }
        Ok(AuthorizationCode {
            code: "code".to_string(),
            redirect_uri: "http://127.0.0.1:8080".to_string(),
        })
    }
}

/// Sink whose writes always fail
struct BrokenSink;

impl Sink for BrokenSink {
    fn append(&mut self, _metric: &MetricDescriptor, _points: Vec<health::DataPoint>) {}

    fn flush(
        &mut self,
        _metric: &MetricDescriptor,
        _mode: SyncMode,
    ) -> anyhow::Result<FlushReport> {
        anyhow::bail!("disk full")
    }

    fn discard(&mut self, _metric: &MetricDescriptor) {}

    fn buffered(&self, _metric: &MetricDescriptor) -> usize {
        0
    }
}

struct Harness {
    endpoint: Arc<CountingEndpoint>,
    redirect: Arc<CountingRedirect>,
    token_path: std::path::PathBuf,
}

impl Harness {
    fn new(dir: &Path) -> Self {
        Self::with_redirect(dir, CountingRedirect::default())
    }

    fn with_redirect(dir: &Path, redirect: CountingRedirect) -> Self {
        Self {
            endpoint: Arc::new(CountingEndpoint::default()),
            redirect: Arc::new(redirect),
            token_path: dir.join("token.json"),
        }
    }

    /// Store a credential covering every default metric
    fn store_credential(&self, expires_in: TimeDelta) {
        let registry = MetricRegistry::google_fit();
        let all: Vec<&MetricDescriptor> = registry.all().iter().collect();
        TokenStore::new(&self.token_path)
            .persist(&Credential {
                access_token: "stored".to_string(),
                refresh_token: Some("refresh".to_string()),
                expires_at: Some(Utc::now() + expires_in),
                scopes: MetricRegistry::scopes_for(&all),
            })
            .unwrap();
    }

    fn credentials(&self) -> CredentialManager {
        CredentialManager::new(
            "client",
            self.endpoint.clone(),
            self.redirect.clone(),
            TokenStore::new(&self.token_path),
        )
    }

    fn orchestrator(&self, api: Arc<FakeApi>, sink: Box<dyn Sink>) -> SyncOrchestrator {
        let options = SyncOptions {
            retry: RetryPolicy::immediate(5),
            ..SyncOptions::default()
        };
        SyncOrchestrator::new(
            self.credentials(),
            api,
            MetricRegistry::google_fit(),
            sink,
            options,
        )
    }
}

fn day(y: i32, m: u32, d: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, m, d, 0, 0, 0).unwrap()
}

/// Two 30-day windows: [01-01, 01-31) and [01-31, 03-01)
fn two_windows(metrics: &[&str]) -> SyncRun {
    SyncRun::full(
        metrics.iter().map(|m| m.to_string()).collect(),
        day(2022, 1, 1),
        day(2022, 3, 1),
    )
}

fn memory_sink() -> (Box<dyn Sink>, MemoryOutputs) {
    let sink = MemorySink::new();
    let outputs = sink.outputs();
    (Box::new(sink), outputs)
}

#[test]
fn test_full_run_writes_one_file_per_metric() {
    let dir = TempDir::new().unwrap();
    let harness = Harness::new(dir.path());
    harness.store_credential(TimeDelta::hours(1));
    let out = dir.path().join("out");
    let orchestrator = harness.orchestrator(FakeApi::healthy(), Box::new(CsvSink::new(&out)));

    let summary = orchestrator.run(two_windows(&["steps", "weight"])).unwrap();

    assert_eq!(summary.state, RunState::Completed);
    assert_eq!(orchestrator.state(), RunState::Completed);
    assert_eq!(summary.results.len(), 2);
    for result in &summary.results {
        assert_eq!(result.status, MetricStatus::Succeeded);
        assert_eq!(result.windows_attempted, 2);
        assert_eq!(result.record_count, 2);
    }

    let steps = std::fs::read_to_string(out.join("Steps/Raw/steps_data_full.csv")).unwrap();
    assert_eq!(steps, "date,steps\n2022-01-01,100\n2022-01-31,100\n");
    let weight = std::fs::read_to_string(out.join("Weight/Raw/weight_data_full.csv")).unwrap();
    assert_eq!(
        weight,
        "start,end,weight_kg\n\
         2022-01-01 00:00:00,2022-01-01 00:00:00,71.5\n\
         2022-01-31 00:00:00,2022-01-31 00:00:00,71.5\n"
    );
}

#[test]
fn test_rate_limited_window_is_retried_until_success() {
    let dir = TempDir::new().unwrap();
    let harness = Harness::new(dir.path());
    harness.store_credential(TimeDelta::hours(1));
    let api = FakeApi::new(|request, n| {
        if n <= 4 {
            Err(FetchError::RateLimited { retry_after: None })
        } else {
            Ok(point_at_start(request))
        }
    });
    let (sink, outputs) = memory_sink();
    let orchestrator = harness.orchestrator(api.clone(), sink);

    let summary = orchestrator.run(two_windows(&["weight"])).unwrap();
    let result = summary.result("weight").unwrap();

    // Four rate limits and a success on the first window, one call for the second
    assert_eq!(api.calls(WEIGHT), 6);
    assert_eq!(result.status, MetricStatus::Succeeded);
    assert_eq!(result.windows_lost, 0);
    assert_eq!(outputs.get("weight", SyncMode::Full).unwrap().len(), 2);
}

#[test]
fn test_window_lost_after_retry_bound_keeps_partial_data() {
    let dir = TempDir::new().unwrap();
    let harness = Harness::new(dir.path());
    harness.store_credential(TimeDelta::hours(1));
    let api = FakeApi::new(|request, _| {
        if request.start_time_millis == day(2022, 1, 1).timestamp_millis() {
            Err(FetchError::Transient("HTTP 503: unavailable".into()))
        } else {
            Ok(point_at_start(request))
        }
    });
    let (sink, outputs) = memory_sink();
    let orchestrator = harness.orchestrator(api.clone(), sink);

    let summary = orchestrator.run(two_windows(&["weight"])).unwrap();
    let result = summary.result("weight").unwrap();

    assert_eq!(api.calls(WEIGHT), 5 + 1);
    assert!(matches!(result.status, MetricStatus::Failed { .. }));
    assert_eq!(result.windows_attempted, 2);
    assert_eq!(result.windows_lost, 1);
    assert_eq!(result.record_count, 1);
    assert_eq!(outputs.get("weight", SyncMode::Full).unwrap().len(), 1);
    assert_eq!(summary.state, RunState::PartiallyFailed);
}

#[test]
fn test_scope_forbidden_skips_metric_after_one_call() {
    let dir = TempDir::new().unwrap();
    let harness = Harness::new(dir.path());
    harness.store_credential(TimeDelta::hours(1));
    let api = FakeApi::new(|request, _| {
        if request.aggregate_by[0].data_type_name == HEART_RATE {
            Err(FetchError::ScopeForbidden("insufficient scopes".into()))
        } else {
            Ok(point_at_start(request))
        }
    });
    let (sink, outputs) = memory_sink();
    let orchestrator = harness.orchestrator(api.clone(), sink);

    let summary = orchestrator
        .run(two_windows(&["steps", "heart_rate", "weight"]))
        .unwrap();

    assert_eq!(api.calls(HEART_RATE), 1);
    assert!(matches!(
        summary.result("heart_rate").unwrap().status,
        MetricStatus::Skipped { .. }
    ));
    assert!(outputs.get("heart_rate", SyncMode::Full).is_none());
    assert!(summary.result("steps").unwrap().is_success());
    assert!(summary.result("weight").unwrap().is_success());
    assert_eq!(summary.skipped().count(), 1);
    assert_eq!(summary.state, RunState::PartiallyFailed);
}

#[test]
fn test_metric_failure_does_not_stop_others() {
    let dir = TempDir::new().unwrap();
    let harness = Harness::new(dir.path());
    harness.store_credential(TimeDelta::hours(1));
    let api = FakeApi::new(|request, _| {
        if request.aggregate_by[0].data_type_name == WEIGHT {
            Err(FetchError::Transient("connection reset".into()))
        } else {
            Ok(point_at_start(request))
        }
    });
    let (sink, _) = memory_sink();
    let orchestrator = harness.orchestrator(api, sink);

    // Declaration order puts steps before weight regardless of selection order
    let summary = orchestrator.run(two_windows(&["weight", "steps"])).unwrap();

    let keys: Vec<_> = summary.results.iter().map(|r| r.metric.as_str()).collect();
    assert_eq!(keys, vec!["steps", "weight"]);
    assert!(summary.result("steps").unwrap().is_success());
    assert!(matches!(
        summary.result("weight").unwrap().status,
        MetricStatus::Failed { .. }
    ));
    assert_eq!(summary.failed().count(), 1);
}

#[test]
fn test_unauthorized_mid_run_aborts() {
    let dir = TempDir::new().unwrap();
    let harness = Harness::new(dir.path());
    harness.store_credential(TimeDelta::hours(1));
    let api = FakeApi::new(|request, _| {
        if request.aggregate_by[0].data_type_name == WEIGHT {
            Err(FetchError::Auth("Invalid Credentials".into()))
        } else {
            Ok(point_at_start(request))
        }
    });
    let (sink, outputs) = memory_sink();
    let orchestrator = harness.orchestrator(api.clone(), sink);

    let err = orchestrator
        .run(two_windows(&["steps", "weight", "activity"]))
        .unwrap_err();

    assert!(matches!(err, SyncError::Auth(AuthError::Unauthorized(_))));
    assert_eq!(orchestrator.state(), RunState::AuthFailed);
    assert_eq!(api.calls(WEIGHT), 1);
    assert_eq!(api.calls("com.google.activity.segment"), 0);
    assert!(outputs.get("weight", SyncMode::Full).is_none());
    assert!(orchestrator.sync_state().is_none());
}

#[test]
fn test_expired_token_refreshed_once_for_whole_run() {
    let dir = TempDir::new().unwrap();
    let harness = Harness::new(dir.path());
    harness.store_credential(TimeDelta::minutes(-5));
    let (sink, _) = memory_sink();
    let orchestrator = harness.orchestrator(FakeApi::healthy(), sink);

    let summary = orchestrator
        .run(two_windows(&["steps", "weight", "heart_rate"]))
        .unwrap();

    assert_eq!(summary.state, RunState::Completed);
    assert_eq!(harness.endpoint.refreshes.load(Ordering::SeqCst), 1);
    assert_eq!(harness.redirect.consents.load(Ordering::SeqCst), 0);

    let stored = TokenStore::new(&harness.token_path).load().unwrap().unwrap();
    assert_eq!(stored.access_token, "refreshed");
    assert_eq!(stored.refresh_token.as_deref(), Some("refresh"));
}

#[test]
fn test_failed_authentication_attempts_no_metric() {
    let dir = TempDir::new().unwrap();
    let harness = Harness::with_redirect(
        dir.path(),
        CountingRedirect {
            deny: true,
            ..Default::default()
        },
    );
    let api = FakeApi::healthy();
    let (sink, outputs) = memory_sink();
    let orchestrator = harness.orchestrator(api.clone(), sink);

    let err = orchestrator.run(two_windows(&[])).unwrap_err();

    assert!(matches!(err, SyncError::Auth(AuthError::Rejected(_))));
    assert_eq!(orchestrator.state(), RunState::AuthFailed);
    assert_eq!(api.total_calls(), 0);
    assert_eq!(outputs.flush_count(), 0);
}

#[test]
fn test_unknown_metric_is_rejected_before_auth() {
    let dir = TempDir::new().unwrap();
    let harness = Harness::new(dir.path());
    let (sink, _) = memory_sink();
    let orchestrator = harness.orchestrator(FakeApi::healthy(), sink);

    let err = orchestrator.run(two_windows(&["steps", "mood"])).unwrap_err();

    assert!(matches!(err, SyncError::Config(_)));
    assert_eq!(harness.redirect.consents.load(Ordering::SeqCst), 0);
}

#[test]
fn test_sink_failure_fails_only_that_metric() {
    let dir = TempDir::new().unwrap();
    let harness = Harness::new(dir.path());
    harness.store_credential(TimeDelta::hours(1));
    let orchestrator = harness.orchestrator(FakeApi::healthy(), Box::new(BrokenSink));

    let summary = orchestrator.run(two_windows(&["steps", "weight"])).unwrap();

    assert_eq!(summary.failed().count(), 2);
    match &summary.result("steps").unwrap().status {
        MetricStatus::Failed { error } => assert!(error.contains("disk full")),
        other => panic!("unexpected status {:?}", other),
    }
}

#[test]
fn test_repeated_runs_replace_output() {
    let dir = TempDir::new().unwrap();
    let harness = Harness::new(dir.path());
    harness.store_credential(TimeDelta::hours(1));
    let (sink, outputs) = memory_sink();
    let orchestrator = harness.orchestrator(FakeApi::healthy(), sink);

    orchestrator.run(two_windows(&["heart_rate"])).unwrap();
    let first = outputs.get("heart_rate", SyncMode::Full).unwrap();
    orchestrator.run(two_windows(&["heart_rate"])).unwrap();
    let second = outputs.get("heart_rate", SyncMode::Full).unwrap();

    assert_eq!(first, second);
    let Records::Raw(points) = second else {
        panic!("heart rate is written raw");
    };
    assert_eq!(points.len(), 2);
    assert!(points[0].start < points[1].start);
}

#[test]
fn test_concurrent_run_is_skipped() {
    let dir = TempDir::new().unwrap();
    let harness = Harness::new(dir.path());
    harness.store_credential(TimeDelta::hours(1));

    let entered = StopSignal::new();
    let release = StopSignal::new();
    let api = {
        let entered = entered.clone();
        let release = release.clone();
        FakeApi::new(move |request, _| {
            entered.stop();
            release.wait(Duration::from_secs(10));
            Ok(point_at_start(request))
        })
    };
    let (sink, _) = memory_sink();
    let orchestrator = Arc::new(harness.orchestrator(api, sink));

    let background = {
        let orchestrator = orchestrator.clone();
        thread::spawn(move || orchestrator.run(two_windows(&["steps"])))
    };
    assert!(entered.wait(Duration::from_secs(10)));

    let err = orchestrator.run(two_windows(&["steps"])).unwrap_err();
    assert!(matches!(err, SyncError::RunInProgress));

    release.stop();
    assert!(background.join().unwrap().is_ok());
}

#[test]
fn test_incremental_resumes_from_saved_state() {
    let dir = TempDir::new().unwrap();
    let harness = Harness::new(dir.path());
    harness.store_credential(TimeDelta::hours(1));
    let state_path = dir.path().join("sync_state.json");
    let last_end = Utc::now() - TimeDelta::days(3);
    SyncState::new(last_end, SyncMode::Incremental)
        .save(&state_path)
        .unwrap();

    let (sink, outputs) = memory_sink();
    let orchestrator = harness
        .orchestrator(FakeApi::healthy(), sink)
        .with_state_path(&state_path);

    let summary = orchestrator.run_incremental(vec!["steps".into()]).unwrap();

    assert_eq!(summary.mode, SyncMode::Incremental);
    assert_eq!(summary.start, last_end);
    assert!(outputs.get("steps", SyncMode::Incremental).is_some());

    let saved = SyncState::load(&state_path).unwrap().unwrap();
    assert_eq!(saved.last_window_end, summary.end);
    assert_eq!(saved.last_mode, SyncMode::Incremental);
}

#[test]
fn test_progress_events_bracket_the_run() {
    let dir = TempDir::new().unwrap();
    let harness = Harness::new(dir.path());
    harness.store_credential(TimeDelta::hours(1));
    let (tx, rx) = mpsc::channel();
    let (sink, _) = memory_sink();
    let orchestrator = harness
        .orchestrator(FakeApi::healthy(), sink)
        .with_progress(Arc::new(ChannelProgress::new(tx)));

    orchestrator.run(two_windows(&["steps"])).unwrap();
    drop(orchestrator);
    let phases: Vec<Phase> = rx.iter().map(|e| e.phase).collect();

    assert_eq!(phases.first(), Some(&Phase::RunStarted));
    assert_eq!(phases.last(), Some(&Phase::RunFinished));
    assert!(phases.contains(&Phase::Authenticated));
    assert_eq!(phases.iter().filter(|p| **p == Phase::WindowFetched).count(), 2);
}

#[test]
fn test_service_runs_full_sync_then_stops() {
    let dir = TempDir::new().unwrap();
    let harness = Harness::new(dir.path());
    harness.store_credential(TimeDelta::hours(1));
    let (sink, outputs) = memory_sink();
    let orchestrator = harness
        .orchestrator(FakeApi::healthy(), sink)
        .with_state_path(dir.path().join("sync_state.json"));

    let service = SyncService::new(orchestrator, Duration::from_secs(3600));
    let mut handle = service.start(vec!["weight".into()]).unwrap();

    let summary = handle.wait_full().unwrap().unwrap();
    assert_eq!(summary.mode, SyncMode::Full);
    assert!(outputs.get("weight", SyncMode::Full).is_some());

    handle.shutdown();
    assert!(outputs.get("weight", SyncMode::Incremental).is_none());
}

/// Poll `check` until it holds or ten seconds pass
fn eventually(check: impl Fn() -> bool) -> bool {
    let deadline = std::time::Instant::now() + Duration::from_secs(10);
    while std::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        thread::sleep(Duration::from_millis(20));
    }
    check()
}

#[test]
fn test_scheduler_runs_incremental_syncs_after_full_sync() {
    let dir = TempDir::new().unwrap();
    let harness = Harness::new(dir.path());
    harness.store_credential(TimeDelta::hours(1));
    let (sink, outputs) = memory_sink();
    let orchestrator = harness.orchestrator(FakeApi::healthy(), sink);

    let service = SyncService::new(orchestrator, Duration::from_millis(200));
    let mut handle = service.start(vec!["weight".into()]).unwrap();

    let summary = handle.wait_full().unwrap().unwrap();
    assert_eq!(summary.mode, SyncMode::Full);
    assert!(eventually(|| outputs.get("weight", SyncMode::Incremental).is_some()));

    handle.shutdown();
    let state = service.orchestrator().sync_state().unwrap();
    assert_eq!(state.last_mode, SyncMode::Incremental);
}

#[test]
fn test_failed_full_sync_waits_an_interval_before_next_run() {
    let dir = TempDir::new().unwrap();
    let harness = Harness::with_redirect(
        dir.path(),
        CountingRedirect {
            deny: true,
            ..Default::default()
        },
    );
    let api = FakeApi::healthy();
    let (sink, _) = memory_sink();
    let orchestrator = harness.orchestrator(api.clone(), sink);

    let service = SyncService::new(orchestrator, Duration::from_secs(3600));
    let mut handle = service.start(vec!["steps".into()]).unwrap();

    let err = handle.wait_full().unwrap().unwrap_err();
    assert!(matches!(err, SyncError::Auth(AuthError::Rejected(_))));
    thread::sleep(Duration::from_millis(300));

    // Only the full run asked for consent
    assert_eq!(harness.redirect.consents.load(Ordering::SeqCst), 1);
    assert_eq!(api.total_calls(), 0);
    handle.shutdown();
}

#[test]
fn test_trigger_incremental_runs_in_background() {
    let dir = TempDir::new().unwrap();
    let harness = Harness::new(dir.path());
    harness.store_credential(TimeDelta::hours(1));
    let (sink, outputs) = memory_sink();
    let orchestrator = harness.orchestrator(FakeApi::healthy(), sink);
    let service = SyncService::new(orchestrator, Duration::from_secs(3600));

    let summary = service
        .trigger_incremental(vec!["steps".into()])
        .unwrap()
        .join()
        .unwrap()
        .unwrap();

    assert_eq!(summary.mode, SyncMode::Incremental);
    assert!(summary.result("steps").unwrap().is_success());
    assert!(outputs.get("steps", SyncMode::Incremental).is_some());
    assert!(outputs.get("steps", SyncMode::Full).is_none());
}

#[test]
fn test_resume_keeps_cadence_of_last_run() {
    let dir = TempDir::new().unwrap();
    let harness = Harness::new(dir.path());
    harness.store_credential(TimeDelta::hours(1));
    let state_path = dir.path().join("sync_state.json");
    SyncState::new(Utc::now(), SyncMode::Incremental)
        .save(&state_path)
        .unwrap();

    let api = FakeApi::healthy();
    let (sink, _) = memory_sink();
    let orchestrator = harness
        .orchestrator(api.clone(), sink)
        .with_state_path(&state_path);
    let service = SyncService::new(orchestrator, Duration::from_secs(3600));

    let mut handle = service.resume(vec!["steps".into()]).unwrap();
    thread::sleep(Duration::from_millis(200));

    assert!(handle.wait_full().is_none());
    assert_eq!(api.total_calls(), 0);
    handle.shutdown();
}

#[test]
fn test_resume_runs_overdue_sync_immediately() {
    let dir = TempDir::new().unwrap();
    let harness = Harness::new(dir.path());
    harness.store_credential(TimeDelta::hours(1));
    let state_path = dir.path().join("sync_state.json");
    let last_run = Utc::now() - TimeDelta::days(2);
    SyncState {
        last_window_end: last_run,
        last_run_at: last_run,
        last_mode: SyncMode::Incremental,
    }
    .save(&state_path)
    .unwrap();

    let (sink, outputs) = memory_sink();
    let orchestrator = harness
        .orchestrator(FakeApi::healthy(), sink)
        .with_state_path(&state_path);
    let service = SyncService::new(orchestrator, Duration::from_secs(3600));

    let handle = service.resume(vec!["steps".into()]).unwrap();
    assert!(eventually(|| outputs.get("steps", SyncMode::Incremental).is_some()));
    handle.shutdown();

    let saved = SyncState::load(&state_path).unwrap().unwrap();
    assert!(saved.last_run_at > last_run);
}

#[test]
fn test_sync_state_is_recorded_before_run_lock_is_released() {
    let dir = TempDir::new().unwrap();
    let harness = Harness::new(dir.path());
    harness.store_credential(TimeDelta::hours(1));

    let finishing = StopSignal::new();
    let release = StopSignal::new();
    let listener = {
        let finishing = finishing.clone();
        let release = release.clone();
        move |event: &health::sync::ProgressEvent| {
            if event.phase == Phase::RunFinished {
                finishing.stop();
                release.wait(Duration::from_secs(10));
            }
        }
    };
    let (sink, _) = memory_sink();
    let orchestrator = Arc::new(
        harness
            .orchestrator(FakeApi::healthy(), sink)
            .with_state_path(dir.path().join("sync_state.json"))
            .with_progress(Arc::new(listener)),
    );

    let background = {
        let orchestrator = orchestrator.clone();
        thread::spawn(move || orchestrator.run(two_windows(&["steps"])))
    };
    assert!(finishing.wait(Duration::from_secs(10)));

    // The finishing run still holds the lock, and its state is already visible
    let recorded = orchestrator.sync_state().unwrap();
    assert_eq!(recorded.last_window_end, day(2022, 3, 1));
    assert!(matches!(
        orchestrator.run_incremental(vec!["steps".into()]),
        Err(SyncError::RunInProgress)
    ));

    release.stop();
    assert!(background.join().unwrap().is_ok());
}
