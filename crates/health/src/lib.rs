//! Health crate - Sync engine for Google Fit metrics
//!
//! This crate provides:
//! - Metric registry and domain models (windows, points, runs)
//! - Google OAuth credential lifecycle and Fitness API client
//! - Window planning, bounded retry and per-metric fetch
//! - Sinks that write one CSV per metric and run mode
//! - Run orchestration with failure isolation and a periodic scheduler
//!
//! The engine is blocking and executor-agnostic; callers run it on their
//! own threads (see [`SyncService`]).

pub mod config;
pub mod error;
pub mod google;
pub mod models;
pub mod storage;
pub mod sync;

pub use config::{OAuthClientConfig, SyncSettings};
pub use error::{AuthError, ConfigError, FetchError, SyncError};
pub use google::{
    Credential, CredentialManager, FitnessApi, FitnessClient, LoopbackRedirect, TokenStore,
};
pub use models::{
    AggregationMode, DataPoint, MetricDescriptor, MetricKind, MetricRegistry, MetricStatus,
    RunState, RunSummary, SyncMode, SyncResult, SyncRun, SyncState, TimeWindow,
};
pub use storage::{CsvSink, MemorySink, Sink};
pub use sync::{
    // Engine
    MetricFetcher, RetryPolicy, SyncOptions, SyncOrchestrator, WindowPlanner,
    // Progress reporting
    ChannelProgress, LogProgress, Phase, ProgressEvent, ProgressListener,
    // Background operation
    StopSignal, SyncHandle, SyncService,
};
