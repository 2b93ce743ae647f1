//! Progress events emitted while a run executes

use log::{debug, info, warn};
use std::fmt;
use std::sync::mpsc::Sender;

/// Stage of a run an event belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    RunStarted,
    Authenticating,
    Authenticated,
    AuthFailed,
    MetricStarted,
    WindowFetched,
    WindowEmpty,
    Retrying,
    /// A window was given up on after the retry bound
    WindowLost,
    MetricFinished,
    /// Final event of a run; the detail lists the files written
    RunFinished,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::RunStarted => "run started",
            Self::Authenticating => "authenticating",
            Self::Authenticated => "authenticated",
            Self::AuthFailed => "auth failed",
            Self::MetricStarted => "metric started",
            Self::WindowFetched => "window fetched",
            Self::WindowEmpty => "window empty",
            Self::Retrying => "retrying",
            Self::WindowLost => "window lost",
            Self::MetricFinished => "metric finished",
            Self::RunFinished => "run finished",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressEvent {
    /// Metric key, absent for run-level events
    pub metric: Option<String>,
    pub phase: Phase,
    pub detail: String,
}

impl ProgressEvent {
    pub fn run(phase: Phase, detail: impl Into<String>) -> Self {
        Self {
            metric: None,
            phase,
            detail: detail.into(),
        }
    }

    pub fn metric(metric: &str, phase: Phase, detail: impl Into<String>) -> Self {
        Self {
            metric: Some(metric.to_string()),
            phase,
            detail: detail.into(),
        }
    }
}

/// Receives progress events; called on the thread running the sync
pub trait ProgressListener: Send + Sync {
    fn on_event(&self, event: &ProgressEvent);
}

impl<F> ProgressListener for F
where
    F: Fn(&ProgressEvent) + Send + Sync,
{
    fn on_event(&self, event: &ProgressEvent) {
        self(event)
    }
}

/// Forwards events to the `log` facade
#[derive(Debug, Clone, Copy, Default)]
pub struct LogProgress;

impl ProgressListener for LogProgress {
    fn on_event(&self, event: &ProgressEvent) {
        let scope = event.metric.as_deref().unwrap_or("sync");
        match event.phase {
            Phase::WindowFetched | Phase::WindowEmpty | Phase::Retrying => {
                debug!("[{}] {}: {}", scope, event.phase, event.detail)
            }
            Phase::WindowLost | Phase::AuthFailed => {
                warn!("[{}] {}: {}", scope, event.phase, event.detail)
            }
            _ => info!("[{}] {}: {}", scope, event.phase, event.detail),
        }
    }
}

/// Sends events over a channel, e.g. to a UI thread
pub struct ChannelProgress {
    sender: Sender<ProgressEvent>,
}

impl ChannelProgress {
    pub fn new(sender: Sender<ProgressEvent>) -> Self {
        Self { sender }
    }
}

impl ProgressListener for ChannelProgress {
    fn on_event(&self, event: &ProgressEvent) {
        // A dropped receiver just means nobody is watching
        let _ = self.sender.send(event.clone());
    }
}
