//! Error taxonomy for the sync engine
//!
//! Run-level errors ([`ConfigError`], [`AuthError`]) abort a run before any
//! fetch happens. [`FetchError`] is the classification of a single remote
//! query and never escapes a metric except for [`FetchError::Auth`].

use std::time::Duration;

/// Missing or invalid configuration. Fatal, raised before any run starts.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error(
        "OAuth client credentials not found. Set GOOGLE_CLIENT_ID and GOOGLE_CLIENT_SECRET \
         or provide {file}"
    )]
    MissingClientCredentials { file: String },

    #[error("Invalid OAuth config file {path}: {message}")]
    InvalidClientFile { path: String, message: String },

    #[error("Invalid settings file {path}: {message}")]
    InvalidSettings { path: String, message: String },

    #[error("Unknown metric: {0}")]
    UnknownMetric(String),

    #[error("Duplicate metric key in registry: {0}")]
    DuplicateMetric(String),

    #[error("Metric {0} cannot be summed per day: only scalar metrics support daily sums")]
    InvalidAggregation(String),
}

/// Consent, token exchange or refresh failure. Fatal for the run.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("Could not bind a loopback port for the OAuth redirect (tried {tried})")]
    NoLoopbackPort { tried: String },

    #[error("Authorization was rejected: {0}")]
    Rejected(String),

    #[error("Token request failed: {0}")]
    TokenRequest(String),

    #[error("Credential rejected by the API: {0}")]
    Unauthorized(String),

    #[error("Token store error: {0}")]
    Store(String),
}

/// Classification of one failed remote query
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FetchError {
    /// Quota exhausted; retry the same window after backing off
    #[error("Rate limit exceeded")]
    RateLimited { retry_after: Option<Duration> },

    /// The credential lacks the scope this metric needs
    #[error("Scope forbidden: {0}")]
    ScopeForbidden(String),

    /// Nothing recorded for this window
    #[error("No data")]
    NoData,

    /// Network or server trouble that may clear up on retry
    #[error("{0}")]
    Transient(String),

    /// The access token was rejected mid-run
    #[error("Unauthorized: {0}")]
    Auth(String),
}

impl FetchError {
    /// Whether the retry policy should try the same window again
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::RateLimited { .. } | Self::Transient(_))
    }
}

/// Errors that end a run without a summary
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error("A sync run is already in progress")]
    RunInProgress,
}
