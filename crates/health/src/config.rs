//! Configuration loading for the sync engine
//!
//! OAuth client credentials are loaded from (in order of priority):
//! 1. Environment variables `GOOGLE_CLIENT_ID` / `GOOGLE_CLIENT_SECRET`
//! 2. `oauth_config.json` in the working directory
//! 3. `oauth_config.json` in the fitsync config directory
//!
//! Sync tuning lives in `settings.json` in the config directory; every field
//! is optional.

use chrono::{NaiveDate, NaiveTime, TimeDelta, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::ConfigError;
use crate::sync::{RetryPolicy, SyncOptions};

/// App registration filename
pub const OAUTH_CONFIG_FILE: &str = "oauth_config.json";

/// Settings filename in the config directory
pub const SETTINGS_FILE: &str = "settings.json";

const MAX_WINDOW_DAYS: i64 = 365;
const MAX_LOOKBACK_DAYS: i64 = 3650;
const MAX_INTERVAL_HOURS: u64 = 24 * 365;

const CLIENT_ID_VAR: &str = "GOOGLE_CLIENT_ID";
const CLIENT_SECRET_VAR: &str = "GOOGLE_CLIENT_SECRET";

/// OAuth client registration for the Fitness API
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OAuthClientConfig {
    pub client_id: String,
    pub client_secret: String,
}

/// Either a flat `{client_id, client_secret}` file or the Google Cloud
/// Console download with an `installed` or `web` section
#[derive(Deserialize)]
struct ClientFile {
    client_id: Option<String>,
    client_secret: Option<String>,
    installed: Option<ClientSection>,
    web: Option<ClientSection>,
}

#[derive(Deserialize)]
struct ClientSection {
    client_id: String,
    client_secret: String,
}

impl OAuthClientConfig {
    /// Load from the environment, then the candidate files
    pub fn load() -> Result<Self, ConfigError> {
        let mut candidates = vec![PathBuf::from(OAUTH_CONFIG_FILE)];
        if let Some(path) = config::config_path(OAUTH_CONFIG_FILE) {
            candidates.push(path);
        }
        Self::resolve(|key| std::env::var(key).ok(), &candidates)
    }

    /// Resolve with an explicit environment lookup and candidate file list
    pub fn resolve(
        env: impl Fn(&str) -> Option<String>,
        candidates: &[PathBuf],
    ) -> Result<Self, ConfigError> {
        if let Some(config) = Self::from_env(env) {
            return Ok(config);
        }

        match candidates.iter().find(|p| p.exists()) {
            Some(path) => Self::from_file(path),
            None => Err(ConfigError::MissingClientCredentials {
                file: OAUTH_CONFIG_FILE.to_string(),
            }),
        }
    }

    /// Both variables must be set and non-empty
    pub fn from_env(env: impl Fn(&str) -> Option<String>) -> Option<Self> {
        let client_id = env(CLIENT_ID_VAR).filter(|v| !v.is_empty())?;
        let client_secret = env(CLIENT_SECRET_VAR).filter(|v| !v.is_empty())?;
        Some(Self {
            client_id,
            client_secret,
        })
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::InvalidClientFile {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        Self::from_json(&content, &path.display().to_string())
    }

    /// Parse a client file; `origin` names it in errors
    pub fn from_json(json: &str, origin: &str) -> Result<Self, ConfigError> {
        let invalid = |message: String| ConfigError::InvalidClientFile {
            path: origin.to_string(),
            message,
        };

        let file: ClientFile = serde_json::from_str(json).map_err(|e| invalid(e.to_string()))?;

        if let Some(section) = file.installed.or(file.web) {
            return Ok(Self {
                client_id: section.client_id,
                client_secret: section.client_secret,
            });
        }

        match (file.client_id, file.client_secret) {
            (Some(client_id), Some(client_secret)) => Ok(Self {
                client_id,
                client_secret,
            }),
            _ => Err(invalid(
                "expected client_id and client_secret, or an 'installed' or 'web' section".into(),
            )),
        }
    }
}

/// User-tunable sync settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncSettings {
    /// Root under which metric folders are written
    pub output_dir: PathBuf,
    /// First day covered by a full sync
    pub history_start: NaiveDate,
    pub window_days: i64,
    pub bucket_hours: i64,
    pub max_attempts: u32,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
    pub rate_limit_delay_secs: u64,
    pub request_timeout_secs: u64,
    /// Time between periodic incremental syncs
    pub interval_hours: u64,
    pub lookback_days: i64,
    /// Metric keys synced when none are given; empty means all
    pub metrics: Vec<String>,
}

impl Default for SyncSettings {
    fn default() -> Self {
        let retry = RetryPolicy::default();
        Self {
            output_dir: PathBuf::from("."),
            history_start: NaiveDate::from_ymd_opt(2022, 1, 1).unwrap_or_default(),
            window_days: 30,
            bucket_hours: 24,
            max_attempts: retry.max_attempts,
            backoff_base_ms: retry.base_delay.as_millis() as u64,
            backoff_max_ms: retry.max_delay.as_millis() as u64,
            rate_limit_delay_secs: retry.rate_limit_delay.as_secs(),
            request_timeout_secs: 60,
            interval_hours: 24,
            lookback_days: 1,
            metrics: Vec::new(),
        }
    }
}

impl SyncSettings {
    /// Load `settings.json` from the config directory, or defaults if absent
    pub fn load() -> Result<Self, ConfigError> {
        match config::config_path(SETTINGS_FILE) {
            Some(path) if path.exists() => Self::load_file(&path),
            _ => Ok(Self::default()),
        }
    }

    pub fn load_file(path: &Path) -> Result<Self, ConfigError> {
        let invalid = |message: String| ConfigError::InvalidSettings {
            path: path.display().to_string(),
            message,
        };
        let settings: Self =
            config::load_json_file(path).map_err(|e| invalid(format!("{:#}", e)))?;
        settings.check().map_err(invalid)?;
        Ok(settings)
    }

    /// Range checks for fields that become time spans
    fn check(&self) -> Result<(), String> {
        if !(1..=MAX_WINDOW_DAYS).contains(&self.window_days) {
            return Err(format!(
                "window_days must be between 1 and {}, got {}",
                MAX_WINDOW_DAYS, self.window_days
            ));
        }
        if !(1..=self.window_days * 24).contains(&self.bucket_hours) {
            return Err(format!(
                "bucket_hours must be between 1 and the window ({} hours), got {}",
                self.window_days * 24,
                self.bucket_hours
            ));
        }
        if !(0..=MAX_LOOKBACK_DAYS).contains(&self.lookback_days) {
            return Err(format!(
                "lookback_days must be between 0 and {}, got {}",
                MAX_LOOKBACK_DAYS, self.lookback_days
            ));
        }
        if !(1..=MAX_INTERVAL_HOURS).contains(&self.interval_hours) {
            return Err(format!(
                "interval_hours must be between 1 and {}, got {}",
                MAX_INTERVAL_HOURS, self.interval_hours
            ));
        }
        if self.request_timeout_secs == 0 {
            return Err("request_timeout_secs must be positive".to_string());
        }
        Ok(())
    }

    pub fn to_options(&self) -> Result<SyncOptions, ConfigError> {
        let invalid = |message: String| ConfigError::InvalidSettings {
            path: SETTINGS_FILE.to_string(),
            message,
        };
        self.check().map_err(invalid)?;
        let out_of_range = |field: &str| invalid(format!("{} out of range", field));

        let defaults = RetryPolicy::default();
        Ok(SyncOptions {
            window_size: TimeDelta::try_days(self.window_days)
                .ok_or_else(|| out_of_range("window_days"))?,
            bucket: TimeDelta::try_hours(self.bucket_hours)
                .ok_or_else(|| out_of_range("bucket_hours"))?,
            history_start: Utc.from_utc_datetime(&self.history_start.and_time(NaiveTime::MIN)),
            incremental_lookback: TimeDelta::try_days(self.lookback_days)
                .ok_or_else(|| out_of_range("lookback_days"))?,
            retry: RetryPolicy {
                max_attempts: self.max_attempts,
                base_delay: Duration::from_millis(self.backoff_base_ms),
                max_delay: Duration::from_millis(self.backoff_max_ms),
                rate_limit_delay: Duration::from_secs(self.rate_limit_delay_secs),
                ..defaults
            },
        })
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_hours.clamp(1, MAX_INTERVAL_HOURS) * 3600)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}
