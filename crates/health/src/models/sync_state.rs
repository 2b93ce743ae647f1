//! Sync state tracking for incremental runs

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;

use super::SyncMode;

/// Where the last run stopped
///
/// Persisted next to the token so an incremental run after a restart
/// resumes from the last attempted window end.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncState {
    /// End of the last window attempted by a finished run
    pub last_window_end: DateTime<Utc>,
    /// When that run finished
    pub last_run_at: DateTime<Utc>,
    pub last_mode: SyncMode,
}

impl SyncState {
    /// File name in the config directory
    pub const FILE_NAME: &'static str = "sync_state.json";

    pub fn new(last_window_end: DateTime<Utc>, mode: SyncMode) -> Self {
        Self {
            last_window_end,
            last_run_at: Utc::now(),
            last_mode: mode,
        }
    }

    /// Load from `path`; a missing file is not an error
    pub fn load(path: &Path) -> Result<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }
        config::load_json_file(path).map(Some)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        config::save_json_file(path, self)
    }
}
