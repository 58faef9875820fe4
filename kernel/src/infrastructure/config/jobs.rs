//! Job runner configuration.

use std::time::Duration;

use serde::Deserialize;

use crate::jobs::runner::DEFAULT_POLL_INTERVAL;

/// Job runner settings.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct JobSettings {
    /// Whether this process runs the job runner.
    pub enabled: bool,
    /// Poll interval in milliseconds. Zero or negative keeps the default.
    pub poll_interval_ms: i64,
}

impl JobSettings {
    /// Effective poll interval.
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        u64::try_from(self.poll_interval_ms)
            .ok()
            .filter(|ms| *ms > 0)
            .map_or(DEFAULT_POLL_INTERVAL, Duration::from_millis)
    }
}

impl Default for JobSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            poll_interval_ms: 2000,
        }
    }
}
