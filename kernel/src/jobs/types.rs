//! Job records and their lifecycle states.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

/// Whether a job runs once or on a cron schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    /// Runs once after being queued.
    OneOff,
    /// Re-armed after every run from its cron expression.
    Scheduled,
}

impl JobType {
    /// Stored column value.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::OneOff => "one_off",
            Self::Scheduled => "scheduled",
        }
    }

    /// Parses a stored column value.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "one_off" => Some(Self::OneOff),
            "scheduled" => Some(Self::Scheduled),
            _ => None,
        }
    }
}

/// Job lifecycle state, also used for the outcome of the last run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// One-off job waiting to be claimed.
    Queued,
    /// Claimed by a runner.
    Running,
    /// Finished successfully.
    Completed,
    /// Finished with an error, or has an invalid cron expression.
    Failed,
    /// Waiting for its next run time.
    Scheduled,
    /// Canceled by the owning applet; never claimed again.
    Canceled,
}

impl JobStatus {
    /// Stored column value.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Scheduled => "scheduled",
            Self::Canceled => "canceled",
        }
    }

    /// Parses a stored column value.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "queued" => Some(Self::Queued),
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "scheduled" => Some(Self::Scheduled),
            "canceled" => Some(Self::Canceled),
            _ => None,
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Composite key of a job row.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct JobKey {
    /// Owning tenant.
    pub tenant_id: String,
    /// Owning applet.
    pub applet_id: String,
    /// Job identifier, unique within the tenant and applet.
    pub job_id: String,
}

impl fmt::Display for JobKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.tenant_id, self.applet_id, self.job_id)
    }
}

/// A job a runner has transitioned to `running`.
#[derive(Debug, Clone, PartialEq)]
pub struct ClaimedJob {
    /// Row key.
    pub key: JobKey,
    /// Job type.
    pub job_type: JobType,
    /// Cron expression; empty for one-off jobs.
    pub cron_expr: String,
    /// Method to invoke.
    pub method: String,
    /// Opaque parameters.
    pub params: Value,
}

/// Full job row as exposed to applets.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobRecord {
    /// Owning tenant.
    #[serde(skip)]
    pub tenant_id: String,
    /// Owning applet.
    #[serde(skip)]
    pub applet_id: String,
    /// Job identifier.
    pub id: String,
    /// Job type.
    #[serde(rename = "type")]
    pub job_type: JobType,
    /// Cron expression; empty for one-off jobs.
    pub cron: String,
    /// Method to invoke.
    pub method: String,
    /// Opaque parameters.
    pub params: Value,
    /// Current state.
    pub status: JobStatus,
    /// Outcome of the most recent run, or the initial state.
    pub last_status: JobStatus,
    /// Error text of the most recent failed run.
    pub last_error: String,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last modification time.
    pub updated_at: DateTime<Utc>,
    /// Next due time for scheduled jobs.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_run_at: Option<DateTime<Utc>>,
    /// Time of the most recent run.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_run_at: Option<DateTime<Utc>>,
}

impl JobRecord {
    /// Row key.
    #[must_use]
    pub fn key(&self) -> JobKey {
        JobKey {
            tenant_id: self.tenant_id.clone(),
            applet_id: self.applet_id.clone(),
            job_id: self.id.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn statuses_round_trip_through_column_values() {
        for status in [
            JobStatus::Queued,
            JobStatus::Running,
            JobStatus::Completed,
            JobStatus::Failed,
            JobStatus::Scheduled,
            JobStatus::Canceled,
        ] {
            assert_eq!(JobStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(JobStatus::parse("paused"), None);
        assert_eq!(JobType::parse("one_off"), Some(JobType::OneOff));
    }

    #[test]
    fn record_serializes_in_applet_shape() {
        let created = DateTime::from_timestamp_millis(1_700_000_000_000).unwrap();
        let record = JobRecord {
            tenant_id: "t".into(),
            applet_id: "crm".into(),
            id: "j1".into(),
            job_type: JobType::OneOff,
            cron: String::new(),
            method: "crm.sync".into(),
            params: json!({"a": 1}),
            status: JobStatus::Queued,
            last_status: JobStatus::Queued,
            last_error: String::new(),
            created_at: created,
            updated_at: created,
            next_run_at: None,
            last_run_at: None,
        };
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(
            value,
            json!({
                "id": "j1",
                "type": "one_off",
                "cron": "",
                "method": "crm.sync",
                "params": {"a": 1},
                "status": "queued",
                "lastStatus": "queued",
                "lastError": "",
                "createdAt": "2023-11-14T22:13:20Z",
                "updatedAt": "2023-11-14T22:13:20Z",
            })
        );
    }
}
