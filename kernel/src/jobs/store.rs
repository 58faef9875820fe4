//! SQLite-backed job table.
//!
//! Claims are a single `UPDATE ... RETURNING` statement whose `WHERE` clause
//! re-checks the expected status. SQLite serializes writers, so a row is
//! claimed by at most one statement and a concurrent claimer simply gets
//! fewer (or zero) rows back.

use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::Row;
use sqlx::sqlite::{SqlitePool, SqliteRow};
use tracing::{error, instrument};
use uuid::Uuid;

use crate::jobs::types::{ClaimedJob, JobKey, JobRecord, JobStatus, JobType};

/// Default deadline for a single store query.
pub const DEFAULT_QUERY_TIMEOUT: Duration = Duration::from_secs(5);

const SCHEMA: &str = r"
CREATE TABLE IF NOT EXISTS applet_engine_jobs (
    tenant_id   TEXT NOT NULL,
    applet_id   TEXT NOT NULL,
    job_id      TEXT NOT NULL,
    job_type    TEXT NOT NULL,
    cron_expr   TEXT NOT NULL DEFAULT '',
    method_name TEXT NOT NULL,
    params      TEXT NOT NULL DEFAULT 'null',
    status      TEXT NOT NULL,
    next_run_at INTEGER,
    last_run_at INTEGER,
    last_status TEXT NOT NULL DEFAULT '',
    last_error  TEXT NOT NULL DEFAULT '',
    created_at  INTEGER NOT NULL,
    updated_at  INTEGER NOT NULL,
    PRIMARY KEY (tenant_id, applet_id, job_id)
);
CREATE INDEX IF NOT EXISTS applet_engine_jobs_queued_idx
    ON applet_engine_jobs (status, job_type, created_at);
CREATE INDEX IF NOT EXISTS applet_engine_jobs_due_idx
    ON applet_engine_jobs (status, job_type, next_run_at);
";

const CLAIM_QUEUED: &str = r"
UPDATE applet_engine_jobs
SET status = 'running', last_status = 'running', last_error = '', updated_at = ?1
WHERE (tenant_id, applet_id, job_id) IN (
    SELECT tenant_id, applet_id, job_id FROM applet_engine_jobs
    WHERE status = 'queued' AND job_type = 'one_off'
    ORDER BY created_at
    LIMIT ?2
)
AND status = 'queued'
RETURNING tenant_id, applet_id, job_id, job_type, cron_expr, method_name, params,
          created_at, next_run_at
";

const CLAIM_DUE_SCHEDULED: &str = r"
UPDATE applet_engine_jobs
SET status = 'running', last_status = 'running', last_error = '', updated_at = ?1
WHERE (tenant_id, applet_id, job_id) IN (
    SELECT tenant_id, applet_id, job_id FROM applet_engine_jobs
    WHERE status = 'scheduled' AND job_type = 'scheduled'
      AND next_run_at IS NOT NULL AND next_run_at <= ?1
    ORDER BY next_run_at, created_at
    LIMIT ?2
)
AND status = 'scheduled'
RETURNING tenant_id, applet_id, job_id, job_type, cron_expr, method_name, params,
          created_at, next_run_at
";

const SELECT_RECORD: &str = r"
SELECT tenant_id, applet_id, job_id, job_type, cron_expr, method_name, params, status,
       next_run_at, last_run_at, last_status, last_error, created_at, updated_at
FROM applet_engine_jobs
";

/// Errors raised by the job store.
#[derive(Debug, thiserror::Error)]
pub enum JobStoreError {
    /// Database-related error.
    #[error("Database Error: {0}")]
    Db(#[from] sqlx::Error),
    /// Query exceeded its deadline.
    #[error("job store query '{0}' timed out")]
    Timeout(&'static str),
    /// Params could not be encoded.
    #[error("encode job params: {0}")]
    Encode(#[source] serde_json::Error),
    /// A stored row holds a value this version does not understand.
    #[error("corrupt job row {key}: {reason}")]
    Corrupt {
        /// Offending row.
        key: String,
        /// What was wrong.
        reason: String,
    },
}

/// Job table accessor. Cheap to clone.
#[derive(Debug, Clone)]
pub struct JobStore {
    pool: SqlitePool,
    query_timeout: Duration,
}

impl JobStore {
    /// Creates a store over `pool`.
    #[must_use]
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            query_timeout: DEFAULT_QUERY_TIMEOUT,
        }
    }

    /// Overrides the per-query deadline.
    #[must_use]
    pub fn with_query_timeout(mut self, timeout: Duration) -> Self {
        self.query_timeout = timeout;
        self
    }

    /// Returns the underlying pool.
    #[must_use]
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn bounded<T, F>(&self, op: &'static str, fut: F) -> Result<T, JobStoreError>
    where
        F: Future<Output = Result<T, sqlx::Error>>,
    {
        tokio::time::timeout(self.query_timeout, fut)
            .await
            .map_err(|_| JobStoreError::Timeout(op))?
            .map_err(JobStoreError::from)
    }

    /// Creates the job table and its indexes if missing.
    ///
    /// # Errors
    ///
    /// Returns an error if the schema cannot be applied.
    #[instrument(skip(self))]
    pub async fn migrate(&self) -> Result<(), JobStoreError> {
        self.bounded("migrate", sqlx::raw_sql(SCHEMA).execute(&self.pool))
            .await
            .map(drop)
    }

    /// Claims up to `limit` queued one-off jobs, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the claim statement fails.
    #[instrument(skip(self))]
    pub async fn claim_queued(
        &self,
        now: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<ClaimedJob>, JobStoreError> {
        let rows = self
            .bounded(
                "claim_queued",
                sqlx::query(CLAIM_QUEUED)
                    .bind(now.timestamp_millis())
                    .bind(i64::from(limit))
                    .fetch_all(&self.pool),
            )
            .await?;
        let (mut claimed, corrupt) = decode_claims(rows)?;
        self.fail_corrupt(corrupt, now).await;
        claimed.sort_by_key(|(created_at, _, _)| *created_at);
        Ok(claimed.into_iter().map(|(_, _, job)| job).collect())
    }

    /// Claims up to `limit` scheduled jobs due at `now`, by next run then
    /// creation time.
    ///
    /// # Errors
    ///
    /// Returns an error if the claim statement fails.
    #[instrument(skip(self))]
    pub async fn claim_due_scheduled(
        &self,
        now: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<ClaimedJob>, JobStoreError> {
        let rows = self
            .bounded(
                "claim_due_scheduled",
                sqlx::query(CLAIM_DUE_SCHEDULED)
                    .bind(now.timestamp_millis())
                    .bind(i64::from(limit))
                    .fetch_all(&self.pool),
            )
            .await?;
        let (mut claimed, corrupt) = decode_claims(rows)?;
        self.fail_corrupt(corrupt, now).await;
        claimed.sort_by_key(|(created_at, next_run_at, _)| (*next_run_at, *created_at));
        Ok(claimed.into_iter().map(|(_, _, job)| job).collect())
    }

    /// Fails claimed rows that cannot be decoded so they never sit in `running`.
    async fn fail_corrupt(&self, corrupt: Vec<CorruptClaim>, now: DateTime<Utc>) {
        for claim in corrupt {
            error!(job = %claim.key, error = %claim.error, "Claimed job is corrupt");
            let reason = claim.error.to_string();
            let outcome = match claim.job_type {
                JobType::OneOff => {
                    self.finish_one_off(&claim.key, JobStatus::Failed, &reason, now)
                        .await
                }
                JobType::Scheduled => self.fail_scheduled(&claim.key, &reason, now).await,
            };
            if let Err(e) = outcome {
                error!(job = %claim.key, error = %e, "Failed to record corrupt job");
            }
        }
    }

    /// Records the outcome of a claimed one-off job.
    ///
    /// # Errors
    ///
    /// Returns an error if the update fails.
    #[instrument(skip(self, last_error), fields(job = %key))]
    pub async fn finish_one_off(
        &self,
        key: &JobKey,
        status: JobStatus,
        last_error: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, JobStoreError> {
        let now = now.timestamp_millis();
        let result = self
            .bounded(
                "finish_one_off",
                sqlx::query(
                    "UPDATE applet_engine_jobs
                     SET status = ?4, last_status = ?4, last_error = ?5,
                         last_run_at = ?6, updated_at = ?6
                     WHERE tenant_id = ?1 AND applet_id = ?2 AND job_id = ?3
                       AND status = 'running'",
                )
                .bind(&key.tenant_id)
                .bind(&key.applet_id)
                .bind(&key.job_id)
                .bind(status.as_str())
                .bind(last_error)
                .bind(now)
                .execute(&self.pool),
            )
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Returns a claimed scheduled job to `scheduled` with a new due time.
    ///
    /// # Errors
    ///
    /// Returns an error if the update fails.
    #[instrument(skip(self, last_error), fields(job = %key))]
    pub async fn rearm_scheduled(
        &self,
        key: &JobKey,
        next_run_at: DateTime<Utc>,
        last_status: JobStatus,
        last_error: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, JobStoreError> {
        let now = now.timestamp_millis();
        let result = self
            .bounded(
                "rearm_scheduled",
                sqlx::query(
                    "UPDATE applet_engine_jobs
                     SET status = 'scheduled', next_run_at = ?4, last_status = ?5,
                         last_error = ?6, last_run_at = ?7, updated_at = ?7
                     WHERE tenant_id = ?1 AND applet_id = ?2 AND job_id = ?3
                       AND status = 'running'",
                )
                .bind(&key.tenant_id)
                .bind(&key.applet_id)
                .bind(&key.job_id)
                .bind(next_run_at.timestamp_millis())
                .bind(last_status.as_str())
                .bind(last_error)
                .bind(now)
                .execute(&self.pool),
            )
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Terminally fails a scheduled job whose cron expression is invalid.
    ///
    /// # Errors
    ///
    /// Returns an error if the update fails.
    #[instrument(skip(self, last_error), fields(job = %key))]
    pub async fn fail_scheduled(
        &self,
        key: &JobKey,
        last_error: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, JobStoreError> {
        let now = now.timestamp_millis();
        let result = self
            .bounded(
                "fail_scheduled",
                sqlx::query(
                    "UPDATE applet_engine_jobs
                     SET status = 'failed', next_run_at = NULL, last_status = 'failed',
                         last_error = ?4, last_run_at = ?5, updated_at = ?5
                     WHERE tenant_id = ?1 AND applet_id = ?2 AND job_id = ?3
                       AND status = 'running'",
                )
                .bind(&key.tenant_id)
                .bind(&key.applet_id)
                .bind(&key.job_id)
                .bind(last_error)
                .bind(now)
                .execute(&self.pool),
            )
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Queues a one-off job.
    ///
    /// # Errors
    ///
    /// Returns an error if the params cannot be encoded or the insert fails.
    #[instrument(skip(self, params))]
    pub async fn enqueue(
        &self,
        tenant_id: &str,
        applet_id: &str,
        method: &str,
        params: Value,
        now: DateTime<Utc>,
    ) -> Result<JobRecord, JobStoreError> {
        let record = new_record(
            tenant_id,
            applet_id,
            JobType::OneOff,
            "",
            method,
            params,
            JobStatus::Queued,
            None,
            now,
        );
        self.insert(&record).await?;
        Ok(record)
    }

    /// Creates a scheduled job first due at `next_run_at`.
    ///
    /// # Errors
    ///
    /// Returns an error if the params cannot be encoded or the insert fails.
    #[allow(clippy::too_many_arguments)]
    #[instrument(skip(self, params))]
    pub async fn schedule(
        &self,
        tenant_id: &str,
        applet_id: &str,
        cron_expr: &str,
        method: &str,
        params: Value,
        next_run_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<JobRecord, JobStoreError> {
        let record = new_record(
            tenant_id,
            applet_id,
            JobType::Scheduled,
            cron_expr,
            method,
            params,
            JobStatus::Scheduled,
            Some(next_run_at),
            now,
        );
        self.insert(&record).await?;
        Ok(record)
    }

    async fn insert(&self, record: &JobRecord) -> Result<(), JobStoreError> {
        let params = serde_json::to_string(&record.params).map_err(JobStoreError::Encode)?;
        self.bounded(
            "insert",
            sqlx::query(
                "INSERT INTO applet_engine_jobs
                 (tenant_id, applet_id, job_id, job_type, cron_expr, method_name, params,
                  status, next_run_at, last_run_at, last_status, last_error, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, NULL, ?10, '', ?11, ?11)",
            )
            .bind(&record.tenant_id)
            .bind(&record.applet_id)
            .bind(&record.id)
            .bind(record.job_type.as_str())
            .bind(&record.cron)
            .bind(&record.method)
            .bind(params)
            .bind(record.status.as_str())
            .bind(record.next_run_at.map(|t| t.timestamp_millis()))
            .bind(record.last_status.as_str())
            .bind(record.created_at.timestamp_millis())
            .execute(&self.pool),
        )
        .await
        .map(drop)
    }

    /// Lists the jobs of one applet within one tenant, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails or a row is corrupt.
    #[instrument(skip(self))]
    pub async fn list(
        &self,
        tenant_id: &str,
        applet_id: &str,
    ) -> Result<Vec<JobRecord>, JobStoreError> {
        let sql = format!(
            "{SELECT_RECORD} WHERE tenant_id = ?1 AND applet_id = ?2 ORDER BY created_at, job_id"
        );
        let rows = self
            .bounded(
                "list",
                sqlx::query(&sql)
                    .bind(tenant_id)
                    .bind(applet_id)
                    .fetch_all(&self.pool),
            )
            .await?;
        rows.iter().map(decode_record).collect()
    }

    /// Loads one job.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails or the row is corrupt.
    #[instrument(skip(self), fields(job = %key))]
    pub async fn get(&self, key: &JobKey) -> Result<Option<JobRecord>, JobStoreError> {
        let sql = format!("{SELECT_RECORD} WHERE tenant_id = ?1 AND applet_id = ?2 AND job_id = ?3");
        let row = self
            .bounded(
                "get",
                sqlx::query(&sql)
                    .bind(&key.tenant_id)
                    .bind(&key.applet_id)
                    .bind(&key.job_id)
                    .fetch_optional(&self.pool),
            )
            .await?;
        row.as_ref().map(decode_record).transpose()
    }

    /// Cancels a job. Returns whether the job existed.
    ///
    /// # Errors
    ///
    /// Returns an error if the update fails.
    #[instrument(skip(self), fields(job = %key))]
    pub async fn cancel(&self, key: &JobKey, now: DateTime<Utc>) -> Result<bool, JobStoreError> {
        let result = self
            .bounded(
                "cancel",
                sqlx::query(
                    "UPDATE applet_engine_jobs
                     SET status = 'canceled', last_status = 'canceled', last_error = '',
                         next_run_at = NULL, updated_at = ?4
                     WHERE tenant_id = ?1 AND applet_id = ?2 AND job_id = ?3",
                )
                .bind(&key.tenant_id)
                .bind(&key.applet_id)
                .bind(&key.job_id)
                .bind(now.timestamp_millis())
                .execute(&self.pool),
            )
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[allow(clippy::too_many_arguments)]
fn new_record(
    tenant_id: &str,
    applet_id: &str,
    job_type: JobType,
    cron: &str,
    method: &str,
    params: Value,
    status: JobStatus,
    next_run_at: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> JobRecord {
    // Stored at millisecond precision; keep the returned record identical.
    let now = from_millis(now.timestamp_millis()).unwrap_or(now);
    JobRecord {
        tenant_id: tenant_id.to_string(),
        applet_id: applet_id.to_string(),
        id: Uuid::new_v4().to_string(),
        job_type,
        cron: cron.to_string(),
        method: method.to_string(),
        params,
        status,
        last_status: status,
        last_error: String::new(),
        created_at: now,
        updated_at: now,
        next_run_at: next_run_at.map(|t| from_millis(t.timestamp_millis()).unwrap_or(t)),
        last_run_at: None,
    }
}

fn from_millis(ms: i64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms)
}

fn decode_params(key: &JobKey, raw: &str) -> Result<Value, JobStoreError> {
    serde_json::from_str(raw).map_err(|e| JobStoreError::Corrupt {
        key: key.to_string(),
        reason: format!("params are not valid JSON: {e}"),
    })
}

struct CorruptClaim {
    key: JobKey,
    job_type: JobType,
    error: JobStoreError,
}

type DecodedClaims = (Vec<(i64, Option<i64>, ClaimedJob)>, Vec<CorruptClaim>);

fn row_key(row: &SqliteRow) -> Result<JobKey, sqlx::Error> {
    Ok(JobKey {
        tenant_id: row.try_get("tenant_id")?,
        applet_id: row.try_get("applet_id")?,
        job_id: row.try_get("job_id")?,
    })
}

fn decode_claims(rows: Vec<SqliteRow>) -> Result<DecodedClaims, JobStoreError> {
    let mut claimed = Vec::with_capacity(rows.len());
    let mut corrupt = Vec::new();
    for row in &rows {
        let key = row_key(row)?;
        let raw_type: String = row.try_get("job_type")?;
        let job_type = JobType::parse(&raw_type).ok_or_else(|| JobStoreError::Corrupt {
            key: key.to_string(),
            reason: format!("unknown job type '{raw_type}'"),
        })?;
        let raw_params: String = row.try_get("params")?;
        let params = match decode_params(&key, &raw_params) {
            Ok(params) => params,
            Err(error) => {
                corrupt.push(CorruptClaim {
                    key,
                    job_type,
                    error,
                });
                continue;
            }
        };
        claimed.push((
            row.try_get("created_at")?,
            row.try_get("next_run_at")?,
            ClaimedJob {
                job_type,
                cron_expr: row.try_get("cron_expr")?,
                method: row.try_get("method_name")?,
                params,
                key,
            },
        ));
    }
    Ok((claimed, corrupt))
}

fn decode_record(row: &SqliteRow) -> Result<JobRecord, JobStoreError> {
    let key = row_key(row)?;
    let corrupt = |reason: String| JobStoreError::Corrupt {
        key: key.to_string(),
        reason,
    };
    let raw_type: String = row.try_get("job_type")?;
    let job_type =
        JobType::parse(&raw_type).ok_or_else(|| corrupt(format!("unknown job type '{raw_type}'")))?;
    let raw_status: String = row.try_get("status")?;
    let status =
        JobStatus::parse(&raw_status).ok_or_else(|| corrupt(format!("unknown status '{raw_status}'")))?;
    let raw_last: String = row.try_get("last_status")?;
    let last_status = JobStatus::parse(&raw_last).unwrap_or(status);
    let created_ms: i64 = row.try_get("created_at")?;
    let updated_ms: i64 = row.try_get("updated_at")?;
    let created_at = from_millis(created_ms).ok_or_else(|| corrupt("created_at out of range".into()))?;
    let updated_at = from_millis(updated_ms).ok_or_else(|| corrupt("updated_at out of range".into()))?;
    let next_run_at: Option<i64> = row.try_get("next_run_at")?;
    let last_run_at: Option<i64> = row.try_get("last_run_at")?;
    let raw_params: String = row.try_get("params")?;
    let params = decode_params(&key, &raw_params)?;

    Ok(JobRecord {
        job_type,
        cron: row.try_get("cron_expr")?,
        method: row.try_get("method_name")?,
        params,
        status,
        last_status,
        last_error: row.try_get("last_error")?,
        created_at,
        updated_at,
        next_run_at: next_run_at.and_then(from_millis),
        last_run_at: last_run_at.and_then(from_millis),
        tenant_id: key.tenant_id,
        applet_id: key.applet_id,
        id: key.job_id,
    })
}
