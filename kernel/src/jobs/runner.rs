//! Periodic job runner.
//!
//! Every tick claims due one-off jobs, then due scheduled jobs, and delivers
//! each to the [`WorkDispatcher`]. Several runners may poll the same table.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::jobs::cron::CronEvaluator;
use crate::jobs::store::{JobStore, JobStoreError};
use crate::jobs::types::{ClaimedJob, JobStatus};
use crate::runtime::{WorkDispatcher, WorkKind, WorkUnit};

/// Default poll interval.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);
/// Jobs claimed per kind per tick.
pub const CLAIM_BATCH_SIZE: u32 = 16;

/// Counts of what one tick did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    /// One-off jobs that completed.
    pub completed: usize,
    /// One-off jobs that failed.
    pub failed: usize,
    /// Scheduled runs re-armed, whatever their outcome.
    pub rearmed: usize,
    /// Scheduled jobs terminated by an invalid cron expression.
    pub terminated: usize,
}

/// Polls the job table and dispatches claimed work.
pub struct JobRunner {
    store: JobStore,
    dispatcher: Arc<dyn WorkDispatcher>,
    cron: Arc<dyn CronEvaluator>,
    interval: Duration,
    batch_size: u32,
}

impl JobRunner {
    /// Creates a runner with the default interval and batch size.
    #[must_use]
    pub fn new(
        store: JobStore,
        dispatcher: Arc<dyn WorkDispatcher>,
        cron: Arc<dyn CronEvaluator>,
    ) -> Self {
        Self {
            store,
            dispatcher,
            cron,
            interval: DEFAULT_POLL_INTERVAL,
            batch_size: CLAIM_BATCH_SIZE,
        }
    }

    /// Sets the poll interval. A zero interval keeps the default.
    #[must_use]
    pub fn with_interval(mut self, interval: Duration) -> Self {
        if !interval.is_zero() {
            self.interval = interval;
        }
        self
    }

    /// Sets how many jobs of each kind one tick may claim.
    #[must_use]
    pub fn with_batch_size(mut self, batch_size: u32) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Polls until `shutdown` is cancelled. The first poll runs immediately.
    pub async fn run(self, shutdown: CancellationToken) {
        info!(interval_ms = self.interval.as_millis(), "Job runner started");
        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                () = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(e) = self.tick().await {
                        error!(error = %e, "Job runner poll failed");
                    }
                }
            }
        }
        info!("Job runner stopped");
    }

    /// Runs one poll.
    ///
    /// # Errors
    ///
    /// Returns an error if a claim query fails. Per-job failures are recorded
    /// on the job and never abort the batch.
    pub async fn tick(&self) -> Result<TickReport, JobStoreError> {
        let mut report = TickReport::default();
        self.process_queued(&mut report).await?;
        self.process_scheduled(&mut report).await?;
        if report != TickReport::default() {
            debug!(?report, "Job runner tick finished");
        }
        Ok(report)
    }

    async fn process_queued(&self, report: &mut TickReport) -> Result<(), JobStoreError> {
        let jobs = self.store.claim_queued(Utc::now(), self.batch_size).await?;
        for job in jobs {
            let (status, last_error) = match self.dispatch(&job).await {
                Ok(()) => (JobStatus::Completed, String::new()),
                Err(e) => {
                    error!(applet = %job.key.applet_id, job_id = %job.key.job_id, error = %e, "Queued job failed");
                    (JobStatus::Failed, e)
                }
            };
            record_processed("one_off", status);
            if status == JobStatus::Completed {
                report.completed += 1;
            } else {
                report.failed += 1;
            }
            if let Err(e) = self
                .store
                .finish_one_off(&job.key, status, &last_error, Utc::now())
                .await
            {
                error!(applet = %job.key.applet_id, job_id = %job.key.job_id, error = %e, "Failed to record job outcome");
            }
        }
        Ok(())
    }

    async fn process_scheduled(&self, report: &mut TickReport) -> Result<(), JobStoreError> {
        let jobs = self
            .store
            .claim_due_scheduled(Utc::now(), self.batch_size)
            .await?;
        for job in jobs {
            let next_run_at = match self.cron.next_run(&job.cron_expr, Utc::now()) {
                Ok(next) => next,
                Err(e) => {
                    error!(applet = %job.key.applet_id, job_id = %job.key.job_id, cron = %job.cron_expr, error = %e, "Invalid cron expression for scheduled job");
                    record_processed("scheduled", JobStatus::Failed);
                    report.terminated += 1;
                    if let Err(e) = self
                        .store
                        .fail_scheduled(&job.key, &e.to_string(), Utc::now())
                        .await
                    {
                        error!(job_id = %job.key.job_id, error = %e, "Failed to terminate scheduled job");
                    }
                    continue;
                }
            };

            let (last_status, last_error) = match self.dispatch(&job).await {
                Ok(()) => (JobStatus::Completed, String::new()),
                Err(e) => {
                    warn!(applet = %job.key.applet_id, job_id = %job.key.job_id, error = %e, "Scheduled job run failed");
                    (JobStatus::Failed, e)
                }
            };
            record_processed("scheduled", last_status);
            report.rearmed += 1;
            if let Err(e) = self
                .store
                .rearm_scheduled(&job.key, next_run_at, last_status, &last_error, Utc::now())
                .await
            {
                error!(applet = %job.key.applet_id, job_id = %job.key.job_id, error = %e, "Failed to re-arm scheduled job");
            }
        }
        Ok(())
    }

    async fn dispatch(&self, job: &ClaimedJob) -> Result<(), String> {
        let unit = WorkUnit {
            kind: WorkKind::Job,
            applet_id: job.key.applet_id.clone(),
            tenant_id: job.key.tenant_id.clone(),
            unit_id: job.key.job_id.clone(),
            method: job.method.clone(),
            params: job.params.clone(),
        };
        self.dispatcher
            .dispatch(unit)
            .await
            .map_err(|e| e.to_string())
    }
}

fn record_processed(job_type: &'static str, outcome: JobStatus) {
    metrics::counter!(
        "applet_jobs_processed_total",
        "type" => job_type,
        "outcome" => outcome.as_str()
    )
    .increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::cron::CronCrateEvaluator;
    use crate::runtime::RuntimeError;
    use anyhow::Result;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use serde_json::{Value, json};
    use sqlx::sqlite::SqlitePoolOptions;

    #[derive(Default)]
    struct ScriptedDispatcher {
        seen: Mutex<Vec<WorkUnit>>,
        fail_methods: Vec<&'static str>,
    }

    #[async_trait]
    impl WorkDispatcher for ScriptedDispatcher {
        async fn dispatch(&self, unit: WorkUnit) -> Result<(), RuntimeError> {
            let fail = self.fail_methods.contains(&unit.method.as_str());
            self.seen.lock().push(unit);
            if fail {
                return Err(RuntimeError::Handler("handler exploded".into()));
            }
            Ok(())
        }
    }

    async fn setup(dispatcher: Arc<ScriptedDispatcher>) -> Result<(JobStore, JobRunner)> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        let store = JobStore::new(pool);
        store.migrate().await?;
        let runner = JobRunner::new(store.clone(), dispatcher, Arc::new(CronCrateEvaluator));
        Ok((store, runner))
    }

    #[tokio::test]
    async fn one_off_jobs_complete_or_fail_independently() -> Result<()> {
        let dispatcher = Arc::new(ScriptedDispatcher {
            fail_methods: vec!["crm.bad"],
            ..ScriptedDispatcher::default()
        });
        let (store, runner) = setup(dispatcher.clone()).await?;
        let now = Utc::now();
        let bad = store.enqueue("t", "crm", "crm.bad", Value::Null, now).await?;
        let good = store
            .enqueue("t", "crm", "crm.good", json!({"x": 1}), now + chrono::Duration::milliseconds(1))
            .await?;

        let report = runner.tick().await?;
        assert_eq!(report.completed, 1);
        assert_eq!(report.failed, 1);

        let bad = store.get(&bad.key()).await?.unwrap();
        assert_eq!(bad.status, JobStatus::Failed);
        assert_eq!(bad.last_status, JobStatus::Failed);
        assert!(bad.last_error.contains("handler exploded"));
        assert!(bad.last_run_at.is_some());

        let good = store.get(&good.key()).await?.unwrap();
        assert_eq!(good.status, JobStatus::Completed);
        assert_eq!(good.last_error, "");

        let seen = dispatcher.seen.lock().clone();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].method, "crm.bad");
        assert_eq!(seen[1].params, json!({"x": 1}));
        assert!(seen.iter().all(|u| u.kind == WorkKind::Job && u.tenant_id == "t"));

        assert_eq!(runner.tick().await?, TickReport::default());
        Ok(())
    }

    #[tokio::test]
    async fn scheduled_jobs_rearm_after_success_and_failure() -> Result<()> {
        let dispatcher = Arc::new(ScriptedDispatcher {
            fail_methods: vec!["crm.flaky"],
            ..ScriptedDispatcher::default()
        });
        let (store, runner) = setup(dispatcher).await?;
        let due = Utc::now() - chrono::Duration::minutes(1);
        let ok = store
            .schedule("t", "crm", "* * * * *", "crm.tick", Value::Null, due, due)
            .await?;
        let flaky = store
            .schedule("t", "crm", "* * * * *", "crm.flaky", Value::Null, due, due)
            .await?;

        let report = runner.tick().await?;
        assert_eq!(report.rearmed, 2);

        let now = Utc::now();
        let ok = store.get(&ok.key()).await?.unwrap();
        assert_eq!(ok.status, JobStatus::Scheduled);
        assert_eq!(ok.last_status, JobStatus::Completed);
        assert!(ok.next_run_at.unwrap() > now - chrono::Duration::seconds(1));

        let flaky = store.get(&flaky.key()).await?.unwrap();
        assert_eq!(flaky.status, JobStatus::Scheduled);
        assert_eq!(flaky.last_status, JobStatus::Failed);
        assert!(flaky.last_error.contains("handler exploded"));
        assert!(flaky.next_run_at.is_some());

        assert_eq!(runner.tick().await?.rearmed, 0);
        Ok(())
    }

    #[tokio::test]
    async fn invalid_cron_terminates_job_for_good() -> Result<()> {
        let dispatcher = Arc::new(ScriptedDispatcher::default());
        let (store, runner) = setup(dispatcher.clone()).await?;
        let due = Utc::now() - chrono::Duration::minutes(1);
        let broken = store
            .schedule("t", "crm", "every tuesday", "crm.tick", Value::Null, due, due)
            .await?;

        let report = runner.tick().await?;
        assert_eq!(report.terminated, 1);
        assert!(dispatcher.seen.lock().is_empty());

        let broken = store.get(&broken.key()).await?.unwrap();
        assert_eq!(broken.status, JobStatus::Failed);
        assert_eq!(broken.last_status, JobStatus::Failed);
        assert_eq!(broken.next_run_at, None);
        assert!(!broken.last_error.is_empty());

        let far_future = Utc::now() + chrono::Duration::days(3650);
        assert!(store.claim_due_scheduled(far_future, 16).await?.is_empty());
        assert!(store.claim_queued(far_future, 16).await?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn run_stops_on_cancellation() -> Result<()> {
        let dispatcher = Arc::new(ScriptedDispatcher::default());
        let (store, runner) = setup(dispatcher.clone()).await?;
        store
            .enqueue("t", "crm", "crm.go", Value::Null, Utc::now())
            .await?;

        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(
            runner
                .with_interval(Duration::from_millis(10))
                .run(shutdown.clone()),
        );
        for _ in 0..100 {
            if !dispatcher.seen.lock().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        shutdown.cancel();
        handle.await?;
        assert_eq!(dispatcher.seen.lock().len(), 1);
        Ok(())
    }
}
