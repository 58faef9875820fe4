//! Queued and scheduled applet jobs.

pub mod cron;
pub mod methods;
pub mod runner;
pub mod store;
pub mod types;

pub use cron::{CronCrateEvaluator, CronError, CronEvaluator};
pub use methods::register_job_methods;
pub use runner::{JobRunner, TickReport};
pub use store::{JobStore, JobStoreError};
pub use types::{ClaimedJob, JobKey, JobRecord, JobStatus, JobType};
