//! Next-run computation for scheduled jobs.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use cron::Schedule;

/// Errors from evaluating a cron expression.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CronError {
    /// The expression is blank.
    #[error("cron expression is empty")]
    Empty,
    /// The expression does not parse.
    #[error("invalid cron expression '{expr}': {reason}")]
    Invalid {
        /// Offending expression.
        expr: String,
        /// Parser message.
        reason: String,
    },
    /// The expression never fires after the reference time.
    #[error("cron expression '{0}' has no upcoming run")]
    NoUpcoming(String),
}

/// Pure function computing the first fire time after a reference time.
pub trait CronEvaluator: Send + Sync {
    /// Returns the first fire time of `expr` strictly after `from`.
    ///
    /// # Errors
    ///
    /// Returns an error if `expr` is blank, unparsable or never fires again.
    fn next_run(&self, expr: &str, from: DateTime<Utc>) -> Result<DateTime<Utc>, CronError>;
}

/// Evaluator backed by the `cron` crate.
///
/// Accepts standard five-field expressions (minute precision) as well as the
/// crate's native six and seven field forms and `@hourly`-style shorthands.
#[derive(Debug, Clone, Copy, Default)]
pub struct CronCrateEvaluator;

impl CronEvaluator for CronCrateEvaluator {
    fn next_run(&self, expr: &str, from: DateTime<Utc>) -> Result<DateTime<Utc>, CronError> {
        let expr = expr.trim();
        if expr.is_empty() {
            return Err(CronError::Empty);
        }
        let normalized = if expr.split_whitespace().count() == 5 {
            format!("0 {expr}")
        } else {
            expr.to_string()
        };
        let schedule = Schedule::from_str(&normalized).map_err(|e| CronError::Invalid {
            expr: expr.to_string(),
            reason: e.to_string(),
        })?;
        schedule
            .after(&from)
            .next()
            .ok_or_else(|| CronError::NoUpcoming(expr.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 10, h, m, s).unwrap()
    }

    #[test]
    fn five_field_expressions_fire_on_minute_boundaries() {
        let next = CronCrateEvaluator
            .next_run("*/5 * * * *", at(10, 2, 30))
            .unwrap();
        assert_eq!(next, at(10, 5, 0));
    }

    #[test]
    fn next_run_is_strictly_after_reference() {
        let next = CronCrateEvaluator.next_run("0 * * * *", at(10, 0, 0)).unwrap();
        assert_eq!(next, at(11, 0, 0));
    }

    #[test]
    fn shorthand_is_accepted() {
        let next = CronCrateEvaluator.next_run("@hourly", at(10, 15, 0)).unwrap();
        assert_eq!(next, at(11, 0, 0));
    }

    #[test]
    fn garbage_is_rejected() {
        assert_eq!(
            CronCrateEvaluator.next_run("   ", at(0, 0, 0)),
            Err(CronError::Empty)
        );
        assert!(matches!(
            CronCrateEvaluator.next_run("not a cron", at(0, 0, 0)),
            Err(CronError::Invalid { .. })
        ));
        assert!(matches!(
            CronCrateEvaluator.next_run("99 * * * *", at(0, 0, 0)),
            Err(CronError::Invalid { .. })
        ));
    }
}
