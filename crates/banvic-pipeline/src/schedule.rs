//! Daily trigger
//!
//! Fires the fan-in pipeline on a cron schedule. Missed fires are not caught
//! up: after each run the next fire time is computed from the current clock.

use chrono::{DateTime, Utc};
use cron::Schedule;
use std::str::FromStr;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::error::{PipelineError, PipelineResult};
use crate::pipeline::Pipeline;

/// A parsed cron expression evaluated in UTC
#[derive(Debug, Clone)]
pub struct DailySchedule {
    expression: String,
    schedule: Schedule,
}

impl DailySchedule {
    /// Parse a six- or seven-field cron expression (seconds first)
    ///
    /// Classic five-field expressions such as `35 4 * * *` are accepted and
    /// fire at second zero.
    pub fn parse(expression: &str) -> PipelineResult<Self> {
        let trimmed = expression.trim();
        let normalized = if trimmed.split_whitespace().count() == 5 {
            format!("0 {}", trimmed)
        } else {
            trimmed.to_string()
        };

        let schedule = Schedule::from_str(&normalized).map_err(|e| {
            PipelineError::Config(format!("Invalid schedule '{}': {}", expression, e))
        })?;

        Ok(Self {
            expression: expression.to_string(),
            schedule,
        })
    }

    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// First fire time strictly after `after`
    pub fn next_after(&self, after: &DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedule.after(after).next()
    }

    /// Run the pipeline at every fire time until Ctrl-C
    pub async fn run_forever(&self, pipeline: &Pipeline) -> PipelineResult<()> {
        info!(schedule = %self.expression, "Daily trigger started");

        loop {
            let now = Utc::now();
            let Some(next) = self.next_after(&now) else {
                warn!(schedule = %self.expression, "Schedule has no future fire times");
                return Ok(());
            };

            let wait = (next - now).to_std().unwrap_or(Duration::ZERO);
            info!(next_run = %next, "Waiting for next scheduled run");

            tokio::select! {
                _ = tokio::time::sleep(wait) => {},
                _ = tokio::signal::ctrl_c() => {
                    info!("Shutdown signal received, stopping daily trigger");
                    return Ok(());
                },
            }

            let report = pipeline.run(next.date_naive()).await;
            if report.succeeded() {
                info!(capture_date = %report.capture_date, "Scheduled run succeeded");
            } else {
                error!(capture_date = %report.capture_date, "Scheduled run failed");
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_default_schedule_fires_daily_at_0435() {
        let schedule = DailySchedule::parse(crate::config::DEFAULT_SCHEDULE).unwrap();
        let from = Utc.with_ymd_and_hms(2025, 1, 1, 12, 0, 0).unwrap();

        let next = schedule.next_after(&from).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2025, 1, 2, 4, 35, 0).unwrap());

        let after_that = schedule.next_after(&next).unwrap();
        assert_eq!(after_that, Utc.with_ymd_and_hms(2025, 1, 3, 4, 35, 0).unwrap());
    }

    #[test]
    fn test_five_field_expression_is_accepted() {
        let schedule = DailySchedule::parse("35 4 * * *").unwrap();
        let from = Utc.with_ymd_and_hms(2025, 1, 1, 4, 0, 0).unwrap();
        assert_eq!(
            schedule.next_after(&from).unwrap(),
            Utc.with_ymd_and_hms(2025, 1, 1, 4, 35, 0).unwrap()
        );
    }

    #[test]
    fn test_invalid_expression() {
        assert!(matches!(
            DailySchedule::parse("not a cron").unwrap_err(),
            PipelineError::Config(_)
        ));
    }
}
