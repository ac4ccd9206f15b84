//! Fan-in runner
//!
//! ```text
//! postgres_extract ──┐
//!                    ├──> load_dw
//! extract_csv ───────┘
//! ```
//!
//! The two extractors run concurrently with no ordering between them. The
//! loader starts only when both succeeded; otherwise it is reported as
//! blocked by its upstream and never touches the warehouse.

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use std::future::Future;
use std::time::Duration;
use tracing::{info, warn};

use crate::config::PipelineConfig;
use crate::db::ConnectionProvider;
use crate::error::{PipelineResult, StageError};
use crate::extract::{FlatFileExtractor, SourceTableExtractor};
use crate::load::WarehouseLoader;

/// The three units of work
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    PostgresExtract,
    CsvExtract,
    LoadWarehouse,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::PostgresExtract => "postgres_extract",
            Stage::CsvExtract => "extract_csv",
            Stage::LoadWarehouse => "load_dw",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How often a failed unit is re-attempted before it is reported failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            delay: Duration::ZERO,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::none()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum UnitOutcome {
    Succeeded { attempts: u32, summary: String },
    Failed { attempts: u32, error: String },
    /// Not run because a predecessor failed
    UpstreamFailed,
}

impl UnitOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, UnitOutcome::Succeeded { .. })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct UnitReport {
    pub stage: Stage,
    pub outcome: UnitOutcome,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub capture_date: NaiveDate,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub units: Vec<UnitReport>,
}

impl RunReport {
    pub fn succeeded(&self) -> bool {
        self.units.iter().all(|u| u.outcome.is_success())
    }

    pub fn outcome(&self, stage: Stage) -> Option<&UnitOutcome> {
        self.units
            .iter()
            .find(|u| u.stage == stage)
            .map(|u| &u.outcome)
    }
}

pub struct Pipeline {
    sql_extractor: SourceTableExtractor,
    csv_extractor: FlatFileExtractor,
    loader: WarehouseLoader,
    retry: RetryPolicy,
}

impl Pipeline {
    pub fn new(
        sql_extractor: SourceTableExtractor,
        csv_extractor: FlatFileExtractor,
        loader: WarehouseLoader,
    ) -> Self {
        Self {
            sql_extractor,
            csv_extractor,
            loader,
            retry: RetryPolicy::none(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Wire the Postgres-backed units from configuration
    ///
    /// Both connection ids must resolve. Pools are created lazily; connection
    /// failures surface inside the unit that first uses them.
    pub fn from_config(
        config: &PipelineConfig,
        connections: &ConnectionProvider,
    ) -> PipelineResult<Self> {
        Ok(Self::new(
            SourceTableExtractor::from_config(config, connections)?,
            FlatFileExtractor::from_config(config),
            WarehouseLoader::from_config(config, connections)?,
        )
        .with_retry(RetryPolicy {
            max_retries: config.max_retries,
            delay: config.retry_delay(),
        }))
    }

    /// One full run: both extractors, then the loader if both succeeded
    pub async fn run(&self, capture_date: NaiveDate) -> RunReport {
        let started_at = Utc::now();
        info!(
            %capture_date,
            tables = self.sql_extractor.tables().len(),
            flat_file = %self.csv_extractor.source_path().display(),
            "Pipeline run started"
        );

        let (sql, csv) = tokio::join!(
            self.attempt(Stage::PostgresExtract, capture_date),
            self.attempt(Stage::CsvExtract, capture_date),
        );

        let load = if sql.is_success() && csv.is_success() {
            self.attempt(Stage::LoadWarehouse, capture_date).await
        } else {
            warn!(stage = %Stage::LoadWarehouse, "Skipping warehouse load: an extractor failed");
            UnitOutcome::UpstreamFailed
        };

        let report = RunReport {
            capture_date,
            started_at,
            finished_at: Utc::now(),
            units: vec![
                UnitReport { stage: Stage::PostgresExtract, outcome: sql },
                UnitReport { stage: Stage::CsvExtract, outcome: csv },
                UnitReport { stage: Stage::LoadWarehouse, outcome: load },
            ],
        };

        info!(
            %capture_date,
            succeeded = report.succeeded(),
            "Pipeline run finished"
        );
        report
    }

    /// Run a single unit once, ignoring dependencies and retries
    pub async fn run_stage(&self, stage: Stage, capture_date: NaiveDate) -> Result<String, StageError> {
        match stage {
            Stage::PostgresExtract => self
                .sql_extractor
                .run(capture_date)
                .await
                .map(|r| r.summary()),
            Stage::CsvExtract => self
                .csv_extractor
                .run(capture_date)
                .await
                .map(|r| r.summary()),
            Stage::LoadWarehouse => self.loader.run(capture_date).await.map(|r| r.summary()),
        }
    }

    async fn attempt(&self, stage: Stage, capture_date: NaiveDate) -> UnitOutcome {
        with_retry(stage, self.retry, || self.run_stage(stage, capture_date)).await
    }
}

/// Call `unit` until it succeeds or the retry budget is spent
pub async fn with_retry<F, Fut>(stage: Stage, policy: RetryPolicy, mut unit: F) -> UnitOutcome
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<String, StageError>>,
{
    let mut attempts = 0;
    loop {
        attempts += 1;
        match unit().await {
            Ok(summary) => return UnitOutcome::Succeeded { attempts, summary },
            Err(e) if attempts <= policy.max_retries => {
                warn!(
                    %stage,
                    attempt = attempts,
                    retry_in_secs = policy.delay.as_secs(),
                    error = %e,
                    "Unit failed, retrying"
                );
                tokio::time::sleep(policy.delay).await;
            },
            Err(e) => {
                return UnitOutcome::Failed {
                    attempts,
                    error: e.to_string(),
                }
            },
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::error::PipelineError;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn failure() -> StageError {
        StageError::new(Stage::CsvExtract, PipelineError::Config("boom".into()))
    }

    #[tokio::test]
    async fn test_retry_until_success() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy {
            max_retries: 2,
            delay: Duration::ZERO,
        };

        let outcome = with_retry(Stage::CsvExtract, policy, || async {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(failure())
            } else {
                Ok("done".to_string())
            }
        })
        .await;

        assert_eq!(
            outcome,
            UnitOutcome::Succeeded {
                attempts: 3,
                summary: "done".into()
            }
        );
    }

    #[tokio::test]
    async fn test_retry_budget_exhausted() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy {
            max_retries: 1,
            delay: Duration::ZERO,
        };

        let outcome = with_retry(Stage::CsvExtract, policy, || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(failure())
        })
        .await;

        assert!(matches!(outcome, UnitOutcome::Failed { attempts: 2, ref error } if error.contains("extract_csv failed")));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_stage_names() {
        assert_eq!(Stage::PostgresExtract.to_string(), "postgres_extract");
        assert_eq!(Stage::CsvExtract.to_string(), "extract_csv");
        assert_eq!(Stage::LoadWarehouse.to_string(), "load_dw");
    }
}
