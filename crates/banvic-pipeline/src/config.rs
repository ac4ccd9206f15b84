//! Pipeline configuration
//!
//! Everything is static: paths, the source table list, connection ids and the
//! trigger schedule. Values come from `ETL_*` environment variables (a `.env`
//! file is honoured) and fall back to the defaults below.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{PipelineError, PipelineResult};

// ============================================================================
// Defaults
// ============================================================================

pub const DEFAULT_CSV_SOURCE_PATH: &str = "/usr/local/airflow/include/transacoes.csv";

pub const DEFAULT_LANDING_DIR: &str = "/usr/local/airflow/include/datalake";

pub const DEFAULT_SOURCE_TABLES: [&str; 6] = [
    "agencias",
    "clientes",
    "colaborador_agencia",
    "colaboradores",
    "contas",
    "propostas_credito",
];

pub const DEFAULT_SOURCE_CONN_ID: &str = "db_origem";

pub const DEFAULT_SOURCE_SCHEMA: &str = "public";

pub const DEFAULT_DW_CONN_ID: &str = "db_datawarehouse";

/// Daily at 04:35 UTC (sec min hour day-of-month month day-of-week)
pub const DEFAULT_SCHEDULE: &str = "0 35 4 * * *";

pub const DEFAULT_RETRY_DELAY_SECS: u64 = 300;

const TABLE_NAME_PATTERN: &str = r"^[A-Za-z_][A-Za-z0-9_]*$";

/// Which landing files a load run considers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LoadScope {
    /// Every accumulated `.csv` file, oldest capture first
    #[default]
    All,
    /// Only files captured on the run's date
    CaptureDate,
}

impl FromStr for LoadScope {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "all" | "history" => Ok(LoadScope::All),
            "capture_date" | "current" | "today" => Ok(LoadScope::CaptureDate),
            _ => Err(PipelineError::Config(format!(
                "Invalid ETL_LOAD_SCOPE: {}. Must be 'all' or 'capture_date'",
                s
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub csv_source_path: PathBuf,
    pub landing_dir: PathBuf,
    pub source_tables: Vec<String>,
    pub source_conn_id: String,
    pub source_schema: String,
    pub dw_conn_id: String,
    /// Six-field cron expression (seconds first), evaluated in UTC
    pub schedule: String,
    pub load_scope: LoadScope,
    /// Source tables extracted at once; 1 keeps extraction sequential
    pub extract_concurrency: usize,
    /// Extra attempts per unit after the first failure
    pub max_retries: u32,
    pub retry_delay_secs: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            csv_source_path: PathBuf::from(DEFAULT_CSV_SOURCE_PATH),
            landing_dir: PathBuf::from(DEFAULT_LANDING_DIR),
            source_tables: DEFAULT_SOURCE_TABLES.iter().map(|t| t.to_string()).collect(),
            source_conn_id: DEFAULT_SOURCE_CONN_ID.to_string(),
            source_schema: DEFAULT_SOURCE_SCHEMA.to_string(),
            dw_conn_id: DEFAULT_DW_CONN_ID.to_string(),
            schedule: DEFAULT_SCHEDULE.to_string(),
            load_scope: LoadScope::All,
            extract_concurrency: 1,
            max_retries: 0,
            retry_delay_secs: DEFAULT_RETRY_DELAY_SECS,
        }
    }
}

/// Copy a `.env` file from the working directory (or a parent) into the
/// process environment
///
/// Variables already set are left alone. The binary calls this before logging
/// is initialised so `LOG_*` entries in the file apply too.
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

impl PipelineConfig {
    /// Load configuration from `.env` and environment variables
    pub fn from_env() -> PipelineResult<Self> {
        load_dotenv();

        let defaults = Self::default();
        let config = Self {
            csv_source_path: std::env::var("ETL_CSV_SOURCE_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.csv_source_path),
            landing_dir: std::env::var("ETL_LANDING_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.landing_dir),
            source_tables: std::env::var("ETL_SOURCE_TABLES")
                .map(|s| parse_table_list(&s))
                .unwrap_or(defaults.source_tables),
            source_conn_id: std::env::var("ETL_SOURCE_CONN_ID")
                .unwrap_or(defaults.source_conn_id),
            source_schema: std::env::var("ETL_SOURCE_SCHEMA").unwrap_or(defaults.source_schema),
            dw_conn_id: std::env::var("ETL_DW_CONN_ID").unwrap_or(defaults.dw_conn_id),
            schedule: std::env::var("ETL_SCHEDULE").unwrap_or(defaults.schedule),
            load_scope: match std::env::var("ETL_LOAD_SCOPE") {
                Ok(s) => s.parse()?,
                Err(_) => defaults.load_scope,
            },
            extract_concurrency: parse_var("ETL_EXTRACT_CONCURRENCY")?
                .unwrap_or(defaults.extract_concurrency),
            max_retries: parse_var("ETL_MAX_RETRIES")?.unwrap_or(defaults.max_retries),
            retry_delay_secs: parse_var("ETL_RETRY_DELAY_SECS")?
                .unwrap_or(defaults.retry_delay_secs),
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> PipelineResult<()> {
        if self.csv_source_path.as_os_str().is_empty() {
            return Err(PipelineError::Config("ETL_CSV_SOURCE_PATH cannot be empty".into()));
        }
        if self.landing_dir.as_os_str().is_empty() {
            return Err(PipelineError::Config("ETL_LANDING_DIR cannot be empty".into()));
        }
        if self.source_tables.is_empty() {
            return Err(PipelineError::Config("ETL_SOURCE_TABLES cannot be empty".into()));
        }

        let pattern =
            Regex::new(TABLE_NAME_PATTERN).map_err(|e| PipelineError::Config(e.to_string()))?;
        for table in &self.source_tables {
            if !pattern.is_match(table) {
                return Err(PipelineError::Config(format!(
                    "Invalid source table name '{}'",
                    table
                )));
            }
        }

        if !pattern.is_match(&self.source_schema) {
            return Err(PipelineError::Config(format!(
                "Invalid source schema '{}'",
                self.source_schema
            )));
        }

        if self.source_conn_id.is_empty() || self.dw_conn_id.is_empty() {
            return Err(PipelineError::Config("Connection ids cannot be empty".into()));
        }
        if self.extract_concurrency == 0 {
            return Err(PipelineError::Config(
                "ETL_EXTRACT_CONCURRENCY must be greater than 0".into(),
            ));
        }

        crate::schedule::DailySchedule::parse(&self.schedule)?;

        Ok(())
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_secs)
    }
}

fn parse_table_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_var<T: FromStr>(name: &str) -> PipelineResult<Option<T>> {
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| PipelineError::Config(format!("{} has an invalid value: {}", name, raw))),
        Err(_) => Ok(None),
    }
}
