//! BanVic Pipeline Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Daily batch extraction for Banco Vitória: every configured table of the
//! operational Postgres database and one transactions flat file are landed
//! as CSV in a shared directory, then each landing file replaces its
//! warehouse table.
//!
//! # Overview
//!
//! - **Extraction**: [`extract::SourceTableExtractor`] and [`extract::FlatFileExtractor`]
//! - **Landing zone**: naming convention and JSON manifests in [`landing`]
//! - **Loading**: [`load::WarehouseLoader`] with full-replace semantics
//! - **Orchestration**: fan-in runner in [`pipeline`], daily trigger in [`schedule`]
//! - **Configuration**: `ETL_*` environment variables in [`config`], connections in [`db`]
//!
//! # Example
//!
//! ```no_run
//! use banvic_pipeline::{ConnectionProvider, Pipeline, PipelineConfig};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = PipelineConfig::from_env()?;
//!     let pipeline = Pipeline::from_config(&config, &ConnectionProvider::from_env())?;
//!
//!     let report = pipeline.run(chrono::Utc::now().date_naive()).await;
//!     println!("succeeded: {}", report.succeeded());
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod db;
pub mod error;
pub mod extract;
pub mod landing;
pub mod load;
pub mod pipeline;
pub mod schedule;
pub mod schema;
pub mod source;
pub mod table;
pub mod warehouse;

pub use config::{LoadScope, PipelineConfig};
pub use db::ConnectionProvider;
pub use error::{PipelineError, PipelineResult, StageError};
pub use pipeline::{Pipeline, RunReport, Stage, UnitOutcome};
pub use table::Table;
