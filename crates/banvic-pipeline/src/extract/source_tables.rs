//! Source-table extractor
//!
//! Lands one `{date}_sql_{table}.csv` per configured table. The first failing
//! table aborts the rest of the run; artifacts already landed stay in place.

use chrono::NaiveDate;
use futures::{stream, StreamExt, TryStreamExt};
use std::sync::Arc;
use tracing::{error, info, Instrument};

use super::ExtractReport;
use crate::config::PipelineConfig;
use crate::db::ConnectionProvider;
use crate::error::{PipelineResult, StageError};
use crate::landing::{ArtifactManifest, LandingArtifact, LandingZone, SourceKind};
use crate::pipeline::Stage;
use crate::source::{PgSource, SourceDatabase};

pub struct SourceTableExtractor {
    source: Arc<dyn SourceDatabase>,
    landing: LandingZone,
    tables: Vec<String>,
    concurrency: usize,
}

impl SourceTableExtractor {
    pub fn new(source: Arc<dyn SourceDatabase>, landing: LandingZone, tables: Vec<String>) -> Self {
        Self {
            source,
            landing,
            tables,
            concurrency: 1,
        }
    }

    /// Postgres-backed extractor for the configured source connection
    ///
    /// Fails only when the connection id has no URL; the pool itself is lazy.
    pub fn from_config(
        config: &PipelineConfig,
        connections: &ConnectionProvider,
    ) -> PipelineResult<Self> {
        let source = PgSource::new(
            connections.connect_lazy(&config.source_conn_id)?,
            &config.source_conn_id,
        )
        .with_schema(&config.source_schema);

        Ok(Self::new(
            Arc::new(source),
            LandingZone::new(&config.landing_dir),
            config.source_tables.clone(),
        )
        .with_concurrency(config.extract_concurrency))
    }

    /// Extract up to `n` tables at once; stops launching new ones after the first failure
    pub fn with_concurrency(mut self, n: usize) -> Self {
        self.concurrency = n.max(1);
        self
    }

    pub fn tables(&self) -> &[String] {
        &self.tables
    }

    pub async fn run(&self, capture_date: NaiveDate) -> Result<ExtractReport, StageError> {
        self.extract_all(capture_date)
            .instrument(tracing::info_span!("postgres_extract", %capture_date))
            .await
            .map_err(|e| {
                error!(error = %e, "Failed to extract data from Postgres");
                StageError::new(Stage::PostgresExtract, e)
            })
    }

    async fn extract_all(&self, capture_date: NaiveDate) -> PipelineResult<ExtractReport> {
        self.landing.ensure()?;

        let manifests: Vec<ArtifactManifest> = stream::iter(&self.tables)
            .map(|table| self.extract_table(table, capture_date))
            .buffered(self.concurrency)
            .try_collect()
            .await?;

        let report = ExtractReport { manifests };
        info!(summary = %report.summary(), "Postgres extraction complete");
        Ok(report)
    }

    async fn extract_table(
        &self,
        table: &str,
        capture_date: NaiveDate,
    ) -> PipelineResult<ArtifactManifest> {
        let data = self.source.fetch_table(table).await?;
        let artifact = LandingArtifact::new(capture_date, SourceKind::Sql, table);
        let manifest = self.landing.write(&artifact, &data)?;

        info!(
            table,
            rows = manifest.row_count,
            file = %manifest.file_name,
            "Source table landed"
        );
        Ok(manifest)
    }
}
