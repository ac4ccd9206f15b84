//! Warehouse loader
//!
//! Replaces one warehouse table per landing file. Files are planned first:
//! every candidate is mapped to its destination before the warehouse is
//! touched, so a naming or manifest violation fails the run with nothing
//! written. Loading then proceeds file by file in lexicographic order and
//! stops at the first failure; tables replaced before it stay committed.

use chrono::NaiveDate;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, error, info, Instrument};

use crate::config::{LoadScope, PipelineConfig};
use crate::db::ConnectionProvider;
use crate::error::{PipelineResult, StageError};
use crate::landing::{LandingZone, ResolvedArtifact};
use crate::pipeline::Stage;
use crate::table::Table;
use crate::warehouse::{PgWarehouse, Warehouse};

/// One replaced warehouse table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadedTable {
    pub table: String,
    pub path: PathBuf,
    pub rows: u64,
}

#[derive(Debug, Clone, Default)]
pub struct LoadReport {
    pub loaded: Vec<LoadedTable>,
}

impl LoadReport {
    pub fn summary(&self) -> String {
        let rows: u64 = self.loaded.iter().map(|t| t.rows).sum();
        format!("{} file(s) loaded, {} row(s)", self.loaded.len(), rows)
    }
}

pub struct WarehouseLoader {
    warehouse: Arc<dyn Warehouse>,
    landing: LandingZone,
    scope: LoadScope,
}

impl WarehouseLoader {
    pub fn new(warehouse: Arc<dyn Warehouse>, landing: LandingZone) -> Self {
        Self {
            warehouse,
            landing,
            scope: LoadScope::All,
        }
    }

    /// Loader for the configured warehouse connection; the pool is lazy
    pub fn from_config(
        config: &PipelineConfig,
        connections: &ConnectionProvider,
    ) -> PipelineResult<Self> {
        let warehouse = PgWarehouse::new(
            connections.connect_lazy(&config.dw_conn_id)?,
            &config.dw_conn_id,
        );
        Ok(Self::new(Arc::new(warehouse), LandingZone::new(&config.landing_dir))
            .with_scope(config.load_scope))
    }

    pub fn with_scope(mut self, scope: LoadScope) -> Self {
        self.scope = scope;
        self
    }

    pub async fn run(&self, capture_date: NaiveDate) -> Result<LoadReport, StageError> {
        self.load_all(capture_date)
            .instrument(tracing::info_span!("load_dw", %capture_date))
            .await
            .map_err(|e| {
                error!(error = %e, "Failed to load the data warehouse");
                StageError::new(Stage::LoadWarehouse, e)
            })
    }

    /// Files this loader would process for `capture_date`, see [`plan`]
    pub fn plan(&self, capture_date: NaiveDate) -> PipelineResult<Vec<ResolvedArtifact>> {
        plan(&self.landing, self.scope, capture_date)
    }

    async fn load_all(&self, capture_date: NaiveDate) -> PipelineResult<LoadReport> {
        let planned = self.plan(capture_date)?;
        info!(
            dir = %self.landing.dir().display(),
            files = planned.len(),
            scope = ?self.scope,
            "Loading landing files"
        );

        let mut report = LoadReport::default();
        for artifact in planned {
            let data = Table::read_csv(&artifact.path)?;
            let table = artifact.destination_table();
            let rows = self.warehouse.replace_table(table, &data).await?;

            info!(
                table,
                rows,
                file = %artifact.path.display(),
                "Warehouse table replaced"
            );
            report.loaded.push(LoadedTable {
                table: table.to_string(),
                path: artifact.path.clone(),
                rows,
            });
        }

        info!(summary = %report.summary(), "Warehouse load complete");
        Ok(report)
    }
}

/// Candidate files in processing order, mapped to their destination tables
///
/// Needs only the landing directory, so it works without any database.
pub fn plan(
    landing: &LandingZone,
    scope: LoadScope,
    capture_date: NaiveDate,
) -> PipelineResult<Vec<ResolvedArtifact>> {
    let mut planned = Vec::new();
    for path in landing.list_csv_files()? {
        let resolved = landing.resolve(&path)?;
        let in_scope = match scope {
            LoadScope::All => true,
            LoadScope::CaptureDate => resolved.artifact.capture_date == capture_date,
        };
        if in_scope {
            planned.push(resolved);
        }
    }

    let mut last_writer: HashMap<&str, &ResolvedArtifact> = HashMap::new();
    for artifact in &planned {
        if let Some(previous) = last_writer.insert(artifact.destination_table(), artifact) {
            debug!(
                table = artifact.destination_table(),
                superseded = %previous.path.display(),
                by = %artifact.path.display(),
                "Destination table is loaded more than once; the later file wins"
            );
        }
    }

    Ok(planned)
}

