//! Flat-file extractor
//!
//! Copies the configured delimited file, unfiltered, into
//! `{date}_csv_transacoes.csv`.

use chrono::NaiveDate;
use std::path::{Path, PathBuf};
use tracing::{error, info};

use super::ExtractReport;
use crate::config::PipelineConfig;
use crate::error::{PipelineResult, StageError};
use crate::landing::{LandingArtifact, LandingZone, SourceKind, FLAT_FILE_NAME};
use crate::pipeline::Stage;
use crate::table::Table;

pub struct FlatFileExtractor {
    source_path: PathBuf,
    landing: LandingZone,
}

impl FlatFileExtractor {
    pub fn new(source_path: impl Into<PathBuf>, landing: LandingZone) -> Self {
        Self {
            source_path: source_path.into(),
            landing,
        }
    }

    pub fn from_config(config: &PipelineConfig) -> Self {
        Self::new(&config.csv_source_path, LandingZone::new(&config.landing_dir))
    }

    pub fn source_path(&self) -> &Path {
        &self.source_path
    }

    pub async fn run(&self, capture_date: NaiveDate) -> Result<ExtractReport, StageError> {
        tracing::info_span!("extract_csv", %capture_date).in_scope(|| {
            self.extract(capture_date).map_err(|e| {
                error!(error = %e, source = %self.source_path.display(), "Failed to extract data from CSV");
                StageError::new(Stage::CsvExtract, e)
            })
        })
    }

    fn extract(&self, capture_date: NaiveDate) -> PipelineResult<ExtractReport> {
        let data = Table::read_csv(&self.source_path)?;

        let artifact = LandingArtifact::new(capture_date, SourceKind::Csv, FLAT_FILE_NAME);
        let manifest = self.landing.write(&artifact, &data)?;

        info!(
            rows = manifest.row_count,
            file = %manifest.file_name,
            "Flat file landed"
        );
        Ok(ExtractReport {
            manifests: vec![manifest],
        })
    }
}
