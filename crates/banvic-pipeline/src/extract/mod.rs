//! Extraction units
//!
//! Both extractors write into the same landing zone and report the manifests
//! of what they landed.

pub mod flat_file;
pub mod source_tables;

pub use flat_file::FlatFileExtractor;
pub use source_tables::SourceTableExtractor;

use crate::landing::ArtifactManifest;

/// What one extraction run landed
#[derive(Debug, Clone, Default)]
pub struct ExtractReport {
    pub manifests: Vec<ArtifactManifest>,
}

impl ExtractReport {
    pub fn total_rows(&self) -> usize {
        self.manifests.iter().map(|m| m.row_count).sum()
    }

    pub fn summary(&self) -> String {
        format!(
            "{} artifact(s), {} row(s)",
            self.manifests.len(),
            self.total_rows()
        )
    }
}
