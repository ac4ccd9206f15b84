//! Landing zone: artifact naming, manifests and directory listing
//!
//! Every extraction produces `{YYYY-MM-DD}_{sql|csv}_{name}.csv` plus a JSON
//! sidecar `{YYYY-MM-DD}_{sql|csv}_{name}.manifest.json`. The loader maps an
//! artifact to its destination table from the manifest when one exists and
//! falls back to parsing the file name otherwise.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

use banvic_common::checksum::sha256_file;
use banvic_common::EtlError;

use crate::error::{PipelineError, PipelineResult};
use crate::table::{staging_path, Table};

pub const LANDING_EXTENSION: &str = ".csv";
pub const MANIFEST_EXTENSION: &str = ".manifest.json";
pub const CAPTURE_DATE_FORMAT: &str = "%Y-%m-%d";

/// Logical name under which the flat file lands
pub const FLAT_FILE_NAME: &str = "transacoes";

/// Which extractor produced an artifact
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Sql,
    Csv,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Sql => "sql",
            SourceKind::Csv => "csv",
        }
    }
}

impl std::fmt::Display for SourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SourceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sql" => Ok(SourceKind::Sql),
            "csv" => Ok(SourceKind::Csv),
            other => Err(format!("unknown source kind '{}'", other)),
        }
    }
}

/// Identity of one landing file: when it was captured, from where, and for which table
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LandingArtifact {
    pub capture_date: NaiveDate,
    pub kind: SourceKind,
    pub name: String,
}

impl LandingArtifact {
    pub fn new(capture_date: NaiveDate, kind: SourceKind, name: impl Into<String>) -> Self {
        Self {
            capture_date,
            kind,
            name: name.into(),
        }
    }

    fn stem(&self) -> String {
        format!(
            "{}_{}_{}",
            self.capture_date.format(CAPTURE_DATE_FORMAT),
            self.kind,
            self.name
        )
    }

    pub fn file_name(&self) -> String {
        format!("{}{}", self.stem(), LANDING_EXTENSION)
    }

    pub fn manifest_file_name(&self) -> String {
        format!("{}{}", self.stem(), MANIFEST_EXTENSION)
    }

    /// Recover the artifact identity from a landing file name
    ///
    /// The name is split at its first two underscores: date, source kind, and
    /// everything else (extension stripped) as the table name. Fewer than three
    /// segments, a bad date, or an unknown kind is a naming violation.
    pub fn parse_file_name(file_name: &str) -> PipelineResult<Self> {
        let stem = file_name
            .strip_suffix(LANDING_EXTENSION)
            .ok_or_else(|| PipelineError::naming(file_name, "missing .csv extension"))?;

        let mut parts = stem.splitn(3, '_');
        let (Some(date), Some(kind), Some(name)) = (parts.next(), parts.next(), parts.next())
        else {
            return Err(PipelineError::naming(
                file_name,
                "expected three underscore-delimited segments: {date}_{kind}_{name}",
            ));
        };

        let capture_date = NaiveDate::parse_from_str(date, CAPTURE_DATE_FORMAT).map_err(|e| {
            PipelineError::naming(file_name, format!("invalid capture date '{}': {}", date, e))
        })?;
        let kind = kind
            .parse::<SourceKind>()
            .map_err(|reason| PipelineError::naming(file_name, reason))?;
        if name.is_empty() {
            return Err(PipelineError::naming(file_name, "empty table name"));
        }

        Ok(Self::new(capture_date, kind, name))
    }
}

/// Sidecar metadata describing one landing file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactManifest {
    #[serde(flatten)]
    pub artifact: LandingArtifact,
    pub file_name: String,
    pub columns: Vec<String>,
    pub row_count: usize,
    pub sha256: String,
    pub written_at: DateTime<Utc>,
}

/// A landing file together with the destination it maps to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedArtifact {
    pub path: PathBuf,
    pub artifact: LandingArtifact,
    pub from_manifest: bool,
}

impl ResolvedArtifact {
    pub fn destination_table(&self) -> &str {
        &self.artifact.name
    }
}

/// The flat directory shared by both extractors and the loader
#[derive(Debug, Clone)]
pub struct LandingZone {
    dir: PathBuf,
}

impl LandingZone {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, artifact: &LandingArtifact) -> PathBuf {
        self.dir.join(artifact.file_name())
    }

    /// Create the directory if it does not exist yet
    pub fn ensure(&self) -> PipelineResult<()> {
        std::fs::create_dir_all(&self.dir).map_err(|e| PipelineError::filesystem(&self.dir, e))
    }

    /// Write an artifact and its manifest, overwriting same-day files
    ///
    /// If the manifest cannot be written the data file is removed again, so an
    /// artifact is either landed completely or not at all.
    pub fn write(&self, artifact: &LandingArtifact, table: &Table) -> PipelineResult<ArtifactManifest> {
        self.ensure()?;

        let path = self.path_for(artifact);
        table.write_csv(&path)?;

        let manifest = sha256_file(&path)
            .map_err(|e| common_error(&path, e))
            .map(|sha256| ArtifactManifest {
                artifact: artifact.clone(),
                file_name: artifact.file_name(),
                columns: table.columns().to_vec(),
                row_count: table.len(),
                sha256,
                written_at: Utc::now(),
            })
            .and_then(|manifest| self.write_manifest(&manifest).map(|()| manifest));

        match manifest {
            Ok(manifest) => {
                debug!(path = %path.display(), rows = manifest.row_count, "Landing artifact written");
                Ok(manifest)
            },
            Err(e) => {
                let _ = std::fs::remove_file(&path);
                Err(e)
            },
        }
    }

    fn write_manifest(&self, manifest: &ArtifactManifest) -> PipelineResult<()> {
        let path = self.dir.join(manifest.artifact.manifest_file_name());
        let staging = staging_path(&path);
        let json = serde_json::to_vec_pretty(manifest).map_err(|e| PipelineError::manifest(&path, e))?;

        std::fs::write(&staging, json)
            .and_then(|()| std::fs::rename(&staging, &path))
            .map_err(|e| {
                let _ = std::fs::remove_file(&staging);
                PipelineError::filesystem(&path, e)
            })
    }

    /// Every `.csv` file in the directory, in lexicographic file-name order
    ///
    /// Symlinks are followed and hidden files are included, so a badly named
    /// file can never slip past the loader. Staging files end in `.partial`
    /// and are never listed. Capture dates lead the file name, so for a
    /// given table the newest capture sorts last.
    pub fn list_csv_files(&self) -> PipelineResult<Vec<PathBuf>> {
        let entries =
            std::fs::read_dir(&self.dir).map_err(|e| PipelineError::filesystem(&self.dir, e))?;

        let mut files = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| PipelineError::filesystem(&self.dir, e))?;
            let path = entry.path();
            let is_csv = entry.file_name().to_string_lossy().ends_with(LANDING_EXTENSION);

            if is_csv && path.is_file() {
                files.push(path);
            }
        }

        files.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
        Ok(files)
    }

    /// Map a landing file to its artifact identity
    pub fn resolve(&self, path: &Path) -> PipelineResult<ResolvedArtifact> {
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| PipelineError::naming(path.display().to_string(), "not a file"))?;

        let manifest_path = manifest_path_for(path);
        if manifest_path.is_file() {
            let manifest = read_manifest(&manifest_path)?;
            if manifest.file_name != file_name {
                return Err(PipelineError::manifest(
                    &manifest_path,
                    format!("describes '{}' instead of '{}'", manifest.file_name, file_name),
                ));
            }
            banvic_common::checksum::verify_sha256(path, &manifest.sha256)
                .map_err(|e| PipelineError::manifest(&manifest_path, e))?;

            return Ok(ResolvedArtifact {
                path: path.to_path_buf(),
                artifact: manifest.artifact,
                from_manifest: true,
            });
        }

        Ok(ResolvedArtifact {
            path: path.to_path_buf(),
            artifact: LandingArtifact::parse_file_name(&file_name)?,
            from_manifest: false,
        })
    }
}

fn manifest_path_for(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let stem = name.strip_suffix(LANDING_EXTENSION).unwrap_or(&name);
    path.with_file_name(format!("{}{}", stem, MANIFEST_EXTENSION))
}

fn read_manifest(path: &Path) -> PipelineResult<ArtifactManifest> {
    let bytes = std::fs::read(path).map_err(|e| PipelineError::filesystem(path, e))?;
    serde_json::from_slice(&bytes).map_err(|e| PipelineError::manifest(path, e))
}

fn common_error(path: &Path, err: EtlError) -> PipelineError {
    match err {
        EtlError::Io(io) => PipelineError::filesystem(path, io),
        other => PipelineError::manifest(path, other),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, CAPTURE_DATE_FORMAT).unwrap()
    }

    #[test]
    fn test_file_name_convention() {
        let artifact = LandingArtifact::new(date("2025-01-01"), SourceKind::Sql, "clientes");
        assert_eq!(artifact.file_name(), "2025-01-01_sql_clientes.csv");
        assert_eq!(artifact.manifest_file_name(), "2025-01-01_sql_clientes.manifest.json");

        let flat = LandingArtifact::new(date("2025-03-09"), SourceKind::Csv, FLAT_FILE_NAME);
        assert_eq!(flat.file_name(), "2025-03-09_csv_transacoes.csv");
    }

    #[test]
    fn test_parse_file_name() {
        let artifact = LandingArtifact::parse_file_name("2025-01-01_csv_transacoes.csv").unwrap();
        assert_eq!(artifact.capture_date, date("2025-01-01"));
        assert_eq!(artifact.kind, SourceKind::Csv);
        assert_eq!(artifact.name, "transacoes");
    }

    #[test]
    fn test_parse_keeps_underscores_in_table_name() {
        let artifact =
            LandingArtifact::parse_file_name("2025-01-01_sql_colaborador_agencia.csv").unwrap();
        assert_eq!(artifact.name, "colaborador_agencia");
    }

    #[test]
    fn test_parse_rejects_malformed_names() {
        for name in [
            "bad.csv",
            "2025-01-01_sql.csv",
            "2025-01-01_sql_.csv",
            "yesterday_sql_clientes.csv",
            "2025-01-01_xls_clientes.csv",
            "2025-01-01_sql_clientes.txt",
        ] {
            let err = LandingArtifact::parse_file_name(name).unwrap_err();
            assert!(
                matches!(err, PipelineError::Naming { .. }),
                "{} should be a naming violation",
                name
            );
        }
    }

    #[test]
    fn test_write_then_resolve_through_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let zone = LandingZone::new(dir.path().join("datalake"));
        let artifact =
            LandingArtifact::new(date("2025-01-01"), SourceKind::Sql, "colaborador_agencia");
        let table = Table::from_literals(&["cod_colaborador", "cod_agencia"], &[&["1", "7"]]);

        let manifest = zone.write(&artifact, &table).unwrap();
        assert_eq!(manifest.row_count, 1);
        assert_eq!(manifest.columns, vec!["cod_colaborador", "cod_agencia"]);

        let files = zone.list_csv_files().unwrap();
        assert_eq!(files.len(), 1);

        let resolved = zone.resolve(&files[0]).unwrap();
        assert!(resolved.from_manifest);
        assert_eq!(resolved.destination_table(), "colaborador_agencia");
    }

    #[test]
    fn test_tampered_artifact_fails_manifest_check() {
        let dir = tempfile::tempdir().unwrap();
        let zone = LandingZone::new(dir.path());
        let artifact = LandingArtifact::new(date("2025-01-01"), SourceKind::Sql, "contas");
        zone.write(&artifact, &Table::from_literals(&["num_conta"], &[&["1"]]))
            .unwrap();

        let path = zone.path_for(&artifact);
        std::fs::write(&path, "\"num_conta\"\n\"2\"\n").unwrap();

        let err = zone.resolve(&path).unwrap_err();
        assert!(matches!(err, PipelineError::Manifest { .. }));
    }

    #[test]
    fn test_listing_is_lexicographic_and_csv_only() {
        let dir = tempfile::tempdir().unwrap();
        for name in [
            "2025-01-02_sql_clientes.csv",
            "2025-01-01_sql_clientes.csv",
            "2025-01-01_csv_transacoes.csv",
            "notes.txt",
            ".2025-01-03_sql_clientes.csv.partial",
        ] {
            std::fs::write(dir.path().join(name), "\"id\"\n").unwrap();
        }
        std::fs::create_dir(dir.path().join("archive.csv")).unwrap();

        let zone = LandingZone::new(dir.path());
        let names: Vec<String> = zone
            .list_csv_files()
            .unwrap()
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();

        assert_eq!(
            names,
            vec![
                "2025-01-01_csv_transacoes.csv",
                "2025-01-01_sql_clientes.csv",
                "2025-01-02_sql_clientes.csv",
            ]
        );
    }

    #[test]
    fn test_hidden_csv_is_listed_and_fails_naming() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(".x.csv"), "\"id\"\n").unwrap();

        let zone = LandingZone::new(dir.path());
        let files = zone.list_csv_files().unwrap();
        assert_eq!(files, vec![dir.path().join(".x.csv")]);

        let err = zone.resolve(&files[0]).unwrap_err();
        assert!(matches!(err, PipelineError::Naming { ref file_name, .. } if file_name == ".x.csv"));
    }

    #[cfg(unix)]
    #[test]
    fn test_symlinked_artifact_is_listed() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("real.csv");
        std::fs::write(&target, "\"id\"\n").unwrap();
        std::os::unix::fs::symlink(&target, dir.path().join("2025-01-01_sql_linked.csv")).unwrap();

        let zone = LandingZone::new(dir.path());
        let names: Vec<String> = zone
            .list_csv_files()
            .unwrap()
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();

        assert_eq!(names, vec!["2025-01-01_sql_linked.csv", "real.csv"]);
    }

    #[test]
    fn test_missing_landing_dir_is_filesystem_error() {
        let dir = tempfile::tempdir().unwrap();
        let zone = LandingZone::new(dir.path().join("absent"));
        assert!(matches!(
            zone.list_csv_files().unwrap_err(),
            PipelineError::Filesystem { .. }
        ));
    }
}
