//! In-memory tabular data and the landing file format
//!
//! Landing files are comma separated with a header row, every field quoted and
//! no synthetic index column. NULL cells are written as `""` and any empty
//! field reads back as NULL.

use csv::{QuoteStyle, ReaderBuilder, WriterBuilder};
use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use crate::error::{PipelineError, PipelineResult};

/// A single cell; `None` is SQL NULL
pub type Cell = Option<String>;

/// Column names plus fully materialized rows, all as text
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Table {
    columns: Vec<String>,
    rows: Vec<Vec<Cell>>,
}

impl Table {
    pub fn new(columns: Vec<String>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    /// Build a table from string literals, mapping `""` to NULL
    pub fn from_literals(columns: &[&str], rows: &[&[&str]]) -> Self {
        let mut table = Self::new(columns.iter().map(|c| c.to_string()).collect());
        for row in rows {
            table.push_row(row.iter().map(|v| non_empty(v)).collect());
        }
        table
    }

    /// Append a row. Its width must match the header.
    pub fn push_row(&mut self, row: Vec<Cell>) {
        debug_assert_eq!(row.len(), self.columns.len(), "row width must match header");
        self.rows.push(row);
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<Cell>] {
        &self.rows
    }

    /// Number of data rows (header excluded)
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Values of one column, top to bottom
    pub fn column_values(&self, index: usize) -> impl Iterator<Item = Option<&str>> + '_ {
        self.rows
            .iter()
            .map(move |row| row.get(index).and_then(|cell| cell.as_deref()))
    }

    /// Serialize in the landing format
    pub fn to_writer<W: Write>(&self, writer: W) -> csv::Result<()> {
        let mut writer = WriterBuilder::new()
            .quote_style(QuoteStyle::Always)
            .from_writer(writer);

        writer.write_record(&self.columns)?;
        for row in &self.rows {
            writer.write_record(row.iter().map(|cell| cell.as_deref().unwrap_or("")))?;
        }
        writer.flush()?;
        Ok(())
    }

    /// Parse a comma-separated file with a header row
    pub fn from_reader<R: Read>(reader: R) -> csv::Result<Self> {
        let mut reader = ReaderBuilder::new()
            .has_headers(true)
            .flexible(false)
            .from_reader(reader);

        let columns: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();
        let mut table = Self::new(columns);

        for record in reader.records() {
            let record = record?;
            table.push_row(record.iter().map(non_empty).collect());
        }

        Ok(table)
    }

    /// Read a delimited file from disk
    pub fn read_csv(path: impl AsRef<Path>) -> PipelineResult<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| PipelineError::filesystem(path, e))?;
        let table = Self::from_reader(file).map_err(|e| PipelineError::parse(path, e))?;

        if table.columns.is_empty() || table.columns.iter().all(|c| c.is_empty()) {
            return Err(PipelineError::parse(path, "no columns to parse (missing header row)"));
        }

        Ok(table)
    }

    /// Write to disk, replacing any existing file at `path`
    ///
    /// Data goes to a hidden sibling first and is renamed into place only once
    /// fully written, so readers never observe a partial file.
    pub fn write_csv(&self, path: impl AsRef<Path>) -> PipelineResult<()> {
        let path = path.as_ref();
        let staging = staging_path(path);

        let result = self.write_staged(&staging).and_then(|()| {
            std::fs::rename(&staging, path).map_err(|e| PipelineError::filesystem(path, e))
        });

        if result.is_err() {
            let _ = std::fs::remove_file(&staging);
        }
        result
    }

    fn write_staged(&self, staging: &Path) -> PipelineResult<()> {
        let file = File::create(staging).map_err(|e| PipelineError::filesystem(staging, e))?;
        self.to_writer(&file).map_err(|e| match e.into_kind() {
            csv::ErrorKind::Io(io) => PipelineError::filesystem(staging, io),
            other => PipelineError::parse(staging, format!("{:?}", other)),
        })?;
        file.sync_all()
            .map_err(|e| PipelineError::filesystem(staging, e))
    }
}

fn non_empty(value: &str) -> Cell {
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

/// `dir/name.csv` -> `dir/.name.csv.partial`
pub(crate) fn staging_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!(".{}.partial", name))
}
