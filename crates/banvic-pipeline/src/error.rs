//! Pipeline error types
//!
//! [`PipelineError`] classifies what went wrong. [`StageError`] is what a unit
//! returns at its boundary: the same error tagged with the unit that raised it.

use std::path::PathBuf;
use thiserror::Error;

use crate::pipeline::Stage;

pub type PipelineResult<T> = std::result::Result<T, PipelineError>;

#[derive(Error, Debug)]
pub enum PipelineError {
    /// No URL is configured for a symbolic connection id
    #[error("connection '{conn_id}' is not configured (set {env_var})")]
    ConnectionNotConfigured { conn_id: String, env_var: String },

    /// Connectivity or authentication failure against a database
    #[error("connection '{conn_id}' failed: {source}")]
    Connection {
        conn_id: String,
        #[source]
        source: sqlx::Error,
    },

    /// The source database has no table with this name
    #[error("source table '{table}' does not exist")]
    TableNotFound { table: String },

    /// Query or execution failure while reading a source table
    #[error("query failed for table '{table}': {source}")]
    Query {
        table: String,
        #[source]
        source: sqlx::Error,
    },

    /// Write failure while replacing a warehouse table
    #[error("failed to replace warehouse table '{table}': {source}")]
    Load {
        table: String,
        #[source]
        source: sqlx::Error,
    },

    /// Missing source file, unwritable landing directory, etc.
    #[error("filesystem error at {}: {source}", path.display())]
    Filesystem {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Malformed delimited content
    #[error("malformed delimited file {}: {message}", path.display())]
    Parse { path: PathBuf, message: String },

    /// Landing file name does not follow `{date}_{kind}_{name}.csv`
    #[error("landing file '{file_name}' violates the naming convention: {reason}")]
    Naming { file_name: String, reason: String },

    /// Manifest sidecar is unreadable or disagrees with its artifact
    #[error("invalid manifest {}: {reason}", path.display())]
    Manifest { path: PathBuf, reason: String },

    #[error("configuration error: {0}")]
    Config(String),
}

impl PipelineError {
    pub fn filesystem(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Filesystem {
            path: path.into(),
            source,
        }
    }

    pub fn parse(path: impl Into<PathBuf>, message: impl ToString) -> Self {
        Self::Parse {
            path: path.into(),
            message: message.to_string(),
        }
    }

    pub fn naming(file_name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Naming {
            file_name: file_name.into(),
            reason: reason.into(),
        }
    }

    pub fn manifest(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Self::Manifest {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    /// Split a sqlx error raised while reading `table` into connectivity vs. query failures
    pub fn from_source_query(conn_id: &str, table: &str, source: sqlx::Error) -> Self {
        if is_connectivity_error(&source) {
            Self::Connection {
                conn_id: conn_id.to_string(),
                source,
            }
        } else {
            Self::Query {
                table: table.to_string(),
                source,
            }
        }
    }

    /// Split a sqlx error raised while writing `table` into connectivity vs. write failures
    pub fn from_warehouse_write(conn_id: &str, table: &str, source: sqlx::Error) -> Self {
        if is_connectivity_error(&source) {
            Self::Connection {
                conn_id: conn_id.to_string(),
                source,
            }
        } else {
            Self::Load {
                table: table.to_string(),
                source,
            }
        }
    }
}

fn is_connectivity_error(err: &sqlx::Error) -> bool {
    matches!(
        err,
        sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::Configuration(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
    )
}

/// Error reported by a unit of work, carrying the unit's identity
#[derive(Error, Debug)]
#[error("{stage} failed: {source}")]
pub struct StageError {
    pub stage: Stage,
    #[source]
    pub source: PipelineError,
}

impl StageError {
    pub fn new(stage: Stage, source: PipelineError) -> Self {
        Self { stage, source }
    }
}
