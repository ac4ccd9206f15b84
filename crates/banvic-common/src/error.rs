//! Error types shared by every BanVic crate

use thiserror::Error;

/// Result type alias for shared utilities
pub type Result<T> = std::result::Result<T, EtlError>;

/// Errors raised by the shared utilities
#[derive(Error, Debug)]
pub enum EtlError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Checksum mismatch for {path}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        path: String,
        expected: String,
        actual: String,
    },
}
