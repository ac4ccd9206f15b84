//! BanVic Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared error handling, logging and checksum utilities for the BanVic
//! extraction pipeline.
//!
//! # Overview
//!
//! - **Error Handling**: [`EtlError`] and the [`Result`] alias
//! - **Logging**: tracing subscriber setup driven by `LOG_*` environment variables
//! - **Checksums**: SHA-256 digests used by landing manifests
//!
//! # Example
//!
//! ```no_run
//! use banvic_common::checksum::sha256_file;
//! use banvic_common::Result;
//!
//! fn fingerprint(path: &str) -> Result<String> {
//!     sha256_file(path)
//! }
//! ```

pub mod checksum;
pub mod error;
pub mod logging;

pub use error::{EtlError, Result};
