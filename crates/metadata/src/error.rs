//! Metadata Error Types
//!
//! This module provides structured errors using `exn` for automatic location
//! tracking and error tree construction.

use derive_more::{Display, Error};
use std::path::PathBuf;

/// A metadata error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for metadata operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// These describe what the caller should *do*, not what went wrong internally.
#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// A metadata source (tag reader, lookup service, analyzer) could not
    /// produce a result.
    #[display("metadata source unavailable: {_0}")]
    SourceUnavailable(#[error(not(source))] String),
    /// The embedded tags of a file could not be read; the file cannot be
    /// resolved.
    #[display("could not read tags: {}", _0.display())]
    TagsUnreadable(#[error(not(source))] PathBuf),
    /// A value could not be parsed for the given field.
    #[display("failed to parse field '{field}', found value: {value}")]
    ParseError {
        /// The field that failed to parse.
        field: &'static str,
        /// The offending value.
        value: String,
    },
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::SourceUnavailable(_))
    }
}
