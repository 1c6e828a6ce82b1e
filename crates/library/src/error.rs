//! Library Error Types
//!
//! This module provides structured errors using `exn` for automatic location
//! tracking and error tree construction.
//!
//! Only whole-request failures surface as these errors (a template that does
//! not parse, an unknown operation or undo session). Failures of a single
//! file are recorded against that file instead; see
//! [`FileEntry`](crate::FileEntry) and [`FileOutcome`](crate::FileOutcome).

use crate::operation::OperationId;
use crate::undo::SessionId;
use derive_more::{Display, Error};
use std::path::PathBuf;

/// A library error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for library operations.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// The template references tokens that are not known field names.
    #[display("unknown template tokens: {}", _0.join(", "))]
    UnknownTokens(#[error(not(source))] Vec<String>),
    /// A `{` or `}` without its partner.
    #[display("unclosed token in template: {_0}")]
    UnclosedToken(#[error(not(source))] String),
    /// Every token was empty and nothing usable was left after sanitizing.
    #[display("template expanded to an empty filename")]
    EmptyExpansion,
    /// Metadata for the file could not be resolved.
    #[display("could not resolve metadata")]
    Metadata,
    /// No free destination was found among the candidates tried.
    #[display("no free destination, tried: {}", display_paths(attempted))]
    CollisionUnresolved { attempted: Vec<PathBuf> },
    /// A destination that was free during planning is now occupied.
    #[display("destination appeared after planning: {}", _0.display())]
    DestinationOccupied(#[error(not(source))] PathBuf),
    #[display("operation not found: {_0}")]
    OperationNotFound(#[error(not(source))] OperationId),
    #[display("undo session not found or expired: {_0}")]
    SessionNotFoundOrExpired(#[error(not(source))] SessionId),
    /// A storage backend operation failed.
    #[display("storage operation failed")]
    Storage,
}

fn display_paths(paths: &[PathBuf]) -> String {
    paths.iter().map(|p| p.display().to_string()).collect::<Vec<_>>().join(", ")
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Storage | Self::Metadata | Self::DestinationOccupied(_))
    }
}
