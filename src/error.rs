//! Error handling for quarry operations.
//!
//! This module defines the error types used throughout the query core.
//! All public APIs return `Result<T, StoreError>` for consistent error
//! handling.
//!
//! # Error Classes
//!
//! Errors fall into two user-visible classes: query construction problems
//! ([`StoreError::BadQuery`]), which are surfaced synchronously before any
//! I/O and are never retryable, and runtime backend failures
//! ([`StoreError::Scan`], [`StoreError::Storage`]), which are retryable by
//! the caller. [`StoreError::is_retryable`] distinguishes the two.

use std::io;
use thiserror::Error;

/// Result type for quarry operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors that can occur while compiling or evaluating queries, or while
/// driving the edge delete/compaction pipeline.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The predicate tree or query parameters are malformed.
    ///
    /// Surfaced synchronously before any I/O; never retried.
    #[error("invalid query: {0}")]
    BadQuery(String),

    /// A range scan against the storage collaborator failed.
    ///
    /// Propagated up through the iterator chain as a terminal failure.
    /// The core does not retry internally; retry policy belongs to the
    /// collaborator or caller.
    #[error("index scan failed: {0}")]
    Scan(String),

    /// A merge source violated its paging contract, e.g. returned fewer
    /// elements than its declared page limit while claiming more remain.
    ///
    /// Continuing would risk returning results out of order, so this is
    /// fatal for the traversal.
    #[error("inconsistent page boundary: {0}")]
    InconsistentPage(String),

    /// A permanent-storage write failed after commit-log entries were read
    /// for compaction. The commit log is deliberately left intact so a
    /// retry of the same event is safe.
    #[error("edge compaction aborted: {0}")]
    DeleteRace(String),

    /// Requested resource was not found.
    #[error("{0} not found")]
    NotFound(&'static str),

    /// An opaque cursor or stored token failed integrity checks.
    #[error("corruption detected: {0}")]
    Corruption(String),

    /// A point write or delete against the storage collaborator failed.
    #[error("storage operation failed: {0}")]
    Storage(String),

    /// Invalid configuration or argument.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// I/O error from an underlying collaborator.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl StoreError {
    /// True for backend/runtime failures the caller may retry, false for
    /// query construction errors and internal invariant violations.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            StoreError::Scan(_) | StoreError::Storage(_) | StoreError::Io(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_classes() {
        assert!(StoreError::Scan("timeout".into()).is_retryable());
        assert!(StoreError::Storage("write failed".into()).is_retryable());
        assert!(!StoreError::BadQuery("no operand".into()).is_retryable());
        assert!(!StoreError::InconsistentPage("short page".into()).is_retryable());
    }
}
