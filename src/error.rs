//! Error types for course-dl
//!
//! This module provides the error taxonomy for the library:
//! - `Error` — top-level fatal errors returned to the embedding application
//! - `LedgerError` — persistence-layer failures
//! - `TransferError` — classified per-item download failures
//!
//! Per-item failures never abort a run; they are recorded against the lesson
//! in the ledger. Only discovery failures and unrecoverable ledger writes
//! propagate as `Error`.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for course-dl operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for course-dl
///
/// These are the fatal error conditions. Anything classified here aborts the
/// current run; recoverable per-lesson failures are a [`TransferError`]
/// recorded in the ledger instead.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "download_dir")
        key: Option<String>,
    },

    /// Discovery failed entirely — no lessons could be enumerated
    #[error("discovery failed: {0}")]
    Discovery(String),

    /// Ledger persistence error
    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Network error
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Shutdown in progress - not accepting new work
    #[error("shutdown in progress: not accepting new work")]
    ShuttingDown,
}

/// Ledger persistence errors
#[derive(Debug, Error)]
pub enum LedgerError {
    /// Writing the state document to disk failed
    ///
    /// This is the one persistence failure treated as fatal: a ledger that
    /// cannot be written at all gives no durability guarantee to resume from.
    #[error("failed to write ledger at {path}: {source}")]
    WriteFailed {
        /// Path of the ledger document
        path: PathBuf,
        /// Underlying I/O error
        source: std::io::Error,
    },

    /// Serializing the course state failed
    #[error("failed to serialize ledger: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Classified failure of a single transfer
///
/// Every failure mode of an executor surfaces as one of these variants; an
/// executor must never panic or return an unclassified fault across the
/// capability boundary. The scheduler maps variants onto lesson state:
/// [`TransferError::AuthRequired`] becomes `skipped`, everything else
/// becomes `failed` and stays retryable up to the attempt cap.
#[derive(Debug, Error)]
pub enum TransferError {
    /// Server demands credentials we do not have (HTTP 401/403)
    ///
    /// Retrying with the same request cannot succeed, so the item is
    /// skipped rather than failed.
    #[error("authentication required (HTTP {status})")]
    AuthRequired {
        /// The HTTP status code that triggered the classification
        status: u16,
    },

    /// Target does not exist at the source (HTTP 404)
    #[error("target not found (HTTP 404)")]
    NotFound,

    /// Transfer exceeded the per-request timeout
    #[error("transfer timed out after {seconds}s")]
    Timeout {
        /// The configured timeout that was exceeded
        seconds: u64,
    },

    /// Redirect chain exceeded the hop limit (or looped)
    #[error("too many redirects (limit {limit})")]
    TooManyRedirects {
        /// The configured redirect hop limit
        limit: usize,
    },

    /// Any other non-success HTTP status
    #[error("HTTP error status {status}")]
    HttpStatus {
        /// The HTTP status code returned by the server
        status: u16,
    },

    /// External media backend reported failure
    #[error("media backend failed: {0}")]
    Backend(String),

    /// Network-level failure (connect, TLS, reset)
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Local I/O failure while staging the artifact
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl TransferError {
    /// Whether a subsequent run may retry the item by re-attempting the
    /// identical request
    ///
    /// `AuthRequired` is the only non-retryable classification: nothing about
    /// the request changes between attempts, so the scheduler skips the item
    /// instead of burning attempts on it.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, TransferError::AuthRequired { .. })
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_required_is_not_retryable() {
        let err = TransferError::AuthRequired { status: 403 };
        assert!(
            !err.is_retryable(),
            "auth failures must not be retried with an unchanged request"
        );
    }

    #[test]
    fn test_transient_failures_are_retryable() {
        assert!(TransferError::NotFound.is_retryable());
        assert!(TransferError::Timeout { seconds: 300 }.is_retryable());
        assert!(TransferError::TooManyRedirects { limit: 5 }.is_retryable());
        assert!(TransferError::HttpStatus { status: 502 }.is_retryable());
        assert!(TransferError::Backend("tool exited 1".into()).is_retryable());
    }

    #[test]
    fn test_error_display_includes_context() {
        let err = Error::Config {
            message: "max_concurrent_downloads must be at least 1".into(),
            key: Some("max_concurrent_downloads".into()),
        };
        assert!(err.to_string().contains("configuration error"));

        let err = TransferError::AuthRequired { status: 401 };
        assert!(err.to_string().contains("401"));
    }
}
