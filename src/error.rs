//! Error types for the caching and scheduling core

use std::time::Duration;

use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the caching and scheduling core
#[derive(Error, Debug)]
pub enum Error {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Configuration could not be parsed
    #[error("Failed to parse configuration: {0}")]
    ConfigParse(#[from] serde_json::Error),

    // =========================================================================
    // Cache Errors
    // =========================================================================
    /// Malformed fingerprint text
    #[error("Invalid fingerprint: {0}")]
    InvalidFingerprint(String),

    /// Journal contents could not be trusted
    #[error("Journal corrupted: {0}")]
    JournalCorrupted(String),

    // =========================================================================
    // Scheduler Errors
    // =========================================================================
    /// Job was cancelled before producing a value
    #[error("Job cancelled")]
    JobCancelled,

    /// Job body returned an error
    #[error("Job failed: {0}")]
    JobFailed(String),

    /// Job body panicked
    #[error("Job panicked: {0}")]
    JobPanicked(String),

    /// Gave up waiting for a job result
    #[error("Timed out after {0:?} waiting for job")]
    Timeout(Duration),
}

impl Error {
    /// Returns true for errors a caller may see again on retry
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Io(_) | Error::Timeout(_))
    }
}
