//! Error types for signage-agent
//!
//! Variants follow how each failure is handled: whether it is retried next
//! cycle, counted toward backoff, or merely excludes content.

use std::time::Duration;
use thiserror::Error;

use crate::upstream::UpstreamError;

/// Main error type for the agent
#[derive(Error, Debug)]
pub enum Error {
    /// Transport or server failure; retried next cycle and counted for backoff
    #[error("Transient network error: {0}")]
    TransientNetwork(String),

    /// Upstream asked us to slow down; honoured without counting as a failure
    #[error("Rate limited, retry after {retry_after:?}")]
    RateLimited { retry_after: Option<Duration> },

    /// Manifest could not be parsed; prior resolved state is kept
    #[error("Invalid manifest: {0}")]
    InvalidManifest(String),

    /// No space left on the library volume
    #[error("Disk exhausted writing {0}")]
    DiskExhausted(String),

    /// Push message that parsed but carries unusable values
    #[error("Invalid push message: {0}")]
    InvalidMessage(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// File I/O errors
    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Persisted state (de)serialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// signage-common error
    #[error("Common error: {0}")]
    Common(#[from] signage_common::Error),

    /// Agent was stopped mid-operation
    #[error("Cancelled")]
    Cancelled,
}

impl Error {
    /// Whether this failure increments the backoff failure counter
    pub fn counts_as_failure(&self) -> bool {
        !matches!(self, Error::RateLimited { .. } | Error::Cancelled)
    }

    /// Map an I/O error raised while writing `path`, separating out a full disk
    pub fn from_write(path: &str, err: std::io::Error) -> Self {
        if err.kind() == std::io::ErrorKind::StorageFull {
            Error::DiskExhausted(path.to_string())
        } else {
            Error::Io(err)
        }
    }
}

impl From<UpstreamError> for Error {
    fn from(err: UpstreamError) -> Self {
        match err {
            UpstreamError::RateLimited { retry_after } => Error::RateLimited { retry_after },
            UpstreamError::InvalidResponse(msg) => Error::InvalidManifest(msg),
            other => Error::TransientNetwork(other.to_string()),
        }
    }
}

/// Convenience Result type using the agent Error
pub type Result<T> = std::result::Result<T, Error>;
