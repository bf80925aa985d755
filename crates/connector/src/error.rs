//! Error types for evidence collection.

use std::time::Duration;

use thiserror::Error;

/// Failure of a single page fetch inside an adapter.
#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{url} returned {status}")]
    Status { url: String, status: u16 },

    #[error("malformed evidence at {location}: {reason}")]
    Parse { location: String, reason: String },
}

/// Terminal condition of a collection run, or a configuration problem.
#[derive(Debug, Error)]
pub enum CollectError {
    /// No token became available within the source's acquire timeout.
    #[error("rate limit exceeded for source '{source_id}' after waiting {waited:?}")]
    RateLimitExceeded { source_id: String, waited: Duration },

    #[error("source '{source_id}' failed: {error}")]
    Source {
        source_id: String,
        #[source]
        error: AdapterError,
    },

    #[error("collection from source '{source_id}' was cancelled")]
    Cancelled { source_id: String },

    #[error("source configuration error: {0}")]
    Config(String),
}

impl CollectError {
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, CollectError::RateLimitExceeded { .. })
    }
}
