//! Finding sink contract and shared error types.

use attest_core::Finding;

/// Errors a sink can return for a single publish.
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    /// Worth retrying: throttling, server errors, timeouts.
    #[error("retryable sink failure: {0}")]
    Retryable(String),

    /// The sink refused the finding; retrying will not help.
    #[error("sink rejected finding: {0}")]
    Rejected(String),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("failed to serialize finding: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("sink configuration error: {0}")]
    Config(String),
}

impl SinkError {
    /// Transport-level HTTP failures are retried along with explicit
    /// `Retryable` ones.
    pub fn is_retryable(&self) -> bool {
        match self {
            SinkError::Retryable(_) => true,
            SinkError::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            _ => false,
        }
    }
}

/// A finding did not reach every sink after retries.
#[derive(Debug, thiserror::Error)]
#[error("finding {rule_id}@{resource_id} undelivered to {}: {last_error}", failed.join(", "))]
pub struct PublishError {
    pub rule_id: String,
    pub resource_id: String,
    pub failed: Vec<String>,
    pub last_error: String,
    /// At least one failed sink gave up on a retryable error, so a later
    /// attempt may still succeed. `false` when every failed sink rejected it.
    pub retryable: bool,
}

/// Destination for findings. `publish` either acknowledges the finding or
/// reports why it could not.
#[async_trait::async_trait]
pub trait FindingSink: Send + Sync {
    async fn publish(&self, finding: &Finding) -> Result<(), SinkError>;

    /// Human-readable name for logs (e.g. "webhook", "stdout").
    fn sink_name(&self) -> &str;
}

/// Result of delivering one finding to one sink.
#[derive(Debug, Clone)]
pub struct PublishResult {
    pub sink: String,
    pub success: bool,
    pub attempts: u32,
    pub error: Option<String>,
    /// Whether the final error was retryable. `false` on success.
    pub retryable: bool,
    pub duration_ms: u64,
}
