//! Error types for queue transport, pipeline ingestion, and dispatch.

use thiserror::Error;

/// Failures talking to an external evidence queue.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("message parse error: {0}")]
    Parse(String),

    #[error("acknowledge error: {0}")]
    Ack(String),
}

/// Failures surfaced synchronously by the pipeline API.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("invalid evidence event: {0}")]
    InvalidEvent(String),

    #[error("unknown dead-letter entry: {0}")]
    UnknownEntry(String),

    #[error("dead-letter store error: {0}")]
    Store(String),
}

/// Outcome of a failed dispatch attempt, as reported by an
/// [`EvidenceHandler`](crate::pipeline::EvidenceHandler).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchError {
    /// Retried with backoff until the attempt budget runs out.
    #[error("transient dispatch failure: {0}")]
    Transient(String),

    /// Dead-lettered immediately.
    #[error("permanent dispatch failure: {0}")]
    Permanent(String),
}

impl DispatchError {
    pub fn is_permanent(&self) -> bool {
        matches!(self, DispatchError::Permanent(_))
    }

    pub fn reason(&self) -> &str {
        match self {
            DispatchError::Transient(r) | DispatchError::Permanent(r) => r,
        }
    }
}
