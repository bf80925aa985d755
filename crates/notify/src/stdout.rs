//! Writes findings to stdout as JSON lines.

use attest_core::Finding;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::traits::{FindingSink, SinkError};

/// One JSON object per line. Writes are serialized so lines never interleave.
pub struct StdoutSink {
    out: Mutex<tokio::io::Stdout>,
}

impl StdoutSink {
    pub fn new() -> Self {
        Self {
            out: Mutex::new(tokio::io::stdout()),
        }
    }
}

impl Default for StdoutSink {
    fn default() -> Self {
        Self::new()
    }
}

pub(crate) fn to_line(finding: &Finding) -> Result<String, SinkError> {
    let mut line = serde_json::to_string(finding)?;
    line.push('\n');
    Ok(line)
}

#[async_trait::async_trait]
impl FindingSink for StdoutSink {
    async fn publish(&self, finding: &Finding) -> Result<(), SinkError> {
        let line = to_line(finding)?;
        let mut out = self.out.lock().await;
        out.write_all(line.as_bytes())
            .await
            .map_err(|e| SinkError::Retryable(e.to_string()))?;
        out.flush().await.map_err(|e| SinkError::Retryable(e.to_string()))
    }

    fn sink_name(&self) -> &str {
        "stdout"
    }
}
