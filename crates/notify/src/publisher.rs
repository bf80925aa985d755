//! Fans findings out to every configured sink.
//!
//! Each sink is retried on its own with bounded exponential backoff. A sink
//! that keeps failing does not stop delivery to the others, but the publish
//! as a whole reports an error so the caller can retry or dead-letter it.

use std::sync::Arc;

use attest_core::config::SinkConfig;
use attest_core::{Finding, RetryPolicy};
use tracing::{debug, info, warn};

use crate::stdout::StdoutSink;
use crate::traits::{FindingSink, PublishError, PublishResult, SinkError};
use crate::webhook::WebhookSink;

pub struct FindingPublisher {
    sinks: Vec<Arc<dyn FindingSink>>,
    retry: RetryPolicy,
}

impl FindingPublisher {
    pub fn new(sinks: Vec<Arc<dyn FindingSink>>, retry: RetryPolicy) -> Self {
        Self { sinks, retry }
    }

    /// Webhook when a URL is configured, stdout otherwise.
    pub fn from_config(config: &SinkConfig) -> Result<Self, SinkError> {
        let sink: Arc<dyn FindingSink> = match &config.webhook_url {
            Some(url) => Arc::new(WebhookSink::new(url, &Default::default())?),
            None => Arc::new(StdoutSink::new()),
        };
        info!(sink = sink.sink_name(), "finding sink configured");
        Ok(Self::new(vec![sink], config.publish_retry()))
    }

    pub fn sinks(&self) -> &[Arc<dyn FindingSink>] {
        &self.sinks
    }

    /// Deliver `finding` to every sink. Fails if any sink is still failing
    /// after its retries.
    pub async fn publish(&self, finding: &Finding) -> Result<Vec<PublishResult>, PublishError> {
        let mut results = Vec::with_capacity(self.sinks.len());
        for sink in &self.sinks {
            results.push(self.deliver(sink.as_ref(), finding).await);
        }

        let failed: Vec<&PublishResult> = results.iter().filter(|r| !r.success).collect();
        match failed.last() {
            None => Ok(results),
            Some(last) => Err(PublishError {
                rule_id: finding.rule_id.clone(),
                resource_id: finding.resource_id.clone(),
                failed: failed.iter().map(|r| r.sink.clone()).collect(),
                last_error: last.error.clone().unwrap_or_default(),
                retryable: failed.iter().any(|r| r.retryable),
            }),
        }
    }

    async fn deliver(&self, sink: &dyn FindingSink, finding: &Finding) -> PublishResult {
        let start = tokio::time::Instant::now();
        let mut attempts = 0;

        let mut retryable = false;
        let error = loop {
            attempts += 1;
            match sink.publish(finding).await {
                Ok(()) => {
                    debug!(
                        sink = sink.sink_name(),
                        rule_id = %finding.rule_id,
                        resource_id = %finding.resource_id,
                        attempts,
                        "finding published"
                    );
                    break None;
                }
                Err(e) if e.is_retryable() && self.retry.should_retry(attempts) => {
                    let delay = self.retry.delay_for_retry(attempts);
                    warn!(
                        sink = sink.sink_name(),
                        rule_id = %finding.rule_id,
                        attempt = attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "finding publish failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    warn!(
                        sink = sink.sink_name(),
                        rule_id = %finding.rule_id,
                        resource_id = %finding.resource_id,
                        attempts,
                        error = %e,
                        "finding publish failed"
                    );
                    retryable = e.is_retryable();
                    break Some(e.to_string());
                }
            }
        };

        PublishResult {
            sink: sink.sink_name().to_string(),
            success: error.is_none(),
            attempts,
            error,
            retryable,
            duration_ms: start.elapsed().as_millis() as u64,
        }
    }
}
