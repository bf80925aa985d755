//! HTTP webhook sink.
//!
//! POSTs each finding as JSON. Throttling (429) and server errors (5xx) are
//! retryable; any other non-2xx status is a rejection.

use std::collections::BTreeMap;
use std::time::Duration;

use attest_core::config::resolve_env_vars;
use attest_core::Finding;

use crate::traits::{FindingSink, SinkError};

#[derive(Debug)]
pub struct WebhookSink {
    /// Target URL (env vars already resolved).
    url: String,
    headers: BTreeMap<String, String>,
    client: reqwest::Client,
}

impl WebhookSink {
    /// `${VAR_NAME}` references in `url` and header values are resolved
    /// eagerly; a missing variable is a [`SinkError::Config`].
    pub fn new(url: &str, headers: &BTreeMap<String, String>) -> Result<Self, SinkError> {
        let config_err = |e: attest_core::AttestError| SinkError::Config(e.to_string());
        let url = resolve_env_vars(url).map_err(config_err)?;

        let mut resolved = BTreeMap::new();
        for (key, value) in headers {
            resolved.insert(key.clone(), resolve_env_vars(value).map_err(config_err)?);
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| SinkError::Config(e.to_string()))?;

        Ok(Self {
            url,
            headers: resolved,
            client,
        })
    }
}

/// Map a non-2xx status onto retryable vs. rejected.
fn classify(status: reqwest::StatusCode, body: &str) -> SinkError {
    let message = format!("webhook returned {status}: {body}");
    if status == reqwest::StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        SinkError::Retryable(message)
    } else {
        SinkError::Rejected(message)
    }
}

#[async_trait::async_trait]
impl FindingSink for WebhookSink {
    async fn publish(&self, finding: &Finding) -> Result<(), SinkError> {
        let body = serde_json::to_string(finding)?;

        let mut request = self
            .client
            .post(&self.url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body);
        for (key, value) in &self.headers {
            request = request.header(key.as_str(), value.as_str());
        }

        let response = request.send().await?;
        let status = response.status();

        if !status.is_success() {
            let body_text = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            tracing::warn!(url = %self.url, %status, body = %body_text, "webhook returned non-2xx status");
            return Err(classify(status, &body_text));
        }

        tracing::debug!(
            url = %self.url,
            rule_id = %finding.rule_id,
            resource_id = %finding.resource_id,
            %status,
            "finding delivered to webhook"
        );
        Ok(())
    }

    fn sink_name(&self) -> &str {
        "webhook"
    }
}
