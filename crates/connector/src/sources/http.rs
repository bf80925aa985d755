use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};

use attest_core::config::resolve_env_vars;

use crate::adapter::{Page, SourceAdapter};
use crate::config::{RawRecord, SourceConfig};
use crate::error::{AdapterError, CollectError};

/// Body of one page from a paged evidence endpoint.
#[derive(Debug, Deserialize)]
struct PageBody {
    #[serde(default)]
    records: Vec<RawRecord>,
    #[serde(default)]
    next_cursor: Option<String>,
}

/// Fetches pages with `GET <url>?limit=<page_size>[&cursor=<cursor>]`.
///
/// `${VAR}` references in the URL and header values are resolved once, at
/// construction.
#[derive(Debug)]
pub struct HttpAdapter {
    config: SourceConfig,
    url: String,
    headers: BTreeMap<String, String>,
    client: reqwest::Client,
}

impl HttpAdapter {
    pub fn from_config(config: &SourceConfig) -> Result<Self, CollectError> {
        let context = |e: attest_core::AttestError| CollectError::Config(format!("source '{}': {e}", config.id));

        let url = config
            .url
            .as_deref()
            .ok_or_else(|| CollectError::Config(format!("source '{}': http sources need a url", config.id)))?;
        let url = resolve_env_vars(url).map_err(context)?;

        let mut headers = BTreeMap::new();
        for (key, value) in &config.headers {
            headers.insert(key.clone(), resolve_env_vars(value).map_err(context)?);
        }

        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| CollectError::Config(format!("source '{}': {e}", config.id)))?;

        Ok(Self {
            config: config.clone(),
            url,
            headers,
            client,
        })
    }
}

#[async_trait]
impl SourceAdapter for HttpAdapter {
    fn kind(&self) -> &'static str {
        "http"
    }

    async fn fetch_page(&self, cursor: Option<String>) -> Result<Page, AdapterError> {
        let mut request = self
            .client
            .get(&self.url)
            .query(&[("limit", self.config.page_size.to_string())]);
        if let Some(cursor) = &cursor {
            request = request.query(&[("cursor", cursor)]);
        }
        for (key, value) in &self.headers {
            request = request.header(key.as_str(), value.as_str());
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            warn!(url = %self.url, %status, "evidence endpoint returned non-2xx status");
            return Err(AdapterError::Status {
                url: self.url.clone(),
                status: status.as_u16(),
            });
        }

        let body: PageBody = response.json().await?;
        debug!(url = %self.url, records = body.records.len(), "evidence page received");

        Ok(Page {
            records: body
                .records
                .into_iter()
                .map(|raw| raw.into_record(&self.config))
                .collect(),
            next_cursor: body.next_cursor,
        })
    }
}
