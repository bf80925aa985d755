//! Source configuration loaded from the sources YAML file.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use attest_core::{flatten_json, EvidenceRecord};

use crate::error::CollectError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    /// Records listed inline in the config.
    Static,
    /// JSON-lines evidence file.
    File,
    /// Paged JSON endpoint.
    Http,
}

impl SourceKind {
    pub fn as_str(self) -> &'static str {
        match self {
            SourceKind::Static => "static",
            SourceKind::File => "file",
            SourceKind::Http => "http",
        }
    }
}

/// Per-source token bucket parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    pub capacity: u32,
    pub refill_per_sec: f64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            capacity: 10,
            refill_per_sec: 5.0,
        }
    }
}

/// Smallest non-zero refill rate a source may configure, in tokens per second.
pub const MIN_REFILL_PER_SEC: f64 = 1e-3;

fn default_page_size() -> usize {
    100
}

/// One evidence source. Which optional fields are required depends on `kind`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SourceConfig {
    pub id: String,
    pub kind: SourceKind,
    /// Resource type stamped on records that do not carry their own.
    pub resource_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Extra request headers; values may reference `${ENV_VARS}`.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub records: Vec<RawRecord>,
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    /// Fail with `RateLimitExceeded` instead of waiting longer than this.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acquire_timeout_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_timeout_ms: Option<u64>,
}

impl SourceConfig {
    pub fn new(id: impl Into<String>, kind: SourceKind, resource_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind,
            resource_type: resource_type.into(),
            path: None,
            url: None,
            headers: BTreeMap::new(),
            records: Vec::new(),
            page_size: default_page_size(),
            rate_limit: RateLimitConfig::default(),
            acquire_timeout_ms: None,
            request_timeout_ms: None,
        }
    }

    pub fn with_rate_limit(mut self, capacity: u32, refill_per_sec: f64) -> Self {
        self.rate_limit = RateLimitConfig {
            capacity,
            refill_per_sec,
        };
        self
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    pub fn acquire_timeout(&self) -> Option<Duration> {
        self.acquire_timeout_ms.map(Duration::from_millis)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms.unwrap_or(30_000))
    }

    pub fn validate(&self) -> Result<(), CollectError> {
        let fail = |reason: &str| Err(CollectError::Config(format!("source '{}': {reason}", self.id)));

        if self.id.trim().is_empty() {
            return Err(CollectError::Config("source id must not be empty".into()));
        }
        if self.page_size == 0 {
            return fail("page_size must be at least 1");
        }
        if self.rate_limit.capacity == 0 {
            return fail("rate_limit.capacity must be at least 1");
        }
        if !self.rate_limit.refill_per_sec.is_finite() || self.rate_limit.refill_per_sec < 0.0 {
            return fail("rate_limit.refill_per_sec must be a non-negative number");
        }
        if self.rate_limit.refill_per_sec > 0.0 && self.rate_limit.refill_per_sec < MIN_REFILL_PER_SEC {
            return fail(&format!(
                "rate_limit.refill_per_sec must be 0 or at least {MIN_REFILL_PER_SEC}"
            ));
        }
        match self.kind {
            SourceKind::File if self.path.is_none() => fail("file sources need a path"),
            SourceKind::Http if self.url.is_none() => fail("http sources need a url"),
            _ => Ok(()),
        }
    }
}

/// Evidence as written by producers: nested attributes, optional type and time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawRecord {
    pub resource_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_type: Option<String>,
    #[serde(default)]
    pub attributes: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_at: Option<DateTime<Utc>>,
}

impl RawRecord {
    /// Flatten into an [`EvidenceRecord`] attributed to `source`.
    pub fn into_record(self, source: &SourceConfig) -> EvidenceRecord {
        let record = EvidenceRecord::new(
            self.resource_id,
            source.id.clone(),
            self.resource_type.unwrap_or_else(|| source.resource_type.clone()),
            flatten_json(&self.attributes),
        );
        match self.observed_at {
            Some(at) => record.with_observed_at(at),
            None => record,
        }
    }
}

#[derive(Debug, Deserialize)]
struct SourcesFile {
    #[serde(default)]
    sources: Vec<SourceConfig>,
}

/// Parse and validate a sources document. Source ids must be unique.
pub fn parse_sources(yaml: &str) -> Result<Vec<SourceConfig>, CollectError> {
    let file: SourcesFile =
        serde_yaml::from_str(yaml).map_err(|e| CollectError::Config(e.to_string()))?;

    let mut seen = HashSet::new();
    for source in &file.sources {
        source.validate()?;
        if !seen.insert(source.id.as_str()) {
            return Err(CollectError::Config(format!("duplicate source id '{}'", source.id)));
        }
    }
    Ok(file.sources)
}

pub fn load_sources(path: &Path) -> Result<Vec<SourceConfig>, CollectError> {
    let yaml = std::fs::read_to_string(path)
        .map_err(|e| CollectError::Config(format!("{}: {e}", path.display())))?;
    parse_sources(&yaml)
}
