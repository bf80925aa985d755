//! Target selectors: which evidence a rule applies to.

use serde::{Deserialize, Serialize};

use attest_core::EvidenceRecord;

/// Selects evidence by resource type and source.
///
/// Empty lists match everything. Resource type patterns match exactly, or by
/// prefix when they end in `*` (`aws.s3.*`).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(deny_unknown_fields)]
pub struct TargetSelector {
    #[serde(default)]
    pub resource_types: Vec<String>,
    #[serde(default)]
    pub sources: Vec<String>,
}

impl TargetSelector {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn resource_type(pattern: impl Into<String>) -> Self {
        Self {
            resource_types: vec![pattern.into()],
            sources: Vec::new(),
        }
    }

    pub fn matches(&self, record: &EvidenceRecord) -> bool {
        let type_ok = self.resource_types.is_empty()
            || self
                .resource_types
                .iter()
                .any(|p| pattern_matches(p, &record.resource_type));
        let source_ok =
            self.sources.is_empty() || self.sources.iter().any(|s| s == &record.source_id);
        type_ok && source_ok
    }
}

fn pattern_matches(pattern: &str, value: &str) -> bool {
    match pattern.strip_suffix('*') {
        Some(prefix) => value.starts_with(prefix),
        None => pattern == value,
    }
}
