use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Outcome of evaluating one rule against one evidence record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FindingStatus {
    Pass,
    Fail,
    /// Required evidence was missing or malformed. Not a failure.
    Indeterminate,
}

impl std::fmt::Display for FindingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FindingStatus::Pass => write!(f, "pass"),
            FindingStatus::Fail => write!(f, "fail"),
            FindingStatus::Indeterminate => write!(f, "indeterminate"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Low,
    Medium,
    High,
    Critical,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Info => write!(f, "info"),
            Severity::Low => write!(f, "low"),
            Severity::Medium => write!(f, "medium"),
            Severity::High => write!(f, "high"),
            Severity::Critical => write!(f, "critical"),
        }
    }
}

/// A single evaluation result, produced fresh on every evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    pub rule_id: String,
    pub rule_version: u32,
    pub resource_id: String,
    pub evidence_version: u64,
    pub status: FindingStatus,
    pub severity: Severity,
    pub evaluated_at: DateTime<Utc>,
    /// Why the outcome is indeterminate (missing path, type mismatch).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remediation_hint: Option<String>,
}

impl Finding {
    pub fn is_failure(&self) -> bool {
        self.status == FindingStatus::Fail
    }
}
