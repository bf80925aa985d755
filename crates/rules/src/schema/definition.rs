//! Versioned rule definition document.

use serde::{Deserialize, Serialize};

use attest_core::Severity;

use super::{ConditionNode, TargetSelector};

/// A declarative compliance rule, owned by its author.
///
/// Never mutated: a new `version` supersedes the previous one.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct RuleDefinition {
    pub id: String,
    pub version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default)]
    pub target: TargetSelector,
    pub condition: ConditionNode,
    pub severity: Severity,
    /// Opaque to the engine; copied onto findings.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remediation_hint: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

impl RuleDefinition {
    pub fn new(
        id: impl Into<String>,
        version: u32,
        condition: ConditionNode,
        severity: Severity,
    ) -> Self {
        Self {
            id: id.into(),
            version,
            title: None,
            target: TargetSelector::default(),
            condition,
            severity,
            remediation_hint: None,
            tags: Vec::new(),
        }
    }

    pub fn with_target(mut self, target: TargetSelector) -> Self {
        self.target = target;
        self
    }

    pub fn with_remediation_hint(mut self, hint: impl Into<String>) -> Self {
        self.remediation_hint = Some(hint.into());
        self
    }

    pub fn from_yaml(yaml: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(yaml)
    }

    pub fn to_yaml(&self) -> Result<String, serde_yaml::Error> {
        serde_yaml::to_string(self)
    }
}
