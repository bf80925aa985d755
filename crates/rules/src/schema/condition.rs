//! Boolean condition tree as written by rule authors.

use serde::{Deserialize, Serialize};

/// A condition leaf or nested group.
///
/// Operators are kept as strings so that unknown operators surface as
/// compilation errors with a path rather than opaque parse failures.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum ConditionNode {
    /// A check against a single attribute path.
    Predicate(Predicate),
    /// A nested group for recursive boolean logic.
    Group(Composition),
}

/// Boolean connective over child conditions (`and`, `or`, `not`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Composition {
    pub operator: String,
    pub conditions: Vec<ConditionNode>,
}

/// Leaf comparison: `attribute <op> value`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Predicate {
    pub attribute: String,
    pub op: String,
    /// Literal operand, typed by the compiler against the catalog.
    /// Omitted for `present` / `absent`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<serde_yaml::Value>,
}

impl ConditionNode {
    pub fn predicate(
        attribute: impl Into<String>,
        op: impl Into<String>,
        value: Option<serde_yaml::Value>,
    ) -> Self {
        ConditionNode::Predicate(Predicate {
            attribute: attribute.into(),
            op: op.into(),
            value,
        })
    }

    pub fn group(operator: impl Into<String>, conditions: Vec<ConditionNode>) -> Self {
        ConditionNode::Group(Composition {
            operator: operator.into(),
            conditions,
        })
    }

    pub fn and(conditions: Vec<ConditionNode>) -> Self {
        Self::group("and", conditions)
    }

    pub fn or(conditions: Vec<ConditionNode>) -> Self {
        Self::group("or", conditions)
    }

    pub fn not(condition: ConditionNode) -> Self {
        Self::group("not", vec![condition])
    }

    /// Every attribute path mentioned anywhere in the tree, in document order.
    pub fn attribute_paths(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect_paths(&mut out);
        out
    }

    fn collect_paths<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            ConditionNode::Predicate(p) => out.push(p.attribute.as_str()),
            ConditionNode::Group(g) => {
                for child in &g.conditions {
                    child.collect_paths(out);
                }
            }
        }
    }
}
