//! Rule compiler: validates a [`RuleDefinition`] against the attribute catalog
//! and lowers it into an annotated predicate tree.
//!
//! Compilation is pure. Every issue in a definition is collected and returned
//! together; a rule either compiles completely or not at all.

mod error;
pub(crate) mod fuzzy;
mod plan;


use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde_yaml::Value;

use attest_core::{AttributeValue, ValueType};

use crate::schema::{AttributeCatalog, Composition, ConditionNode, Predicate, RuleDefinition};

pub use self::error::{CompilationError, CompileIssue, IssueKind};
pub use self::plan::{CompareOp, CompiledRule, Leaf, LeafTest, NodeKind, Operator, Pattern, PlanNode};

use self::error::Issues;

const CONNECTIVES: &[&str] = &["and", "or", "not"];

/// Compile `definition` against the declared attribute types in `catalog`.
pub fn compile(
    definition: &RuleDefinition,
    catalog: &AttributeCatalog,
) -> Result<CompiledRule, CompilationError> {
    let mut issues = Issues::default();

    if definition.id.trim().is_empty() {
        issues.push("id", IssueKind::InvalidStructure, "rule id must not be empty");
    }
    if definition.version == 0 {
        issues.push("version", IssueKind::InvalidStructure, "rule version must be at least 1");
    }
    for (i, pattern) in definition.target.resource_types.iter().enumerate() {
        if pattern.trim_end_matches('*').contains('*') {
            issues.push(
                format!("target.resource_types[{i}]"),
                IssueKind::InvalidStructure,
                format!("'{pattern}' may only use '*' as a trailing wildcard"),
            );
        }
    }

    let root = compile_node(&definition.condition, "condition", catalog, &mut issues);

    match root {
        Some(root) if issues.is_empty() => Ok(CompiledRule {
            id: definition.id.clone(),
            version: definition.version,
            title: definition.title.clone(),
            target: definition.target.clone(),
            severity: definition.severity,
            remediation_hint: definition.remediation_hint.clone(),
            dependencies: root.reads.clone(),
            root,
        }),
        _ => Err(issues.into_error(&definition.id)),
    }
}

fn compile_node(
    node: &ConditionNode,
    path: &str,
    catalog: &AttributeCatalog,
    issues: &mut Issues,
) -> Option<PlanNode> {
    match node {
        ConditionNode::Predicate(p) => compile_predicate(p, path, catalog, issues),
        ConditionNode::Group(g) => compile_group(g, path, catalog, issues),
    }
}

fn compile_group(
    group: &Composition,
    path: &str,
    catalog: &AttributeCatalog,
    issues: &mut Issues,
) -> Option<PlanNode> {
    // Children are compiled even when the connective is bad so all issues surface.
    let children: Vec<Option<PlanNode>> = group
        .conditions
        .iter()
        .enumerate()
        .map(|(i, child)| compile_node(child, &format!("{path}.conditions[{i}]"), catalog, issues))
        .collect();

    let arity_ok = match group.operator.as_str() {
        "and" | "or" if group.conditions.is_empty() => {
            issues.push(
                format!("{path}.conditions"),
                IssueKind::InvalidStructure,
                format!("'{}' needs at least one condition", group.operator),
            );
            false
        }
        "not" if group.conditions.len() != 1 => {
            issues.push(
                format!("{path}.conditions"),
                IssueKind::InvalidStructure,
                format!("'not' takes exactly one condition, got {}", group.conditions.len()),
            );
            false
        }
        "and" | "or" | "not" => true,
        other => {
            issues.push_with_suggestion(
                format!("{path}.operator"),
                IssueKind::UnknownOperator,
                format!("unknown connective '{other}'"),
                fuzzy::closest(other, CONNECTIVES.iter().copied()),
            );
            false
        }
    };

    let children: Vec<PlanNode> = children.into_iter().collect::<Option<_>>()?;
    if !arity_ok {
        return None;
    }

    match group.operator.as_str() {
        "and" => Some(PlanNode::and(children)),
        "or" => Some(PlanNode::or(children)),
        _ => children.into_iter().next().map(PlanNode::not),
    }
}

fn compile_predicate(
    predicate: &Predicate,
    path: &str,
    catalog: &AttributeCatalog,
    issues: &mut Issues,
) -> Option<PlanNode> {
    let op = Operator::parse(&predicate.op);
    if op.is_none() {
        issues.push_with_suggestion(
            format!("{path}.op"),
            IssueKind::UnknownOperator,
            format!("unknown operator '{}'", predicate.op),
            fuzzy::closest(&predicate.op, Operator::NAMES.iter().copied()),
        );
    }

    let expected = catalog.get(&predicate.attribute);
    if expected.is_none() {
        issues.push_with_suggestion(
            format!("{path}.attribute"),
            IssueKind::UnresolvablePath,
            format!("attribute '{}' is not declared in the catalog", predicate.attribute),
            fuzzy::closest(&predicate.attribute, catalog.paths()),
        );
    }

    let (op, expected) = (op?, expected?);
    let test = compile_test(predicate, op, expected, path, issues)?;
    Some(PlanNode::leaf(Leaf {
        path: predicate.attribute.clone(),
        expected,
        test,
    }))
}

fn compile_test(
    predicate: &Predicate,
    op: Operator,
    expected: ValueType,
    path: &str,
    issues: &mut Issues,
) -> Option<LeafTest> {
    let value_path = format!("{path}.value");
    let op_path = format!("{path}.op");

    if !op.takes_value() {
        if predicate.value.is_some() {
            issues.push(
                value_path,
                IssueKind::InvalidLiteral,
                format!("operator '{}' takes no value", predicate.op),
            );
            return None;
        }
        return Some(if op == Operator::Present {
            LeafTest::Present
        } else {
            LeafTest::Absent
        });
    }

    let Some(value) = predicate.value.as_ref() else {
        issues.push(
            value_path,
            IssueKind::InvalidLiteral,
            format!("operator '{}' requires a value", predicate.op),
        );
        return None;
    };

    match op {
        Operator::Compare(cmp) => {
            if cmp.is_ordering() && !expected.is_ordered() {
                type_mismatch(issues, &op_path, predicate, expected, "an ordered type");
                return None;
            }
            match literal_for(expected, value) {
                Ok(literal) => Some(LeafTest::Compare { op: cmp, literal }),
                Err(reason) => {
                    issues.push(value_path, IssueKind::TypeMismatch, reason);
                    None
                }
            }
        }
        Operator::In => {
            if expected != ValueType::String {
                type_mismatch(issues, &op_path, predicate, expected, "a string attribute");
                return None;
            }
            match string_list(value) {
                Some(set) if !set.is_empty() => Some(LeafTest::InSet(set)),
                _ => {
                    issues.push(
                        value_path,
                        IssueKind::TypeMismatch,
                        "'in' expects a non-empty list of strings",
                    );
                    None
                }
            }
        }
        Operator::Contains => {
            if expected != ValueType::Set {
                type_mismatch(issues, &op_path, predicate, expected, "a set attribute");
                return None;
            }
            match value {
                Value::String(s) => Some(LeafTest::Contains(s.clone())),
                other => {
                    issues.push(
                        value_path,
                        IssueKind::TypeMismatch,
                        format!("'contains' expects a string, found {}", describe(other)),
                    );
                    None
                }
            }
        }
        Operator::Matches => {
            if expected != ValueType::String {
                type_mismatch(issues, &op_path, predicate, expected, "a string attribute");
                return None;
            }
            let Value::String(source) = value else {
                issues.push(
                    value_path,
                    IssueKind::TypeMismatch,
                    format!("'matches' expects a pattern string, found {}", describe(value)),
                );
                return None;
            };
            match Pattern::new(source) {
                Ok(pattern) => Some(LeafTest::Matches(pattern)),
                Err(e) => {
                    issues.push(value_path, IssueKind::InvalidLiteral, format!("invalid pattern: {e}"));
                    None
                }
            }
        }
        Operator::Present | Operator::Absent => None,
    }
}

fn type_mismatch(
    issues: &mut Issues,
    op_path: &str,
    predicate: &Predicate,
    expected: ValueType,
    needed: &str,
) {
    issues.push(
        op_path,
        IssueKind::TypeMismatch,
        format!(
            "operator '{}' needs {needed}, but '{}' is declared {expected}",
            predicate.op, predicate.attribute
        ),
    );
}

/// Type a YAML literal by the attribute's declared type.
///
/// Integer literals are widened for float attributes; nothing else is coerced.
fn literal_for(ty: ValueType, value: &Value) -> Result<AttributeValue, String> {
    let mismatch = || format!("expected a {ty} literal, found {}", describe(value));

    match (ty, value) {
        (ValueType::Boolean, Value::Bool(b)) => Ok(AttributeValue::Boolean(*b)),
        (ValueType::Integer, Value::Number(n)) => {
            n.as_i64().map(AttributeValue::Integer).ok_or_else(mismatch)
        }
        (ValueType::Float, Value::Number(n)) => match n.as_f64() {
            Some(f) if f.is_finite() => Ok(AttributeValue::Float(f)),
            _ => Err(format!("float literal must be finite, found {n}")),
        },
        (ValueType::String, Value::String(s)) => Ok(AttributeValue::String(s.clone())),
        (ValueType::Timestamp, Value::String(s)) => DateTime::parse_from_rfc3339(s)
            .map(|ts| AttributeValue::Timestamp(ts.with_timezone(&Utc)))
            .map_err(|e| format!("expected an RFC 3339 timestamp, '{s}' is invalid: {e}")),
        (ValueType::Set, Value::Sequence(_)) => {
            string_list(value).map(AttributeValue::Set).ok_or_else(mismatch)
        }
        _ => Err(mismatch()),
    }
}

fn string_list(value: &Value) -> Option<BTreeSet<String>> {
    match value {
        Value::Sequence(items) => items
            .iter()
            .map(|item| item.as_str().map(str::to_string))
            .collect(),
        _ => None,
    }
}

fn describe(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_f64() => "float",
        Value::Number(_) => "integer",
        Value::String(_) => "string",
        Value::Sequence(_) => "list",
        Value::Mapping(_) => "mapping",
        Value::Tagged(_) => "tagged value",
    }
}
