//! Tests for the evaluation engine.

use std::sync::Arc;

use attest_core::{AttributeValue, Attributes, EvidenceRecord, FindingStatus, Severity, ValueType};

use super::*;
use crate::compiler::compile;
use crate::schema::{AttributeCatalog, ConditionNode, RuleDefinition, TargetSelector};

fn catalog() -> AttributeCatalog {
    AttributeCatalog::new()
        .with("a", ValueType::Boolean)
        .with("b", ValueType::Boolean)
        .with("encryption.enabled", ValueType::Boolean)
        .with("retention_days", ValueType::Integer)
        .with("cpu", ValueType::Float)
        .with("region", ValueType::String)
        .with("tags", ValueType::Set)
}

fn is_true(attr: &str) -> ConditionNode {
    ConditionNode::predicate(attr, "equals", Some(serde_yaml::Value::Bool(true)))
}

fn compiled(id: &str, condition: ConditionNode) -> CompiledRule {
    let def = RuleDefinition::new(id, 1, condition, Severity::Medium);
    compile(&def, &catalog()).unwrap()
}

fn record(resource: &str, pairs: &[(&str, AttributeValue)]) -> EvidenceRecord {
    let attrs: Attributes = pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect();
    EvidenceRecord::new(resource, "test-source", "aws.s3.bucket", attrs)
}

#[test]
fn encryption_scenario() {
    let rule = compiled("s3-encryption", is_true("encryption.enabled"));

    let disabled = record("bucket-1", &[("encryption.enabled", AttributeValue::Boolean(false))]);
    let finding = evaluate(&rule, &disabled);
    assert_eq!(finding.status, FindingStatus::Fail);
    assert_eq!(finding.severity, Severity::Medium);
    assert!(finding.reason.is_none());

    let empty = record("bucket-1", &[]);
    let finding = evaluate(&rule, &empty);
    assert_eq!(finding.status, FindingStatus::Indeterminate);
    assert_eq!(finding.reason.as_deref(), Some("missing attribute 'encryption.enabled'"));

    let enabled = record("bucket-1", &[("encryption.enabled", AttributeValue::Boolean(true))]);
    assert_eq!(evaluate(&rule, &enabled).status, FindingStatus::Pass);
}

#[test]
fn and_decided_by_false_sibling() {
    let rule = compiled("a-and-b", ConditionNode::and(vec![is_true("a"), is_true("b")]));

    let b_false = record("r", &[("b", AttributeValue::Boolean(false))]);
    assert_eq!(evaluate(&rule, &b_false).status, FindingStatus::Fail);

    let b_true = record("r", &[("b", AttributeValue::Boolean(true))]);
    assert_eq!(evaluate(&rule, &b_true).status, FindingStatus::Indeterminate);
}

#[test]
fn or_decided_by_true_sibling() {
    let rule = compiled("a-or-b", ConditionNode::or(vec![is_true("a"), is_true("b")]));

    let b_true = record("r", &[("b", AttributeValue::Boolean(true))]);
    assert_eq!(evaluate(&rule, &b_true).status, FindingStatus::Pass);

    let b_false = record("r", &[("b", AttributeValue::Boolean(false))]);
    assert_eq!(evaluate(&rule, &b_false).status, FindingStatus::Indeterminate);
}

#[test]
fn not_flips_known_values_only() {
    let rule = compiled("not-a", ConditionNode::not(is_true("a")));
    assert_eq!(
        evaluate(&rule, &record("r", &[("a", AttributeValue::Boolean(true))])).status,
        FindingStatus::Fail
    );
    assert_eq!(evaluate(&rule, &record("r", &[])).status, FindingStatus::Indeterminate);
}

#[test]
fn malformed_evidence_is_indeterminate_with_reason() {
    let rule = compiled(
        "retention",
        ConditionNode::predicate("retention_days", "gte", Some(serde_yaml::from_str("30").unwrap())),
    );
    let bad = record("r", &[("retention_days", AttributeValue::String("thirty".into()))]);
    let finding = evaluate(&rule, &bad);

    assert_eq!(finding.status, FindingStatus::Indeterminate);
    let reason = finding.reason.unwrap();
    assert!(reason.contains("expected integer"), "{reason}");
    assert!(reason.contains("found string"), "{reason}");
}

#[test]
fn integer_evidence_for_float_attribute() {
    let rule = compiled(
        "cpu",
        ConditionNode::predicate("cpu", "lt", Some(serde_yaml::from_str("80.5").unwrap())),
    );
    let r = record("r", &[("cpu", AttributeValue::Integer(80))]);
    assert_eq!(evaluate(&rule, &r).status, FindingStatus::Pass);

    let nan = record("r", &[("cpu", AttributeValue::Float(f64::NAN))]);
    assert_eq!(evaluate(&rule, &nan).status, FindingStatus::Indeterminate);
}

#[test]
fn large_integer_evidence_is_not_rounded_to_float_literal() {
    let literal = || Some(serde_yaml::from_str("9007199254740992.0").unwrap());
    let equals = compiled("cpu-eq", ConditionNode::predicate("cpu", "equals", literal()));
    let above = compiled("cpu-gt", ConditionNode::predicate("cpu", "gt", literal()));

    let r = record("r", &[("cpu", AttributeValue::Integer(9_007_199_254_740_993))]);
    assert_eq!(evaluate(&equals, &r).status, FindingStatus::Fail);
    assert_eq!(evaluate(&above, &r).status, FindingStatus::Pass);
}

#[test]
fn set_string_and_existence_operators() {
    let rule = compiled(
        "mixed",
        ConditionNode::and(vec![
            ConditionNode::predicate(
                "region",
                "in",
                Some(serde_yaml::from_str("[eu-west-1, eu-central-1]").unwrap()),
            ),
            ConditionNode::predicate("tags", "contains", Some(serde_yaml::Value::String("pii".into()))),
            ConditionNode::predicate("region", "matches", Some(serde_yaml::Value::String("^eu-".into()))),
            ConditionNode::predicate("cpu", "absent", None),
        ]),
    );

    let tags: std::collections::BTreeSet<String> = ["pii".to_string()].into();
    let ok = record(
        "r",
        &[
            ("region", AttributeValue::String("eu-west-1".into())),
            ("tags", AttributeValue::Set(tags.clone())),
        ],
    );
    assert_eq!(evaluate(&rule, &ok).status, FindingStatus::Pass);

    let with_cpu = record(
        "r",
        &[
            ("region", AttributeValue::String("eu-west-1".into())),
            ("tags", AttributeValue::Set(tags)),
            ("cpu", AttributeValue::Float(1.0)),
        ],
    );
    assert_eq!(evaluate(&rule, &with_cpu).status, FindingStatus::Fail);
}

#[test]
fn evaluation_is_deterministic() {
    let rule = compiled("a-and-b", ConditionNode::and(vec![is_true("a"), is_true("b")]));
    let r = record("r", &[("a", AttributeValue::Boolean(true))]).with_version(4);
    let at = Utc::now();

    let first = evaluate_at(&rule, &r, at);
    let second = evaluate_at(&rule, &r, at);
    assert_eq!(first, second);
    assert_eq!(first.evidence_version, 4);
}

#[test]
fn batch_groups_by_target_and_isolates_bad_evidence() {
    let s3_rule = compiled("s3", is_true("encryption.enabled"));
    let mut ec2_rule = compiled("ec2", is_true("a"));
    ec2_rule.target = TargetSelector::resource_type("aws.ec2.*");
    let s3_rule = CompiledRule {
        target: TargetSelector::resource_type("aws.s3.*"),
        ..s3_rule
    };

    let good = record("bucket-1", &[("encryption.enabled", AttributeValue::Boolean(true))]).with_version(1);
    let bad = record("bucket-2", &[("encryption.enabled", AttributeValue::Integer(1))]).with_version(1);
    let missing = record("bucket-3", &[]).with_version(1);
    let mut instance = record("i-1", &[("a", AttributeValue::Boolean(false))]).with_version(1);
    instance.resource_type = "aws.ec2.instance".into();

    let rules = vec![Arc::new(s3_rule), Arc::new(ec2_rule)];
    let evidence = vec![good.clone(), bad, missing, instance, good];
    let findings = evaluate_batch(&rules, &evidence);

    let summary: Vec<(&str, &str, FindingStatus)> = findings
        .iter()
        .map(|f| (f.rule_id.as_str(), f.resource_id.as_str(), f.status))
        .collect();
    assert_eq!(
        summary,
        vec![
            ("s3", "bucket-1", FindingStatus::Pass),
            ("s3", "bucket-2", FindingStatus::Indeterminate),
            ("s3", "bucket-3", FindingStatus::Indeterminate),
            ("ec2", "i-1", FindingStatus::Fail),
        ]
    );
}

#[test]
fn batch_preserves_per_resource_order_and_skips_duplicate_rules() {
    let rule = compiled("a", is_true("a"));
    let v1 = record("r", &[("a", AttributeValue::Boolean(false))]).with_version(1);
    let v2 = record("r", &[("a", AttributeValue::Boolean(true))]).with_version(2);

    let rules = [rule.clone(), rule];
    let findings = evaluate_batch(&rules, &[v1, v2]);

    let versions: Vec<u64> = findings.iter().map(|f| f.evidence_version).collect();
    assert_eq!(versions, vec![1, 2]);
    assert_eq!(findings[0].status, FindingStatus::Fail);
    assert_eq!(findings[1].status, FindingStatus::Pass);
}
