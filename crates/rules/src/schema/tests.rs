//! Tests for schema types.

use super::*;
use attest_core::{EvidenceRecord, Severity, ValueType};

const ENCRYPTION_RULE_YAML: &str = r#"
id: s3-bucket-encryption
version: 2
title: S3 buckets encrypt data at rest
target:
  resource_types: [aws.s3.bucket]
condition:
  operator: and
  conditions:
    - attribute: encryption.enabled
      op: equals
      value: true
    - operator: or
      conditions:
        - attribute: encryption.algorithm
          op: in
          value: [AES256, "aws:kms"]
        - attribute: encryption.kms_key_id
          op: present
severity: high
remediation_hint: Enable default server-side encryption on the bucket.
tags: [cis, storage]
"#;

#[test]
fn parse_nested_rule_definition() {
    let rule = RuleDefinition::from_yaml(ENCRYPTION_RULE_YAML).unwrap();

    assert_eq!(rule.id, "s3-bucket-encryption");
    assert_eq!(rule.version, 2);
    assert_eq!(rule.severity, Severity::High);
    assert_eq!(rule.target.resource_types, vec!["aws.s3.bucket"]);
    assert_eq!(rule.tags, vec!["cis", "storage"]);

    match &rule.condition {
        ConditionNode::Group(group) => {
            assert_eq!(group.operator, "and");
            assert_eq!(group.conditions.len(), 2);
            match &group.conditions[0] {
                ConditionNode::Predicate(p) => {
                    assert_eq!(p.attribute, "encryption.enabled");
                    assert_eq!(p.op, "equals");
                    assert_eq!(p.value, Some(serde_yaml::Value::Bool(true)));
                }
                other => panic!("expected predicate, got {other:?}"),
            }
            assert!(matches!(group.conditions[1], ConditionNode::Group(_)));
        }
        other => panic!("expected group, got {other:?}"),
    }

    assert_eq!(
        rule.condition.attribute_paths(),
        vec!["encryption.enabled", "encryption.algorithm", "encryption.kms_key_id"]
    );
}

#[test]
fn unknown_operator_still_parses() {
    // Operator names are validated by the compiler, not the parser.
    let yaml = r#"
id: weird
version: 1
condition:
  attribute: a
  op: roughly_equals
  value: 3
severity: low
"#;
    let rule = RuleDefinition::from_yaml(yaml).unwrap();
    match rule.condition {
        ConditionNode::Predicate(p) => assert_eq!(p.op, "roughly_equals"),
        other => panic!("expected predicate, got {other:?}"),
    }
}

#[test]
fn unknown_top_level_field_rejected() {
    let yaml = r#"
id: r
version: 1
condition: { attribute: a, op: present }
severity: low
owner: someone
"#;
    assert!(RuleDefinition::from_yaml(yaml).is_err());
}

#[test]
fn yaml_roundtrip_preserves_definition() {
    let rule = RuleDefinition::from_yaml(ENCRYPTION_RULE_YAML).unwrap();
    let yaml = rule.to_yaml().unwrap();
    let back = RuleDefinition::from_yaml(&yaml).unwrap();
    assert_eq!(rule, back);
}

#[test]
fn target_selector_matching() {
    let record = EvidenceRecord::new("b1", "aws-prod", "aws.s3.bucket", Default::default());

    assert!(TargetSelector::all().matches(&record));
    assert!(TargetSelector::resource_type("aws.s3.bucket").matches(&record));
    assert!(TargetSelector::resource_type("aws.s3.*").matches(&record));
    assert!(!TargetSelector::resource_type("aws.ec2.*").matches(&record));

    let by_source = TargetSelector {
        resource_types: vec![],
        sources: vec!["aws-staging".into()],
    };
    assert!(!by_source.matches(&record));
}

#[test]
fn catalog_from_yaml() {
    let catalog = AttributeCatalog::from_yaml(
        r#"
attributes:
  encryption.enabled: boolean
  encryption.algorithm: string
  retention_days: integer
  last_rotated: timestamp
  tags: set
"#,
    )
    .unwrap();

    assert_eq!(catalog.len(), 5);
    assert_eq!(catalog.get("encryption.enabled"), Some(ValueType::Boolean));
    assert_eq!(catalog.get("tags"), Some(ValueType::Set));
    assert_eq!(catalog.get("missing"), None);
}

#[test]
fn catalog_rejects_unknown_type() {
    let result = AttributeCatalog::from_yaml("attributes:\n  a: decimal\n");
    assert!(result.is_err());
}
