//! Tests for the rule loader module.

use std::fs;
use std::sync::Arc;

use attest_core::ValueType;
use tempfile::TempDir;

use super::*;
use crate::cache::RuleCache;
use crate::schema::AttributeCatalog;

const VALID_RULE_YAML: &str = r#"
id: bucket-encryption
version: 1
target:
  resource_types: [aws.s3.bucket]
condition:
  attribute: encryption.enabled
  op: equals
  value: true
severity: high
remediation_hint: Enable default encryption.
"#;

const BAD_OPERATOR_YAML: &str = r#"
id: bad-operator
version: 1
condition:
  attribute: encryption.enabled
  op: equalz
  value: true
severity: low
"#;

fn temp_loader() -> (TempDir, RuleLoader) {
    let dir = TempDir::new().expect("create tempdir");
    let catalog = AttributeCatalog::new()
        .with("encryption.enabled", ValueType::Boolean)
        .with("public", ValueType::Boolean);
    let loader = RuleLoader::new(dir.path().to_path_buf(), Arc::new(RuleCache::new(catalog)));
    (dir, loader)
}

#[test]
fn load_rule_from_file() {
    let (dir, loader) = temp_loader();
    let rule_path = dir.path().join("bucket-encryption.yml");
    fs::write(&rule_path, VALID_RULE_YAML).unwrap();

    let def = loader.load_file(&rule_path).unwrap();
    assert_eq!(def.id, "bucket-encryption");
    assert_eq!(def.remediation_hint.as_deref(), Some("Enable default encryption."));
    // Parsing alone does not install.
    assert!(loader.cache().get("bucket-encryption").is_none());
}

#[test]
fn load_all_skips_dotfiles_and_non_yaml() {
    let (dir, loader) = temp_loader();

    fs::write(dir.path().join("rule1.yml"), VALID_RULE_YAML).unwrap();
    fs::write(dir.path().join(".hidden.yml"), VALID_RULE_YAML).unwrap();
    fs::write(dir.path().join("readme.txt"), "not a rule").unwrap();

    let results = loader.load_all().unwrap();

    let loaded = results.iter().filter(|r| r.is_loaded()).count();
    let skipped = results
        .iter()
        .filter(|r| matches!(r.status, LoadStatus::Skipped { .. }))
        .count();
    assert_eq!(loaded, 1);
    assert_eq!(skipped, 2);

    let rule = loader.cache().get("bucket-encryption").unwrap();
    assert_eq!(rule.version, 1);
    assert_eq!(
        loader.rule_for_path(&dir.path().join("rule1.yml")).as_deref(),
        Some("bucket-encryption")
    );
}

#[test]
fn load_all_recurses_into_subdirectories() {
    let (dir, loader) = temp_loader();
    let nested = dir.path().join("aws").join("s3");
    fs::create_dir_all(&nested).unwrap();
    fs::write(nested.join("encryption.yaml"), VALID_RULE_YAML).unwrap();

    let results = loader.load_all().unwrap();
    assert_eq!(results.len(), 1);
    assert!(results[0].is_loaded());
}

#[test]
fn compile_errors_are_reported_per_file() {
    let (dir, loader) = temp_loader();
    fs::write(dir.path().join("good.yml"), VALID_RULE_YAML).unwrap();
    fs::write(dir.path().join("bad.yml"), BAD_OPERATOR_YAML).unwrap();
    fs::write(dir.path().join("garbage.yml"), "{{{{ not yaml").unwrap();

    let results = loader.load_all().unwrap();
    let failed: Vec<&LoadResult> = results.iter().filter(|r| r.is_failed()).collect();
    assert_eq!(failed.len(), 2);

    let bad = failed
        .iter()
        .find(|r| r.path.ends_with("bad.yml"))
        .expect("bad.yml reported");
    match &bad.status {
        LoadStatus::Failed { error } => {
            assert!(error.contains("condition.op"), "{error}");
            assert!(error.contains("equals"), "{error}");
        }
        other => panic!("expected failure, got {other:?}"),
    }

    assert_eq!(loader.cache().snapshot().len(), 1);
}

#[test]
fn older_version_file_is_rejected() {
    let (dir, loader) = temp_loader();
    fs::write(dir.path().join("a.yml"), VALID_RULE_YAML.replace("version: 1", "version: 3")).unwrap();
    fs::write(dir.path().join("b.yml"), VALID_RULE_YAML).unwrap();

    let results = loader.load_all().unwrap();
    assert!(results[0].is_loaded());
    match &results[1].status {
        LoadStatus::Failed { error } => assert!(error.contains("superseded"), "{error}"),
        other => panic!("expected superseded failure, got {other:?}"),
    }
    assert_eq!(loader.cache().get("bucket-encryption").unwrap().version, 3);
}

#[test]
fn missing_directory_is_created() {
    let dir = TempDir::new().unwrap();
    let rules_dir = dir.path().join("does").join("not").join("exist");
    let loader = RuleLoader::new(
        rules_dir.clone(),
        Arc::new(RuleCache::new(AttributeCatalog::new())),
    );
    assert!(rules_dir.is_dir());
    assert!(loader.load_all().unwrap().is_empty());
}
