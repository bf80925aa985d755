//! Connects pipeline dispatch to the rule engine and the finding publisher.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tracing::debug;

use attest_core::{compute_dedup_key, EvidenceRecord, Finding};
use attest_notify::FindingPublisher;
use attest_queue::{DispatchError, EvidenceHandler};
use attest_rules::{evaluate, RuleCache};

/// `(rule id, rule version, resource id, evidence content key)`.
///
/// The content key is the record's dedup key, which unlike its version is
/// the same when a dead-lettered record is replayed.
type FindingKey = (String, u32, String, String);

/// Evaluates every active rule targeting a record and publishes the findings.
///
/// A publish failure that a sink may still accept later is a transient
/// dispatch failure, so the pipeline retries the record and eventually
/// dead-letters it. When every failing sink rejected the finding the failure
/// is permanent. Findings that already went out for a record are not
/// published again on retry or replay.
pub struct EvaluationHandler {
    cache: Arc<RuleCache>,
    publisher: Arc<FindingPublisher>,
    delivered: Mutex<HashSet<FindingKey>>,
}

impl EvaluationHandler {
    pub fn new(cache: Arc<RuleCache>, publisher: Arc<FindingPublisher>) -> Self {
        Self {
            cache,
            publisher,
            delivered: Mutex::new(HashSet::new()),
        }
    }

    /// Findings the active rules produce for `record`, in rule id order.
    pub fn findings_for(&self, record: &EvidenceRecord) -> Vec<Finding> {
        let rules = self.cache.snapshot();
        rules
            .iter()
            .filter(|rule| rule.target.matches(record))
            .map(|rule| evaluate(rule, record))
            .collect()
    }

    fn already_delivered(&self, key: &FindingKey) -> bool {
        self.delivered
            .lock()
            .expect("delivered set lock poisoned")
            .contains(key)
    }

    fn mark_delivered(&self, key: FindingKey) {
        self.delivered
            .lock()
            .expect("delivered set lock poisoned")
            .insert(key);
    }

    fn forget(&self, keys: &[FindingKey]) {
        let mut delivered = self.delivered.lock().expect("delivered set lock poisoned");
        for key in keys {
            delivered.remove(key);
        }
    }
}

#[async_trait]
impl EvidenceHandler for EvaluationHandler {
    async fn handle(&self, record: &EvidenceRecord) -> Result<(), DispatchError> {
        let findings = self.findings_for(record);
        debug!(
            resource_id = %record.resource_id,
            version = record.version,
            findings = findings.len(),
            "evaluated evidence"
        );

        let content = compute_dedup_key(&record.resource_id, &record.source_id, &record.attributes);
        let mut keys = Vec::with_capacity(findings.len());
        for finding in &findings {
            let key = (
                finding.rule_id.clone(),
                finding.rule_version,
                finding.resource_id.clone(),
                content.clone(),
            );
            if !self.already_delivered(&key) {
                self.publisher.publish(finding).await.map_err(|e| {
                    if e.retryable {
                        DispatchError::Transient(e.to_string())
                    } else {
                        DispatchError::Permanent(e.to_string())
                    }
                })?;
                self.mark_delivered(key.clone());
            }
            keys.push(key);
        }

        // Every finding for this record is out; the bookkeeping can go.
        self.forget(&keys);
        Ok(())
    }
}

#[cfg(test)]
impl EvaluationHandler {
    fn pending_marks(&self) -> usize {
        self.delivered.lock().expect("delivered set lock poisoned").len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use attest_core::{AttributeValue, Attributes, FindingStatus, RetryPolicy, Severity, ValueType};
    use attest_notify::{FindingSink, MemorySink};
    use attest_rules::{AttributeCatalog, ConditionNode, RuleDefinition, TargetSelector};
    use std::time::Duration;

    fn cache() -> Arc<RuleCache> {
        let catalog = AttributeCatalog::new()
            .with("encryption.enabled", ValueType::Boolean)
            .with("versioning.enabled", ValueType::Boolean)
            .with("mfa.enabled", ValueType::Boolean);
        let cache = Arc::new(RuleCache::new(catalog));
        for (id, path, rtype) in [
            ("s3-encryption", "encryption.enabled", "aws.s3.*"),
            ("s3-versioning", "versioning.enabled", "aws.s3.bucket"),
            ("iam-mfa", "mfa.enabled", "iam.user"),
        ] {
            let definition = RuleDefinition::new(
                id,
                1,
                ConditionNode::predicate(path, "equals", Some(serde_yaml::Value::Bool(true))),
                Severity::High,
            )
            .with_target(TargetSelector::resource_type(rtype));
            cache.install(&definition).unwrap();
        }
        cache
    }

    fn bucket(encrypted: bool) -> EvidenceRecord {
        let attributes = Attributes::from([("encryption.enabled".to_string(), AttributeValue::Boolean(encrypted))]);
        EvidenceRecord::new("arn:aws:s3:::b1", "inventory", "aws.s3.bucket", attributes).with_version(1)
    }

    fn publisher(sink: Arc<MemorySink>, attempts: u32) -> Arc<FindingPublisher> {
        let sinks: Vec<Arc<dyn FindingSink>> = vec![sink];
        Arc::new(FindingPublisher::new(
            sinks,
            RetryPolicy::new(attempts, Duration::from_millis(1), Duration::from_millis(1)),
        ))
    }

    #[tokio::test]
    async fn only_targeted_rules_are_evaluated() {
        let sink = Arc::new(MemorySink::new());
        let handler = EvaluationHandler::new(cache(), publisher(sink.clone(), 1));

        handler.handle(&bucket(false)).await.unwrap();

        let findings = sink.findings();
        let rules: Vec<&str> = findings.iter().map(|f| f.rule_id.as_str()).collect();
        assert_eq!(rules, ["s3-encryption", "s3-versioning"]);
        assert_eq!(findings[0].status, FindingStatus::Fail);
        assert_eq!(findings[0].evidence_version, 1);
        assert_eq!(handler.pending_marks(), 0);
    }

    #[tokio::test]
    async fn publish_failure_is_transient() {
        let sink = Arc::new(MemorySink::failing(5));
        let handler = EvaluationHandler::new(cache(), publisher(sink.clone(), 2));

        let err = handler.handle(&bucket(true)).await.unwrap_err();
        assert!(!err.is_permanent());
        assert!(sink.findings().is_empty());
    }

    #[tokio::test]
    async fn rejected_finding_is_permanent() {
        let sink = Arc::new(MemorySink::rejecting());
        let handler = EvaluationHandler::new(cache(), publisher(sink.clone(), 3));

        let err = handler.handle(&bucket(true)).await.unwrap_err();
        assert!(err.is_permanent());
        assert_eq!(sink.attempts(), 1);
    }

    #[tokio::test]
    async fn replayed_record_skips_findings_already_delivered() {
        let sink = Arc::new(MemorySink::failing_rule("s3-versioning", 1));
        let handler = EvaluationHandler::new(cache(), publisher(sink.clone(), 1));

        assert!(handler.handle(&bucket(false)).await.is_err());
        assert_eq!(sink.findings().len(), 1);
        assert_eq!(handler.pending_marks(), 1);

        // Replay hands the same evidence back under a new version.
        handler.handle(&bucket(false).with_version(7)).await.unwrap();

        let rules: Vec<String> = sink.findings().into_iter().map(|f| f.rule_id).collect();
        assert_eq!(rules, ["s3-encryption", "s3-versioning"]);
        assert_eq!(handler.pending_marks(), 0);
    }

    #[tokio::test]
    async fn untargeted_record_produces_nothing() {
        let sink = Arc::new(MemorySink::new());
        let handler = EvaluationHandler::new(cache(), publisher(sink.clone(), 1));
        let record = EvidenceRecord::new("lg-1", "inventory", "aws.logs.group", Attributes::new());

        handler.handle(&record).await.unwrap();
        assert!(sink.findings().is_empty());
        assert_eq!(sink.attempts(), 0);
    }
}
