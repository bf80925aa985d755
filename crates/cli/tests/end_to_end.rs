//! Evidence flowing from sources through the pipeline into a finding sink.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use attest_cli::EvaluationHandler;
use attest_connector::{CollectionStatus, Collector, SourceConfig, SourceKind};
use attest_core::{flatten_json, EvidenceEvent, EvidenceRecord, FindingStatus, RetryPolicy};
use attest_notify::{FindingPublisher, FindingSink, MemorySink};
use attest_queue::{DeadLetterFilter, DispatchOutcome, Disposition, EvidencePipeline, PipelineOptions};
use attest_rules::{AttributeCatalog, RuleCache, RuleDefinition, RuleLoader};
use serde_json::json;

fn workspace_root() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../..")
}

fn catalog() -> AttributeCatalog {
    AttributeCatalog::load(&workspace_root().join("data/catalog.yml")).unwrap()
}

fn cache_with(rule_file: &str) -> Arc<RuleCache> {
    let cache = Arc::new(RuleCache::new(catalog()));
    let yaml = std::fs::read_to_string(workspace_root().join("data/rules/examples").join(rule_file)).unwrap();
    cache.install(&RuleDefinition::from_yaml(&yaml).unwrap()).unwrap();
    cache
}

fn fast_retry(attempts: u32) -> RetryPolicy {
    RetryPolicy::new(attempts, Duration::from_millis(1), Duration::from_millis(5))
}

fn pipeline_for(cache: Arc<RuleCache>, sink: Arc<MemorySink>, dispatch_attempts: u32) -> EvidencePipeline {
    let sinks: Vec<Arc<dyn FindingSink>> = vec![sink];
    // One publish attempt per dispatch, so each sink failure is one dispatch failure.
    let publisher = Arc::new(FindingPublisher::new(sinks, fast_retry(1)));
    let handler = Arc::new(EvaluationHandler::new(cache, publisher));
    EvidencePipeline::new(
        handler,
        PipelineOptions {
            retry: fast_retry(dispatch_attempts),
            ..PipelineOptions::default()
        },
    )
}

fn unencrypted_bucket() -> EvidenceEvent {
    let record = EvidenceRecord::new(
        "arn:aws:s3:::marketing-assets",
        "aws-prod-inventory",
        "aws.s3.bucket",
        flatten_json(&json!({"encryption": {"enabled": false}})),
    );
    EvidenceEvent::from_record(record, Some(1))
}

#[tokio::test]
async fn failing_sink_dead_letters_then_replay_publishes_once() {
    let sink = Arc::new(MemorySink::failing(3));
    let pipeline = pipeline_for(cache_with("s3-bucket-encryption.yml"), sink.clone(), 3);

    let handle = pipeline.ingest(unencrypted_bucket()).unwrap();
    assert_eq!(handle.disposition(), &Disposition::Accepted { sequence: 1 });
    let entry_id = match handle.outcome().await {
        Some(DispatchOutcome::DeadLettered { entry_id }) => entry_id,
        other => panic!("expected dead letter, got {other:?}"),
    };

    let dead = pipeline.dead_letters(&DeadLetterFilter::All).await.unwrap();
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].attempt_count, 3);
    assert!(!dead[0].permanent);
    assert!(sink.findings().is_empty());

    let replayed = pipeline.replay(&entry_id).await.unwrap();
    assert!(matches!(replayed.outcome().await, Some(DispatchOutcome::Acked { .. })));

    let findings = sink.findings();
    assert_eq!(findings.len(), 1);
    assert_eq!(findings[0].rule_id, "s3-bucket-encryption");
    assert_eq!(findings[0].status, FindingStatus::Fail);
    assert!(pipeline.dead_letters(&DeadLetterFilter::All).await.unwrap().is_empty());
    assert!(pipeline.replay(&entry_id).await.is_err());
}

#[tokio::test]
async fn rejecting_sink_dead_letters_without_retrying() {
    let sink = Arc::new(MemorySink::rejecting());
    let pipeline = pipeline_for(cache_with("s3-bucket-encryption.yml"), sink.clone(), 3);

    let handle = pipeline.ingest(unencrypted_bucket()).unwrap();
    assert!(matches!(handle.outcome().await, Some(DispatchOutcome::DeadLettered { .. })));

    let dead = pipeline.dead_letters(&DeadLetterFilter::All).await.unwrap();
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].attempt_count, 1);
    assert!(dead[0].permanent);
    assert!(dead[0].failure_reason.contains("rejected"), "{}", dead[0].failure_reason);
    assert_eq!(sink.attempts(), 1);
}

#[tokio::test]
async fn redelivered_evidence_is_evaluated_once() {
    let sink = Arc::new(MemorySink::new());
    let pipeline = pipeline_for(cache_with("s3-bucket-encryption.yml"), sink.clone(), 3);

    let first = pipeline.ingest(unencrypted_bucket()).unwrap();
    let again = pipeline.ingest(unencrypted_bucket()).unwrap();
    assert_eq!(again.disposition(), &Disposition::Duplicate);

    first.outcome().await;
    pipeline.wait_idle().await;
    assert_eq!(sink.findings().len(), 1);
}

#[tokio::test]
async fn collected_sources_produce_findings_for_every_targeted_rule() {
    let cache = Arc::new(RuleCache::new(catalog()));
    let loader = RuleLoader::new(workspace_root().join("data/rules"), Arc::clone(&cache));
    assert!(loader.load_all().unwrap().iter().all(|r| r.is_loaded()));

    let sink = Arc::new(MemorySink::new());
    let pipeline = pipeline_for(cache, sink.clone(), 3);

    let mut inventory = SourceConfig::new("aws-prod-inventory", SourceKind::File, "aws.s3.bucket");
    inventory.path = Some(workspace_root().join("data/evidence/s3-buckets.jsonl"));
    let mut baseline = SourceConfig::new("baseline", SourceKind::Static, "aws.logs.group");
    baseline.records = vec![serde_json::from_value(json!({
        "resource_id": "lg-audit",
        "attributes": {"logging": {"enabled": true}, "retention_days": 30}
    }))
    .unwrap()];

    let collector = Collector::from_configs(vec![inventory, baseline], 2).unwrap();
    let summaries = collector
        .collect_all(|record| {
            pipeline.ingest(EvidenceEvent::from_record(record, None)).unwrap();
        })
        .await;
    pipeline.wait_idle().await;

    assert!(summaries.iter().all(|s| s.status == CollectionStatus::Completed));
    assert_eq!(summaries[0].records, 3);

    // Two S3 rules for each of three buckets, one log rule for the log group.
    let findings = sink.findings();
    assert_eq!(findings.len(), 7);
    let count = |status| findings.iter().filter(|f| f.status == status).count();
    assert_eq!(count(FindingStatus::Pass), 3);
    assert_eq!(count(FindingStatus::Fail), 3);
    assert_eq!(count(FindingStatus::Indeterminate), 1);

    let stats = pipeline.stats();
    assert_eq!(stats.accepted, 4);
    assert_eq!(stats.dead_lettered, 0);
}
