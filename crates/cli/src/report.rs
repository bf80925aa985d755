//! End-of-run report.

use serde::Serialize;

use attest_connector::{CollectionStatus, CollectionSummary};
use attest_queue::{DeadLetterEntry, PipelineStats};

#[derive(Debug, Serialize)]
pub struct RunReport {
    pub sources: Vec<CollectionSummary>,
    pub ingest_rejected: usize,
    pub pipeline: PipelineStats,
    pub dead_letters: Vec<DeadLetterSummary>,
}

#[derive(Debug, Serialize)]
pub struct DeadLetterSummary {
    pub id: String,
    pub resource_id: String,
    pub source_id: String,
    pub attempts: u32,
    pub permanent: bool,
    pub reason: String,
}

impl From<&DeadLetterEntry> for DeadLetterSummary {
    fn from(entry: &DeadLetterEntry) -> Self {
        Self {
            id: entry.id.clone(),
            resource_id: entry.resource_id().to_string(),
            source_id: entry.source_id().to_string(),
            attempts: entry.attempt_count,
            permanent: entry.permanent,
            reason: entry.failure_reason.clone(),
        }
    }
}

impl RunReport {
    /// Sources that did not complete, plus dead-lettered events.
    pub fn problems(&self) -> usize {
        self.sources
            .iter()
            .filter(|s| s.status != CollectionStatus::Completed)
            .count()
            + self.dead_letters.len()
    }

    pub fn render_text(&self) -> String {
        let mut out = String::new();
        out.push_str("Sources:\n");
        for s in &self.sources {
            let status = match s.status {
                CollectionStatus::Completed => "completed",
                CollectionStatus::Failed => "FAILED",
                CollectionStatus::Cancelled => "cancelled",
            };
            out.push_str(&format!("  {:<28} {:>6} records  {status}", s.source_id, s.records));
            if let Some(failure) = &s.failure {
                out.push_str(&format!("  ({failure})"));
            }
            out.push('\n');
        }

        let p = &self.pipeline;
        out.push_str(&format!(
            "Pipeline: {} accepted, {} duplicate, {} stale, {} dispatched, {} retried, {} dead-lettered",
            p.accepted, p.duplicates, p.stale, p.dispatched, p.retried, p.dead_lettered
        ));
        if self.ingest_rejected > 0 {
            out.push_str(&format!(", {} rejected at ingest", self.ingest_rejected));
        }
        out.push('\n');

        if !self.dead_letters.is_empty() {
            out.push_str("Dead letters:\n");
            for d in &self.dead_letters {
                out.push_str(&format!(
                    "  {}  {} (source {}) after {} attempt(s): {}\n",
                    d.id, d.resource_id, d.source_id, d.attempts, d.reason
                ));
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_report_flags_failures() {
        let report = RunReport {
            sources: vec![
                CollectionSummary {
                    source_id: "aws-prod-inventory".into(),
                    records: 4,
                    status: CollectionStatus::Completed,
                    failure: None,
                },
                CollectionSummary {
                    source_id: "iam-api".into(),
                    records: 0,
                    status: CollectionStatus::Failed,
                    failure: Some("rate limit exceeded".into()),
                },
            ],
            ingest_rejected: 0,
            pipeline: PipelineStats::default(),
            dead_letters: Vec::new(),
        };

        let text = report.render_text();
        assert!(text.contains("FAILED  (rate limit exceeded)"));
        assert!(!text.contains("Dead letters"));
        assert_eq!(report.problems(), 1);
    }
}
