//! In-memory sink, mostly for tests and dry runs.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use attest_core::Finding;

use crate::traits::{FindingSink, SinkError};

#[derive(Debug, Default)]
pub struct MemorySink {
    findings: Mutex<Vec<Finding>>,
    /// Remaining publishes to fail with a retryable error.
    fail_next: AtomicU32,
    /// Only findings of this rule count against `fail_next`.
    fail_rule: Option<String>,
    reject: bool,
    attempts: AtomicU32,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `count` publishes with a retryable error, then accept.
    pub fn failing(count: u32) -> Self {
        Self {
            fail_next: AtomicU32::new(count),
            ..Self::default()
        }
    }

    /// Fail the next `count` publishes of `rule_id` findings with a retryable
    /// error. Other rules are accepted.
    pub fn failing_rule(rule_id: impl Into<String>, count: u32) -> Self {
        Self {
            fail_next: AtomicU32::new(count),
            fail_rule: Some(rule_id.into()),
            ..Self::default()
        }
    }

    /// Reject every finding.
    pub fn rejecting() -> Self {
        Self {
            reject: true,
            ..Self::default()
        }
    }

    pub fn findings(&self) -> Vec<Finding> {
        self.findings.lock().expect("memory sink lock poisoned").clone()
    }

    /// Publish calls seen so far, successful or not.
    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl FindingSink for MemorySink {
    async fn publish(&self, finding: &Finding) -> Result<(), SinkError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.reject {
            return Err(SinkError::Rejected(format!("{} rejected", finding.rule_id)));
        }
        let targeted = self.fail_rule.as_deref().map_or(true, |rule| rule == finding.rule_id);
        let failing = targeted
            && self
                .fail_next
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
        if failing {
            return Err(SinkError::Retryable("memory sink unavailable".into()));
        }
        self.findings
            .lock()
            .expect("memory sink lock poisoned")
            .push(finding.clone());
        Ok(())
    }

    fn sink_name(&self) -> &str {
        "memory"
    }
}
