//! Dead-letter store for events that exhausted their dispatch budget.

use std::collections::BTreeMap;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use attest_core::EvidenceEvent;

use crate::error::PipelineError;

/// An event parked after failing dispatch, keyed by its dedup key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadLetterEntry {
    /// Entry id; equal to the event's dedup key.
    pub id: String,
    pub event: EvidenceEvent,
    pub failure_reason: String,
    /// Dispatch attempts across every time this event was dead-lettered.
    pub attempt_count: u32,
    pub first_failed_at: DateTime<Utc>,
    pub last_attempt_at: DateTime<Utc>,
    /// Set when the last failure was permanent rather than a spent retry budget.
    #[serde(default)]
    pub permanent: bool,
}

impl DeadLetterEntry {
    pub fn resource_id(&self) -> &str {
        &self.event.resource_id
    }

    pub fn source_id(&self) -> &str {
        &self.event.source_id
    }
}

/// Selects which pending entries to list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeadLetterFilter {
    All,
    Resource(String),
    Source(String),
}

impl DeadLetterFilter {
    pub fn matches(&self, entry: &DeadLetterEntry) -> bool {
        match self {
            DeadLetterFilter::All => true,
            DeadLetterFilter::Resource(id) => entry.resource_id() == id,
            DeadLetterFilter::Source(id) => entry.source_id() == id,
        }
    }
}

/// Storage for dead-lettered events. `put` upserts by entry id.
#[async_trait]
pub trait DeadLetterStore: Send + Sync {
    async fn put(&self, entry: DeadLetterEntry) -> Result<(), PipelineError>;

    async fn get(&self, id: &str) -> Result<Option<DeadLetterEntry>, PipelineError>;

    /// Remove an entry, returning it if it existed.
    async fn remove(&self, id: &str) -> Result<Option<DeadLetterEntry>, PipelineError>;

    /// Entries matching `filter`, oldest failure first.
    async fn list(&self, filter: &DeadLetterFilter) -> Result<Vec<DeadLetterEntry>, PipelineError>;
}

/// Process-local dead-letter store.
#[derive(Default)]
pub struct MemoryDeadLetterStore {
    entries: RwLock<BTreeMap<String, DeadLetterEntry>>,
}

impl MemoryDeadLetterStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().expect("dead-letter lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl DeadLetterStore for MemoryDeadLetterStore {
    async fn put(&self, entry: DeadLetterEntry) -> Result<(), PipelineError> {
        self.entries
            .write()
            .expect("dead-letter lock poisoned")
            .insert(entry.id.clone(), entry);
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<DeadLetterEntry>, PipelineError> {
        Ok(self.entries.read().expect("dead-letter lock poisoned").get(id).cloned())
    }

    async fn remove(&self, id: &str) -> Result<Option<DeadLetterEntry>, PipelineError> {
        Ok(self.entries.write().expect("dead-letter lock poisoned").remove(id))
    }

    async fn list(&self, filter: &DeadLetterFilter) -> Result<Vec<DeadLetterEntry>, PipelineError> {
        let guard = self.entries.read().expect("dead-letter lock poisoned");
        let mut out: Vec<DeadLetterEntry> =
            guard.values().filter(|e| filter.matches(e)).cloned().collect();
        out.sort_by(|a, b| {
            a.first_failed_at
                .cmp(&b.first_failed_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        Ok(out)
    }
}
