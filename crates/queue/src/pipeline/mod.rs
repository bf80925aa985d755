//! Evidence event pipeline: per-resource ordering, idempotency, dispatch with
//! bounded retry, and dead-lettering.
//!
//! `ingest` returns as soon as an event is accepted into the ordering stage.
//! Each resource with pending work owns one drain task that hands events to
//! the [`EvidenceHandler`] strictly in sequence order; distinct resources
//! drain concurrently.

mod handle;
mod state;
mod stats;


use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use attest_core::config::PipelineConfig;
use attest_core::{EvidenceEvent, EvidenceRecord, ResourceId, RetryPolicy};

use crate::dlq::{DeadLetterEntry, DeadLetterFilter, DeadLetterStore, MemoryDeadLetterStore};
use crate::error::{DispatchError, PipelineError};

pub use self::handle::{AckHandle, DispatchOutcome, Disposition};
pub use self::state::ResourcePhase;
pub use self::stats::PipelineStats;

use self::state::{Admission, ResourceState};
use self::stats::Counters;

/// The evaluation boundary. Called once per accepted event, in per-resource
/// sequence order, with the record at its newly assigned version.
#[async_trait]
pub trait EvidenceHandler: Send + Sync {
    async fn handle(&self, record: &EvidenceRecord) -> Result<(), DispatchError>;
}

#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub idempotency_window: Duration,
    pub dedup_max_entries_per_resource: usize,
    pub retry: RetryPolicy,
    /// A dispatch call that runs longer fails as transient.
    pub dispatch_timeout: Duration,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self::from(&PipelineConfig::default())
    }
}

impl From<&PipelineConfig> for PipelineOptions {
    fn from(config: &PipelineConfig) -> Self {
        Self {
            idempotency_window: config.idempotency_window(),
            dedup_max_entries_per_resource: config.dedup_max_entries_per_resource,
            retry: config.dispatch_retry(),
            dispatch_timeout: config.dispatch_timeout(),
        }
    }
}

type SharedState = Arc<Mutex<ResourceState>>;

struct Inner {
    handler: Arc<dyn EvidenceHandler>,
    dead_letters: Arc<dyn DeadLetterStore>,
    options: PipelineOptions,
    resources: Mutex<HashMap<ResourceId, SharedState>>,
    counters: Counters,
    /// Accepted events that have not reached a terminal outcome.
    in_progress: AtomicU64,
    idle: Notify,
}

/// Cheaply cloneable handle to a running pipeline.
#[derive(Clone)]
pub struct EvidencePipeline {
    inner: Arc<Inner>,
}

impl EvidencePipeline {
    /// Pipeline backed by an in-memory dead-letter store.
    pub fn new(handler: Arc<dyn EvidenceHandler>, options: PipelineOptions) -> Self {
        Self::with_dead_letter_store(handler, Arc::new(MemoryDeadLetterStore::new()), options)
    }

    pub fn with_dead_letter_store(
        handler: Arc<dyn EvidenceHandler>,
        dead_letters: Arc<dyn DeadLetterStore>,
        options: PipelineOptions,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                handler,
                dead_letters,
                options,
                resources: Mutex::new(HashMap::new()),
                counters: Counters::default(),
                in_progress: AtomicU64::new(0),
                idle: Notify::new(),
            }),
        }
    }

    pub fn options(&self) -> &PipelineOptions {
        &self.inner.options
    }

    /// Accept an event into the ordering stage.
    ///
    /// Must be called from within a tokio runtime; an accepted event on an
    /// idle resource spawns that resource's drain task.
    pub fn ingest(&self, event: EvidenceEvent) -> Result<AckHandle, PipelineError> {
        validate(&event)?;

        let resource_id = event.resource_id.clone();
        let dedup_key = event.dedup_key.clone();
        let state = self.inner.state_for(&resource_id);

        let admission = {
            let mut guard = state.lock().expect("resource state lock poisoned");
            let admission = guard.admit(event, Instant::now());
            if matches!(admission, Admission::Accepted { .. }) {
                self.inner.in_progress.fetch_add(1, Ordering::SeqCst);
            }
            admission
        };

        match admission {
            Admission::Accepted {
                sequence,
                outcome,
                spawn_drain,
            } => {
                Counters::bump(&self.inner.counters.accepted);
                debug!(resource_id = %resource_id, sequence, "evidence event accepted");
                if spawn_drain {
                    tokio::spawn(drain(Arc::clone(&self.inner), resource_id, state));
                }
                Ok(AckHandle::accepted(sequence, outcome))
            }
            Admission::Duplicate => {
                Counters::bump(&self.inner.counters.duplicates);
                debug!(resource_id = %resource_id, dedup_key = %dedup_key, "duplicate evidence event acknowledged");
                Ok(AckHandle::settled(Disposition::Duplicate))
            }
            Admission::Stale {
                sequence,
                last_dispatched,
            } => {
                Counters::bump(&self.inner.counters.stale);
                debug!(
                    resource_id = %resource_id,
                    sequence,
                    last_dispatched = ?last_dispatched,
                    "stale evidence event dropped"
                );
                Ok(AckHandle::settled(Disposition::Stale { sequence }))
            }
        }
    }

    /// Pending dead-letter entries matching `filter`.
    pub async fn dead_letters(
        &self,
        filter: &DeadLetterFilter,
    ) -> Result<Vec<DeadLetterEntry>, PipelineError> {
        self.inner.dead_letters.list(filter).await
    }

    /// Re-ingest a dead-lettered event. The entry is removed once the replayed
    /// event is acknowledged; a replay that is dropped as stale leaves it in place.
    pub async fn replay(&self, entry_id: &str) -> Result<AckHandle, PipelineError> {
        let entry = self
            .inner
            .dead_letters
            .get(entry_id)
            .await?
            .ok_or_else(|| PipelineError::UnknownEntry(entry_id.to_string()))?;

        let resource_id = entry.event.resource_id.clone();
        let handle = self.ingest(entry.event)?;
        Counters::bump(&self.inner.counters.replayed);
        info!(
            entry_id,
            resource_id = %resource_id,
            disposition = ?handle.disposition(),
            "dead-letter entry replayed"
        );
        Ok(handle)
    }

    /// Replay every pending entry for a resource, lowest sequence hint first.
    pub async fn replay_resource(&self, resource_id: &str) -> Result<Vec<AckHandle>, PipelineError> {
        let mut entries = self
            .dead_letters(&DeadLetterFilter::Resource(resource_id.to_string()))
            .await?;
        entries.sort_by_key(|e| e.event.sequence_hint);

        let mut handles = Vec::with_capacity(entries.len());
        for entry in entries {
            handles.push(self.replay(&entry.id).await?);
        }
        Ok(handles)
    }

    pub fn stats(&self) -> PipelineStats {
        let resources = self.inner.resources.lock().expect("resource map lock poisoned").len();
        self.inner
            .counters
            .snapshot(self.inner.in_progress.load(Ordering::SeqCst), resources as u64)
    }

    pub fn phase(&self, resource_id: &str) -> ResourcePhase {
        self.inner
            .existing_state(resource_id)
            .map_or(ResourcePhase::Idle, |s| s.lock().expect("resource state lock poisoned").phase())
    }

    /// Highest acknowledged sequence for a resource.
    pub fn last_acked(&self, resource_id: &str) -> Option<u64> {
        self.inner
            .existing_state(resource_id)
            .and_then(|s| s.lock().expect("resource state lock poisoned").last_acked())
    }

    /// Resolve once every accepted event has been acked or dead-lettered.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.inner.idle.notified();
            if self.inner.in_progress.load(Ordering::SeqCst) == 0 {
                return;
            }
            notified.await;
        }
    }
}

fn validate(event: &EvidenceEvent) -> Result<(), PipelineError> {
    if event.resource_id.trim().is_empty() {
        return Err(PipelineError::InvalidEvent("resource_id is empty".into()));
    }
    if event.source_id.trim().is_empty() {
        return Err(PipelineError::InvalidEvent(format!(
            "source_id is empty for resource {}",
            event.resource_id
        )));
    }
    if event.dedup_key.is_empty() {
        return Err(PipelineError::InvalidEvent(format!(
            "dedup_key is empty for resource {}",
            event.resource_id
        )));
    }
    Ok(())
}

impl Inner {
    fn state_for(&self, resource_id: &str) -> SharedState {
        let mut resources = self.resources.lock().expect("resource map lock poisoned");
        Arc::clone(resources.entry(resource_id.to_string()).or_insert_with(|| {
            Arc::new(Mutex::new(ResourceState::new(
                self.options.idempotency_window,
                self.options.dedup_max_entries_per_resource,
            )))
        }))
    }

    fn existing_state(&self, resource_id: &str) -> Option<SharedState> {
        self.resources
            .lock()
            .expect("resource map lock poisoned")
            .get(resource_id)
            .cloned()
    }

    /// Call the handler until it succeeds, fails permanently, or the retry
    /// budget is spent. Returns the number of attempts made.
    async fn dispatch(&self, record: &EvidenceRecord) -> (u32, Result<(), DispatchError>) {
        let retry = &self.options.retry;
        let mut attempts = 0;
        loop {
            attempts += 1;
            let result = match tokio::time::timeout(
                self.options.dispatch_timeout,
                self.handler.handle(record),
            )
            .await
            {
                Ok(result) => result,
                Err(_) => Err(DispatchError::Transient(format!(
                    "dispatch timed out after {}ms",
                    self.options.dispatch_timeout.as_millis()
                ))),
            };

            match result {
                Ok(()) => return (attempts, Ok(())),
                Err(err) if !err.is_permanent() && retry.should_retry(attempts) => {
                    let delay = retry.delay_for_retry(attempts);
                    warn!(
                        resource_id = %record.resource_id,
                        version = record.version,
                        attempt = attempts,
                        max_attempts = retry.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "dispatch failed, retrying"
                    );
                    Counters::bump(&self.counters.retried);
                    tokio::time::sleep(delay).await;
                }
                Err(err) => return (attempts, Err(err)),
            }
        }
    }

    /// Park a failed event. Re-dead-lettering the same key keeps the first
    /// failure time and accumulates attempts.
    async fn dead_letter(&self, event: EvidenceEvent, err: DispatchError, attempts: u32) -> String {
        let id = event.dedup_key.clone();
        let now = Utc::now();
        let previous = match self.dead_letters.get(&id).await {
            Ok(previous) => previous,
            Err(e) => {
                warn!(entry_id = %id, error = %e, "failed to read existing dead-letter entry");
                None
            }
        };

        error!(
            resource_id = %event.resource_id,
            source_id = %event.source_id,
            entry_id = %id,
            attempts,
            permanent = err.is_permanent(),
            reason = %err.reason(),
            "evidence event dead-lettered"
        );

        let entry = DeadLetterEntry {
            id: id.clone(),
            failure_reason: err.reason().to_string(),
            attempt_count: previous.as_ref().map_or(0, |p| p.attempt_count) + attempts,
            first_failed_at: previous.map_or(now, |p| p.first_failed_at),
            last_attempt_at: now,
            permanent: err.is_permanent(),
            event,
        };
        if let Err(e) = self.dead_letters.put(entry).await {
            error!(entry_id = %id, error = %e, "failed to persist dead-letter entry");
        }
        Counters::bump(&self.counters.dead_lettered);
        id
    }

    async fn resolve_dead_letter(&self, dedup_key: &str) {
        match self.dead_letters.remove(dedup_key).await {
            Ok(Some(entry)) => info!(
                entry_id = %entry.id,
                resource_id = %entry.event.resource_id,
                "dead-letter entry resolved"
            ),
            Ok(None) => {}
            Err(e) => warn!(entry_id = %dedup_key, error = %e, "failed to clear dead-letter entry"),
        }
    }

    fn finish_one(&self) {
        if self.in_progress.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.idle.notify_waiters();
        }
    }
}

/// Single writer for one resource: dispatches pending events in sequence
/// order until none remain.
async fn drain(inner: Arc<Inner>, resource_id: ResourceId, state: SharedState) {
    debug!(resource_id = %resource_id, "resource drain started");
    loop {
        let next = state.lock().expect("resource state lock poisoned").begin_next();
        let Some(dispatch) = next else {
            break;
        };

        let event = dispatch.pending.event;
        let record = event.to_record(dispatch.version);
        let (attempts, result) = inner.dispatch(&record).await;

        let outcome = match result {
            Ok(()) => {
                state
                    .lock()
                    .expect("resource state lock poisoned")
                    .acked(dispatch.sequence);
                Counters::bump(&inner.counters.dispatched);
                debug!(
                    resource_id = %resource_id,
                    sequence = dispatch.sequence,
                    version = dispatch.version,
                    attempts,
                    "evidence event acked"
                );
                inner.resolve_dead_letter(&event.dedup_key).await;
                DispatchOutcome::Acked {
                    version: dispatch.version,
                }
            }
            Err(err) => {
                state
                    .lock()
                    .expect("resource state lock poisoned")
                    .dead_lettered(&event.dedup_key);
                let entry_id = inner.dead_letter(event, err, attempts).await;
                DispatchOutcome::DeadLettered { entry_id }
            }
        };

        // The caller may have dropped its handle.
        let _ = dispatch.pending.reply.send(outcome);
        inner.finish_one();
    }
    debug!(resource_id = %resource_id, "resource drain finished");
}
