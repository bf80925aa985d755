//! Acknowledgment handles returned by ingestion.

use serde::Serialize;
use tokio::sync::oneshot;

/// What the ordering stage did with an ingested event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "disposition", rename_all = "snake_case")]
pub enum Disposition {
    /// Queued for dispatch at this per-resource sequence.
    Accepted { sequence: u64 },
    /// Dedup key seen within the idempotency window; acknowledged as a no-op.
    Duplicate,
    /// Sequence at or behind what the resource already dispatched; dropped.
    Stale { sequence: u64 },
}

/// Terminal state of an accepted event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DispatchOutcome {
    Acked { version: u64 },
    DeadLettered { entry_id: String },
}

/// Returned by `ingest` as soon as the event has entered the ordering stage.
#[derive(Debug)]
pub struct AckHandle {
    disposition: Disposition,
    outcome: Option<oneshot::Receiver<DispatchOutcome>>,
}

impl AckHandle {
    pub(crate) fn accepted(sequence: u64, outcome: oneshot::Receiver<DispatchOutcome>) -> Self {
        Self {
            disposition: Disposition::Accepted { sequence },
            outcome: Some(outcome),
        }
    }

    pub(crate) fn settled(disposition: Disposition) -> Self {
        Self {
            disposition,
            outcome: None,
        }
    }

    pub fn disposition(&self) -> &Disposition {
        &self.disposition
    }

    pub fn is_accepted(&self) -> bool {
        matches!(self.disposition, Disposition::Accepted { .. })
    }

    /// Wait for dispatch to finish. `None` for duplicates and stale events.
    pub async fn outcome(self) -> Option<DispatchOutcome> {
        match self.outcome {
            Some(rx) => rx.await.ok(),
            None => None,
        }
    }
}
