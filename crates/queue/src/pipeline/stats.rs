use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Point-in-time pipeline counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PipelineStats {
    pub accepted: u64,
    pub duplicates: u64,
    pub stale: u64,
    pub dispatched: u64,
    pub retried: u64,
    pub dead_lettered: u64,
    pub replayed: u64,
    /// Accepted events not yet acked or dead-lettered.
    pub in_progress: u64,
    pub resources: u64,
}

#[derive(Debug, Default)]
pub(super) struct Counters {
    pub accepted: AtomicU64,
    pub duplicates: AtomicU64,
    pub stale: AtomicU64,
    pub dispatched: AtomicU64,
    pub retried: AtomicU64,
    pub dead_lettered: AtomicU64,
    pub replayed: AtomicU64,
}

impl Counters {
    pub fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self, in_progress: u64, resources: u64) -> PipelineStats {
        PipelineStats {
            accepted: self.accepted.load(Ordering::Relaxed),
            duplicates: self.duplicates.load(Ordering::Relaxed),
            stale: self.stale.load(Ordering::Relaxed),
            dispatched: self.dispatched.load(Ordering::Relaxed),
            retried: self.retried.load(Ordering::Relaxed),
            dead_lettered: self.dead_lettered.load(Ordering::Relaxed),
            replayed: self.replayed.load(Ordering::Relaxed),
            in_progress,
            resources,
        }
    }
}
