//! Per-resource ordering state.
//!
//! One record per resource id, only ever touched under that resource's lock.
//! A single drain task per resource pops pending events in sequence order, so
//! events for one resource are serialized while different resources run in
//! parallel.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::oneshot;
use tokio::time::Instant;

use attest_core::EvidenceEvent;

use super::handle::DispatchOutcome;
use crate::dedup::DedupLedger;

/// Where a resource currently sits in the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourcePhase {
    Idle,
    /// Events are buffered and waiting for their turn.
    Ordering,
    Dispatching,
}

pub(super) struct Pending {
    pub event: EvidenceEvent,
    pub reply: oneshot::Sender<DispatchOutcome>,
}

/// Next event to hand to the evaluation stage.
pub(super) struct Dispatch {
    pub sequence: u64,
    pub version: u64,
    pub pending: Pending,
}

pub(super) enum Admission {
    Accepted {
        sequence: u64,
        outcome: oneshot::Receiver<DispatchOutcome>,
        spawn_drain: bool,
    },
    Duplicate,
    Stale {
        sequence: u64,
        last_dispatched: Option<u64>,
    },
}

pub(super) struct ResourceState {
    /// Highest sequence whose dispatch was acknowledged.
    last_acked: Option<u64>,
    /// Highest sequence handed to the evaluation stage, acked or not.
    highest_dispatched: Option<u64>,
    /// Highest sequence accepted; arrival-order events continue from here.
    highest_seen: Option<u64>,
    next_version: u64,
    pending: BTreeMap<u64, Pending>,
    in_flight: Option<u64>,
    dedup: DedupLedger,
    draining: bool,
}

impl ResourceState {
    pub fn new(window: Duration, max_dedup_entries: usize) -> Self {
        Self {
            last_acked: None,
            highest_dispatched: None,
            highest_seen: None,
            next_version: 1,
            pending: BTreeMap::new(),
            in_flight: None,
            dedup: DedupLedger::new(window, max_dedup_entries),
            draining: false,
        }
    }

    pub fn phase(&self) -> ResourcePhase {
        if self.in_flight.is_some() {
            ResourcePhase::Dispatching
        } else if !self.pending.is_empty() {
            ResourcePhase::Ordering
        } else {
            ResourcePhase::Idle
        }
    }

    pub fn last_acked(&self) -> Option<u64> {
        self.last_acked
    }

    fn sequence_for(&self, hint: Option<u64>) -> u64 {
        hint.unwrap_or_else(|| self.highest_seen.map_or(1, |s| s.saturating_add(1)))
    }

    /// A sequence is stale when it is at or behind the last ack, behind the
    /// newest dispatch, or already queued. A dead-lettered sequence equal to
    /// the newest dispatch stays admissible so it can be replayed.
    fn is_stale(&self, sequence: u64) -> bool {
        self.last_acked.is_some_and(|acked| sequence <= acked)
            || self.highest_dispatched.is_some_and(|d| sequence < d)
            || self.in_flight == Some(sequence)
            || self.pending.contains_key(&sequence)
    }

    pub fn admit(&mut self, event: EvidenceEvent, now: Instant) -> Admission {
        if self.dedup.contains(&event.dedup_key, now) {
            return Admission::Duplicate;
        }

        let sequence = self.sequence_for(event.sequence_hint);
        if self.is_stale(sequence) {
            return Admission::Stale {
                sequence,
                last_dispatched: self.highest_dispatched,
            };
        }

        self.highest_seen = Some(self.highest_seen.map_or(sequence, |s| s.max(sequence)));
        self.dedup.insert(event.dedup_key.clone(), now);

        let (reply, outcome) = oneshot::channel();
        self.pending.insert(sequence, Pending { event, reply });

        let spawn_drain = !self.draining;
        self.draining = true;
        Admission::Accepted {
            sequence,
            outcome,
            spawn_drain,
        }
    }

    /// Pop the lowest pending sequence and assign it the next version.
    /// Returns `None` and ends the drain when nothing is pending.
    pub fn begin_next(&mut self) -> Option<Dispatch> {
        let Some((sequence, pending)) = self.pending.pop_first() else {
            self.draining = false;
            return None;
        };
        let version = self.next_version;
        self.next_version += 1;
        self.in_flight = Some(sequence);
        self.highest_dispatched = Some(self.highest_dispatched.map_or(sequence, |d| d.max(sequence)));
        Some(Dispatch {
            sequence,
            version,
            pending,
        })
    }

    pub fn acked(&mut self, sequence: u64) {
        self.in_flight = None;
        self.last_acked = Some(self.last_acked.map_or(sequence, |a| a.max(sequence)));
    }

    /// The event was dead-lettered: its key is released so a replay or a
    /// redelivery is processed again, and the ack watermark stays put.
    pub fn dead_lettered(&mut self, dedup_key: &str) {
        self.in_flight = None;
        self.dedup.release(dedup_key);
    }
}
