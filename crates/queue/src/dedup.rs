//! Bounded idempotency ledger.
//!
//! Remembers dedup keys for a fixed window. Entries expire after the window
//! and the ledger never holds more than `max_entries` live keys; the oldest
//! key is forgotten first when the cap is hit.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use tokio::time::Instant;

#[derive(Debug)]
pub struct DedupLedger {
    window: Duration,
    max_entries: usize,
    expiries: HashMap<String, Instant>,
    /// Insertion order; may hold superseded entries whose expiry no longer
    /// matches `expiries`, those are skipped on eviction.
    order: VecDeque<(String, Instant)>,
}

impl DedupLedger {
    pub fn new(window: Duration, max_entries: usize) -> Self {
        Self {
            window,
            max_entries: max_entries.max(1),
            expiries: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    /// Whether `key` was recorded within the window ending at `now`.
    pub fn contains(&mut self, key: &str, now: Instant) -> bool {
        self.purge(now);
        self.expiries.contains_key(key)
    }

    /// Record `key`, restarting its window.
    pub fn insert(&mut self, key: impl Into<String>, now: Instant) {
        let key = key.into();
        let expires_at = now + self.window;
        self.expiries.insert(key.clone(), expires_at);
        self.order.push_back((key, expires_at));

        while self.expiries.len() > self.max_entries {
            if !self.evict_oldest() {
                break;
            }
        }
        if self.order.len() > self.max_entries * 2 {
            let live = &self.expiries;
            self.order.retain(|(k, at)| live.get(k) == Some(at));
        }
    }

    /// Forget `key` so the next occurrence is processed again.
    pub fn release(&mut self, key: &str) {
        self.expiries.remove(key);
    }

    pub fn len(&self) -> usize {
        self.expiries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.expiries.is_empty()
    }

    fn purge(&mut self, now: Instant) {
        while let Some((_, expires_at)) = self.order.front() {
            if *expires_at > now {
                break;
            }
            self.evict_oldest();
        }
    }

    /// Pop the front entry, removing it from the map if it is still current.
    fn evict_oldest(&mut self) -> bool {
        match self.order.pop_front() {
            Some((key, expires_at)) => {
                if self.expiries.get(&key) == Some(&expires_at) {
                    self.expiries.remove(&key);
                }
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_expire_after_window() {
        let start = Instant::now();
        let mut ledger = DedupLedger::new(Duration::from_secs(60), 16);
        ledger.insert("k1", start);

        assert!(ledger.contains("k1", start + Duration::from_secs(59)));
        assert!(!ledger.contains("k1", start + Duration::from_secs(60)));
        assert!(ledger.is_empty());
    }

    #[test]
    fn reinsert_restarts_window() {
        let start = Instant::now();
        let mut ledger = DedupLedger::new(Duration::from_secs(10), 16);
        ledger.insert("k1", start);
        ledger.insert("k1", start + Duration::from_secs(8));

        // The first entry's expiry passes but the refreshed one is still live.
        assert!(ledger.contains("k1", start + Duration::from_secs(12)));
        assert!(!ledger.contains("k1", start + Duration::from_secs(18)));
    }

    #[test]
    fn cap_evicts_oldest_first() {
        let now = Instant::now();
        let mut ledger = DedupLedger::new(Duration::from_secs(600), 2);
        ledger.insert("a", now);
        ledger.insert("b", now);
        ledger.insert("c", now);

        assert_eq!(ledger.len(), 2);
        assert!(!ledger.contains("a", now));
        assert!(ledger.contains("b", now));
        assert!(ledger.contains("c", now));
    }

    #[test]
    fn release_forgets_key() {
        let now = Instant::now();
        let mut ledger = DedupLedger::new(Duration::from_secs(600), 8);
        ledger.insert("a", now);
        ledger.release("a");
        assert!(!ledger.contains("a", now));

        // The stale order entry must not evict a later re-insert.
        ledger.insert("a", now + Duration::from_secs(1));
        assert!(ledger.contains("a", now + Duration::from_secs(300)));
    }

    #[test]
    fn order_stays_bounded_under_churn() {
        let now = Instant::now();
        let mut ledger = DedupLedger::new(Duration::from_secs(600), 4);
        for i in 0..100 {
            ledger.insert("same", now + Duration::from_millis(i));
        }
        assert_eq!(ledger.len(), 1);
        assert!(ledger.order.len() <= 8);
    }
}
