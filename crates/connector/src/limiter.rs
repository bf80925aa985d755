//! Async token-bucket rate limiter, one per source.
//!
//! Waiters queue on a fair mutex, so tokens are handed out in request order.
//! A waiter that times out gives up its place without consuming a token.

use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::config::RateLimitConfig;

#[derive(Debug)]
struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

#[derive(Debug)]
pub struct TokenBucket {
    capacity: f64,
    refill_per_sec: f64,
    state: Mutex<BucketState>,
}

impl TokenBucket {
    /// A full bucket holding `capacity` tokens.
    pub fn new(capacity: u32, refill_per_sec: f64) -> Self {
        let capacity = f64::from(capacity.max(1));
        Self {
            capacity,
            refill_per_sec: refill_per_sec.max(0.0),
            state: Mutex::new(BucketState {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
        }
    }

    pub fn from_config(config: &RateLimitConfig) -> Self {
        Self::new(config.capacity, config.refill_per_sec)
    }

    fn refill(&self, state: &mut BucketState, now: Instant) {
        let elapsed = now.saturating_duration_since(state.last_refill).as_secs_f64();
        state.tokens = (state.tokens + elapsed * self.refill_per_sec).min(self.capacity);
        state.last_refill = now;
    }

    /// Take a token if one is available right now.
    ///
    /// Returns `false` without waiting while another caller is queued in
    /// [`acquire`](Self::acquire), since that caller is owed the next token.
    pub async fn try_acquire(&self) -> bool {
        let Ok(mut state) = self.state.try_lock() else {
            return false;
        };
        self.refill(&mut state, Instant::now());
        if state.tokens >= 1.0 {
            state.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Take a token, suspending until one is refilled.
    ///
    /// With a zero refill rate and an empty bucket this never resolves; pair
    /// it with [`acquire_timeout`](Self::acquire_timeout).
    pub async fn acquire(&self) {
        let mut state = self.state.lock().await;
        loop {
            self.refill(&mut state, Instant::now());
            if state.tokens >= 1.0 {
                state.tokens -= 1.0;
                return;
            }
            if self.refill_per_sec <= 0.0 {
                std::future::pending::<()>().await;
            }
            let deficit = 1.0 - state.tokens;
            // A wait too long for a Duration is as good as never.
            let Ok(wait) = Duration::try_from_secs_f64(deficit / self.refill_per_sec) else {
                std::future::pending::<()>().await;
                continue;
            };
            tokio::time::sleep(wait.max(Duration::from_millis(1))).await;
        }
    }

    /// [`acquire`](Self::acquire) bounded by `timeout`. Returns `false` if the
    /// deadline passed first.
    pub async fn acquire_timeout(&self, timeout: Duration) -> bool {
        tokio::time::timeout(timeout, self.acquire()).await.is_ok()
    }

    /// Whole tokens currently available.
    ///
    /// Waits behind any caller suspended in [`acquire`](Self::acquire), so the
    /// count reflects the bucket after queued waiters are served.
    pub async fn available(&self) -> u32 {
        let mut state = self.state.lock().await;
        self.refill(&mut state, Instant::now());
        state.tokens.floor() as u32
    }
}
