//! Queue consumer trait, message types, and an in-memory backend.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::QueueError;

/// A raw message received from an evidence queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueMessage {
    /// Unique message identifier from the queue provider.
    pub id: String,
    /// Raw message body (JSON string).
    pub body: String,
    /// Provider-specific handle for ack/nack.
    pub receipt_handle: String,
    /// When the message was sent to the queue.
    pub timestamp: DateTime<Utc>,
    /// Number of times this message has been received, including this one.
    pub attempt_count: u32,
}

/// Backend for external evidence producers that publish onto a queue.
///
/// The [`QueueIngestor`](crate::ingestor::QueueIngestor) polls a consumer,
/// feeds parsed events into the pipeline, and acks once the pipeline has
/// accepted (not evaluated) each message.
#[async_trait]
pub trait QueueConsumer: Send + Sync {
    /// Poll up to `max_messages`. Returns an empty vec if none are available.
    async fn poll_batch(&self, max_messages: u32) -> Result<Vec<QueueMessage>, QueueError>;

    /// Acknowledge a message, removing it from the queue.
    async fn ack(&self, receipt_handle: &str) -> Result<(), QueueError>;

    /// Return a message to the queue for redelivery.
    async fn nack(&self, receipt_handle: &str) -> Result<(), QueueError>;
}

#[derive(Default)]
struct MemoryQueueState {
    ready: VecDeque<QueueMessage>,
    in_flight: HashMap<String, QueueMessage>,
}

/// Process-local queue backing the ingestor in tests and embedded setups.
///
/// Polling moves messages in flight under a fresh receipt handle; `nack`
/// puts them back at the tail.
#[derive(Default)]
pub struct MemoryQueue {
    state: Mutex<MemoryQueueState>,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue a raw JSON body, returning the message id.
    pub fn push(&self, body: impl Into<String>) -> String {
        let id = Uuid::new_v4().to_string();
        let msg = QueueMessage {
            id: id.clone(),
            body: body.into(),
            receipt_handle: String::new(),
            timestamp: Utc::now(),
            attempt_count: 0,
        };
        self.lock().ready.push_back(msg);
        id
    }

    /// Messages waiting for delivery.
    pub fn ready_len(&self) -> usize {
        self.lock().ready.len()
    }

    /// Messages delivered but not yet acked or nacked.
    pub fn in_flight_len(&self) -> usize {
        self.lock().in_flight.len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryQueueState> {
        self.state.lock().expect("memory queue lock poisoned")
    }
}

#[async_trait]
impl QueueConsumer for MemoryQueue {
    async fn poll_batch(&self, max_messages: u32) -> Result<Vec<QueueMessage>, QueueError> {
        let mut state = self.lock();
        let take = (max_messages as usize).min(state.ready.len());
        let polled: Vec<QueueMessage> = state.ready.drain(..take).collect();
        let mut batch = Vec::with_capacity(take);
        for mut msg in polled {
            msg.attempt_count += 1;
            msg.receipt_handle = Uuid::new_v4().to_string();
            state.in_flight.insert(msg.receipt_handle.clone(), msg.clone());
            batch.push(msg);
        }
        Ok(batch)
    }

    async fn ack(&self, receipt_handle: &str) -> Result<(), QueueError> {
        self.lock()
            .in_flight
            .remove(receipt_handle)
            .map(|_| ())
            .ok_or_else(|| QueueError::Ack(format!("unknown receipt handle {receipt_handle}")))
    }

    async fn nack(&self, receipt_handle: &str) -> Result<(), QueueError> {
        let mut state = self.lock();
        let msg = state
            .in_flight
            .remove(receipt_handle)
            .ok_or_else(|| QueueError::Ack(format!("unknown receipt handle {receipt_handle}")))?;
        state.ready.push_back(msg);
        Ok(())
    }

}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn poll_moves_messages_in_flight() {
        let queue = MemoryQueue::new();
        queue.push(r#"{"resource_id":"a"}"#);
        queue.push(r#"{"resource_id":"b"}"#);
        queue.push(r#"{"resource_id":"c"}"#);

        let batch = queue.poll_batch(2).await.unwrap();
        assert_eq!(batch.len(), 2);
        assert!(batch.iter().all(|m| m.attempt_count == 1));
        assert_eq!(queue.ready_len(), 1);
        assert_eq!(queue.in_flight_len(), 2);

        queue.ack(&batch[0].receipt_handle).await.unwrap();
        assert_eq!(queue.in_flight_len(), 1);
        assert!(queue.ack(&batch[0].receipt_handle).await.is_err());
    }

    #[tokio::test]
    async fn nack_redelivers_with_higher_receive_count() {
        let queue = MemoryQueue::new();
        let id = queue.push("{}");

        let first = queue.poll_batch(10).await.unwrap();
        queue.nack(&first[0].receipt_handle).await.unwrap();

        let second = queue.poll_batch(10).await.unwrap();
        assert_eq!(second[0].id, id);
        assert_eq!(second[0].attempt_count, 2);
        assert_ne!(second[0].receipt_handle, first[0].receipt_handle);
    }
}
