//! Pump from an external evidence queue into the pipeline.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::Notify;
use tracing::{error, info, warn};

use crate::consumer::{QueueConsumer, QueueMessage};
use crate::error::QueueError;
use crate::parser::parse_message;
use crate::pipeline::{Disposition, EvidencePipeline};

#[derive(Debug, Clone)]
pub struct IngestorOptions {
    pub batch_size: u32,
    /// Unprocessable messages are dropped once received this many times.
    pub max_receive_count: u32,
    /// Pause between polls when the queue is empty or erroring.
    pub idle_backoff: Duration,
}

impl Default for IngestorOptions {
    fn default() -> Self {
        Self {
            batch_size: 10,
            max_receive_count: 5,
            idle_backoff: Duration::from_secs(1),
        }
    }
}

/// Per-poll tallies.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IngestReport {
    pub received: usize,
    pub accepted: usize,
    pub duplicates: usize,
    pub stale: usize,
    /// Unprocessable messages returned to the queue.
    pub rejected: usize,
    /// Unprocessable messages acked away after the receive bound.
    pub dropped: usize,
}

impl IngestReport {
    pub fn merge(&mut self, other: &IngestReport) {
        self.received += other.received;
        self.accepted += other.accepted;
        self.duplicates += other.duplicates;
        self.stale += other.stale;
        self.rejected += other.rejected;
        self.dropped += other.dropped;
    }
}

/// Polls a [`QueueConsumer`] and feeds every message into the pipeline.
///
/// A message is acked once the pipeline has accepted, deduplicated, or
/// dropped it as stale. Messages that cannot be parsed or validated are
/// nacked for redelivery until `max_receive_count`, then acked and logged.
pub struct QueueIngestor {
    consumer: Arc<dyn QueueConsumer>,
    pipeline: EvidencePipeline,
    options: IngestorOptions,
    shutdown: Arc<Notify>,
}

impl QueueIngestor {
    pub fn new(consumer: Arc<dyn QueueConsumer>, pipeline: EvidencePipeline) -> Self {
        Self {
            consumer,
            pipeline,
            options: IngestorOptions::default(),
            shutdown: Arc::new(Notify::new()),
        }
    }

    pub fn with_options(mut self, options: IngestorOptions) -> Self {
        self.options = options;
        self
    }

    /// Ask a running [`run`](Self::run) loop to exit after its current poll.
    pub fn stop(&self) {
        self.shutdown.notify_one();
    }

    /// Poll one batch and process it.
    pub async fn run_once(&self) -> Result<IngestReport, QueueError> {
        let messages = self.consumer.poll_batch(self.options.batch_size).await?;
        let mut report = IngestReport {
            received: messages.len(),
            ..IngestReport::default()
        };

        for msg in &messages {
            let admitted = parse_message(msg)
                .map_err(|e| e.to_string())
                .and_then(|event| self.pipeline.ingest(event).map_err(|e| e.to_string()));

            match admitted {
                Ok(handle) => {
                    match handle.disposition() {
                        Disposition::Accepted { .. } => report.accepted += 1,
                        Disposition::Duplicate => report.duplicates += 1,
                        Disposition::Stale { .. } => report.stale += 1,
                    }
                    self.ack(msg).await;
                }
                Err(reason) if msg.attempt_count >= self.options.max_receive_count => {
                    error!(
                        message_id = %msg.id,
                        receives = msg.attempt_count,
                        reason = %reason,
                        "dropping unprocessable queue message"
                    );
                    self.ack(msg).await;
                    report.dropped += 1;
                }
                Err(reason) => {
                    warn!(
                        message_id = %msg.id,
                        receives = msg.attempt_count,
                        reason = %reason,
                        "queue message rejected, returning for redelivery"
                    );
                    if let Err(e) = self.consumer.nack(&msg.receipt_handle).await {
                        warn!(message_id = %msg.id, error = %e, "failed to nack queue message");
                    }
                    report.rejected += 1;
                }
            }
        }

        Ok(report)
    }

    /// Poll until [`stop`](Self::stop) is called, returning the totals.
    pub async fn run(&self) -> IngestReport {
        let mut totals = IngestReport::default();
        info!(batch_size = self.options.batch_size, "queue ingestor started");

        loop {
            tokio::select! {
                biased;
                _ = self.shutdown.notified() => {
                    info!("queue ingestor shutting down");
                    break;
                }
                result = self.run_once() => match result {
                    Ok(report) => {
                        totals.merge(&report);
                        if report.received == 0 {
                            tokio::time::sleep(self.options.idle_backoff).await;
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, "queue poll failed");
                        tokio::time::sleep(self.options.idle_backoff).await;
                    }
                }
            }
        }

        totals
    }

    async fn ack(&self, msg: &QueueMessage) {
        if let Err(e) = self.consumer.ack(&msg.receipt_handle).await {
            warn!(message_id = %msg.id, error = %e, "failed to ack queue message");
        }
    }
}
