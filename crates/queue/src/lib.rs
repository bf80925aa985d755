//! Evidence event pipeline and external queue ingestion.

pub mod consumer;
pub mod dedup;
pub mod dlq;
pub mod error;
pub mod ingestor;
pub mod parser;
pub mod pipeline;

pub use consumer::{MemoryQueue, QueueConsumer, QueueMessage};
pub use dedup::DedupLedger;
pub use dlq::{DeadLetterEntry, DeadLetterFilter, DeadLetterStore, MemoryDeadLetterStore};
pub use error::{DispatchError, PipelineError, QueueError};
pub use ingestor::{IngestReport, IngestorOptions, QueueIngestor};
pub use parser::{parse_batch, parse_message};
pub use pipeline::{
    AckHandle, DispatchOutcome, Disposition, EvidenceHandler, EvidencePipeline, PipelineOptions,
    PipelineStats, ResourcePhase,
};
