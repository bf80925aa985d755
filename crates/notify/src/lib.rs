//! Finding delivery.
//!
//! This crate provides:
//! - `FindingSink` trait for pluggable finding destinations
//! - Webhook, stdout, and in-memory sinks
//! - `FindingPublisher`, which fans findings out with retry and backoff

pub mod memory;
pub mod publisher;
pub mod stdout;
pub mod traits;
pub mod webhook;

pub use memory::MemorySink;
pub use publisher::FindingPublisher;
pub use stdout::StdoutSink;
pub use traits::{FindingSink, PublishError, PublishResult, SinkError};
pub use webhook::WebhookSink;
