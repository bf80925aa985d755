//! Evidence Adapter Layer: rate-limited, cancellable collection from
//! configured evidence sources.

pub mod adapter;
pub mod collector;
pub mod config;
pub mod error;
pub mod limiter;
pub mod sources;

pub use adapter::{CancelFlag, EvidenceSource, Page, SourceAdapter};
pub use collector::{CollectionStatus, CollectionSummary, Collector};
pub use config::{load_sources, parse_sources, RateLimitConfig, RawRecord, SourceConfig, SourceKind};
pub use error::{AdapterError, CollectError};
pub use limiter::TokenBucket;
