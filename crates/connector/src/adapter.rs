//! Adapter capability trait and the lazy, rate-limited collection stream.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use tokio::time::Instant;
use tracing::{debug, warn};

use attest_core::EvidenceRecord;

use crate::config::SourceConfig;
use crate::error::{AdapterError, CollectError};
use crate::limiter::TokenBucket;
use crate::sources;

/// One page of records and the cursor for the next, if any.
#[derive(Debug, Clone, Default)]
pub struct Page {
    pub records: Vec<EvidenceRecord>,
    pub next_cursor: Option<String>,
}

impl Page {
    pub fn last(records: Vec<EvidenceRecord>) -> Self {
        Self {
            records,
            next_cursor: None,
        }
    }
}

/// A source of evidence records, fetched page by page.
///
/// `cursor` is `None` for the first page and otherwise whatever the previous
/// page returned as `next_cursor`.
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    fn kind(&self) -> &'static str;

    async fn fetch_page(&self, cursor: Option<String>) -> Result<Page, AdapterError>;
}

/// Cooperative cancellation shared between a caller and running collections.
/// Checked between records, never mid-record.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// A configured source: its adapter plus its own rate limiter.
#[derive(Clone)]
pub struct EvidenceSource {
    config: Arc<SourceConfig>,
    adapter: Arc<dyn SourceAdapter>,
    limiter: Arc<TokenBucket>,
}

impl EvidenceSource {
    pub fn new(config: SourceConfig, adapter: Arc<dyn SourceAdapter>) -> Self {
        let limiter = Arc::new(TokenBucket::from_config(&config.rate_limit));
        Self {
            config: Arc::new(config),
            adapter,
            limiter,
        }
    }

    /// Build the adapter selected by `config.kind`.
    pub fn from_config(config: SourceConfig) -> Result<Self, CollectError> {
        config.validate()?;
        let adapter = sources::build_adapter(&config)?;
        Ok(Self::new(config, adapter))
    }

    pub fn id(&self) -> &str {
        &self.config.id
    }

    pub fn config(&self) -> &SourceConfig {
        &self.config
    }

    pub fn limiter(&self) -> &TokenBucket {
        &self.limiter
    }

    /// Start a collection run.
    ///
    /// The stream is lazy: each page costs one token and is fetched only when
    /// the buffered records run out. It ends after the last page, or after a
    /// single terminal `Err` item when the source fails, the limiter times
    /// out, or `cancel` is set. Records yielded before a failure stand.
    pub fn collect(&self, cancel: CancelFlag) -> BoxStream<'static, Result<EvidenceRecord, CollectError>> {
        let run = CollectionRun {
            source: self.clone(),
            cancel,
            buffer: VecDeque::new(),
            cursor: RunCursor::Start,
            finished: false,
        };

        stream::unfold(run, |mut run| async move {
            let item = run.next().await?;
            Some((item, run))
        })
        .boxed()
    }
}

enum RunCursor {
    Start,
    Next(String),
    /// Last page fetched.
    Done,
}

struct CollectionRun {
    source: EvidenceSource,
    cancel: CancelFlag,
    buffer: VecDeque<EvidenceRecord>,
    cursor: RunCursor,
    /// Set once the terminal error item has been yielded.
    finished: bool,
}

impl CollectionRun {
    fn finish(&mut self, error: CollectError) -> Option<Result<EvidenceRecord, CollectError>> {
        self.finished = true;
        self.buffer.clear();
        Some(Err(error))
    }

    async fn next(&mut self) -> Option<Result<EvidenceRecord, CollectError>> {
        loop {
            if self.finished {
                return None;
            }
            if self.cancel.is_cancelled() {
                debug!(source_id = %self.source.id(), "collection cancelled");
                return self.finish(CollectError::Cancelled {
                    source_id: self.source.id().to_string(),
                });
            }

            if let Some(record) = self.buffer.pop_front() {
                return Some(Ok(record));
            }

            let cursor = match std::mem::replace(&mut self.cursor, RunCursor::Done) {
                RunCursor::Done => return None,
                RunCursor::Start => None,
                RunCursor::Next(cursor) => Some(cursor),
            };

            if let Err(error) = self.take_token().await {
                return self.finish(error);
            }

            match self.source.adapter.fetch_page(cursor).await {
                Ok(page) => {
                    debug!(
                        source_id = %self.source.id(),
                        records = page.records.len(),
                        more = page.next_cursor.is_some(),
                        "fetched evidence page"
                    );
                    self.buffer.extend(page.records);
                    if let Some(next) = page.next_cursor {
                        self.cursor = RunCursor::Next(next);
                    }
                }
                Err(error) => {
                    warn!(source_id = %self.source.id(), error = %error, "evidence page fetch failed");
                    return self.finish(CollectError::Source {
                        source_id: self.source.id().to_string(),
                        error,
                    });
                }
            }
        }
    }

    async fn take_token(&self) -> Result<(), CollectError> {
        let limiter = &self.source.limiter;
        match self.source.config.acquire_timeout() {
            None => {
                limiter.acquire().await;
                Ok(())
            }
            Some(timeout) => {
                let started = Instant::now();
                if limiter.acquire_timeout(timeout).await {
                    Ok(())
                } else {
                    Err(CollectError::RateLimitExceeded {
                        source_id: self.source.id().to_string(),
                        waited: started.elapsed(),
                    })
                }
            }
        }
    }
}
