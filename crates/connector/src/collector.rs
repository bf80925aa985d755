//! Bounded-parallel collection across many sources.

use std::collections::HashMap;

use futures::stream::{self, BoxStream, StreamExt};
use serde::Serialize;
use tracing::{info, warn};

use attest_core::EvidenceRecord;

use crate::adapter::{CancelFlag, EvidenceSource};
use crate::config::SourceConfig;
use crate::error::CollectError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CollectionStatus {
    Completed,
    Failed,
    Cancelled,
}

/// Outcome of one source's collection run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CollectionSummary {
    pub source_id: String,
    pub records: usize,
    pub status: CollectionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
}

impl CollectionSummary {
    fn started(source_id: &str) -> Self {
        Self {
            source_id: source_id.to_string(),
            records: 0,
            status: CollectionStatus::Completed,
            failure: None,
        }
    }
}

/// Collects from every source concurrently, at most `max_concurrency` at a
/// time. Each source keeps its own rate limiter; a throttled source only
/// occupies its own slot.
pub struct Collector {
    sources: Vec<EvidenceSource>,
    max_concurrency: usize,
    cancel: CancelFlag,
}

impl Collector {
    pub fn new(sources: Vec<EvidenceSource>, max_concurrency: usize) -> Self {
        Self {
            sources,
            max_concurrency: max_concurrency.max(1),
            cancel: CancelFlag::new(),
        }
    }

    /// Build every source's adapter. Fails on the first invalid config.
    pub fn from_configs(configs: Vec<SourceConfig>, max_concurrency: usize) -> Result<Self, CollectError> {
        let sources = configs
            .into_iter()
            .map(EvidenceSource::from_config)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::new(sources, max_concurrency))
    }

    pub fn sources(&self) -> &[EvidenceSource] {
        &self.sources
    }

    /// Handle for cancelling an in-progress [`collect_all`](Self::collect_all).
    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }

    /// All sources' items merged as they arrive, tagged with the source id.
    pub fn stream(&self) -> BoxStream<'static, (String, Result<EvidenceRecord, CollectError>)> {
        let cancel = self.cancel.clone();
        stream::iter(self.sources.clone())
            .map(move |source| {
                let source_id = source.id().to_string();
                info!(source_id = %source_id, kind = source.config().kind.as_str(), "collection started");
                source
                    .collect(cancel.clone())
                    .map(move |item| (source_id.clone(), item))
                    .boxed()
            })
            .flatten_unordered(self.max_concurrency)
            .boxed()
    }

    /// Run every source to completion, handing each record to `on_record`.
    ///
    /// A failing source stops on its own; the others carry on. Summaries come
    /// back in source order.
    pub async fn collect_all<F>(&self, mut on_record: F) -> Vec<CollectionSummary>
    where
        F: FnMut(EvidenceRecord),
    {
        let mut summaries: HashMap<String, CollectionSummary> = self
            .sources
            .iter()
            .map(|s| (s.id().to_string(), CollectionSummary::started(s.id())))
            .collect();

        let mut items = self.stream();
        while let Some((source_id, item)) = items.next().await {
            let Some(summary) = summaries.get_mut(&source_id) else {
                continue;
            };
            match item {
                Ok(record) => {
                    summary.records += 1;
                    on_record(record);
                }
                Err(CollectError::Cancelled { .. }) => {
                    summary.status = CollectionStatus::Cancelled;
                }
                Err(e) => {
                    warn!(source_id = %source_id, records = summary.records, error = %e, "collection failed");
                    summary.status = CollectionStatus::Failed;
                    summary.failure = Some(e.to_string());
                }
            }
        }

        self.sources
            .iter()
            .filter_map(|s| summaries.remove(s.id()))
            .inspect(|summary| {
                info!(
                    source_id = %summary.source_id,
                    records = summary.records,
                    status = ?summary.status,
                    "collection finished"
                );
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use async_trait::async_trait;
    use tokio::time::Instant;

    use super::*;
    use crate::adapter::{Page, SourceAdapter};
    use crate::config::SourceKind;
    use crate::error::AdapterError;
    use crate::sources::StaticAdapter;
    use attest_core::Attributes;

    fn records(source: &str, n: usize) -> Vec<EvidenceRecord> {
        (0..n)
            .map(|i| EvidenceRecord::new(format!("{source}-{i}"), source, "t", Attributes::new()))
            .collect()
    }

    fn static_source(id: &str, n: usize, page_size: usize) -> EvidenceSource {
        let config = SourceConfig::new(id, SourceKind::Static, "t").with_page_size(page_size);
        EvidenceSource::new(config, Arc::new(StaticAdapter::new(id, records(id, n), page_size)))
    }

    /// One good page, then the upstream breaks.
    struct FlakyAdapter;

    #[async_trait]
    impl SourceAdapter for FlakyAdapter {
        fn kind(&self) -> &'static str {
            "flaky"
        }

        async fn fetch_page(&self, cursor: Option<String>) -> Result<Page, AdapterError> {
            match cursor {
                None => Ok(Page {
                    records: records("flaky", 2),
                    next_cursor: Some("2".into()),
                }),
                Some(_) => Err(AdapterError::Status {
                    url: "https://inventory.internal/assets".into(),
                    status: 502,
                }),
            }
        }
    }

    /// Two slow pages; tracks how many runs are open at once.
    struct GaugedAdapter {
        id: String,
        open: Arc<AtomicUsize>,
        peak: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl SourceAdapter for GaugedAdapter {
        fn kind(&self) -> &'static str {
            "gauged"
        }

        async fn fetch_page(&self, cursor: Option<String>) -> Result<Page, AdapterError> {
            if cursor.is_none() {
                let now = self.open.fetch_add(1, Ordering::SeqCst) + 1;
                self.peak.fetch_max(now, Ordering::SeqCst);
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
            if cursor.is_none() {
                Ok(Page {
                    records: records(&self.id, 1),
                    next_cursor: Some("1".into()),
                })
            } else {
                self.open.fetch_sub(1, Ordering::SeqCst);
                Ok(Page::last(records(&self.id, 1)))
            }
        }
    }

    #[tokio::test]
    async fn failing_source_keeps_its_records_and_spares_siblings() {
        let flaky = EvidenceSource::new(
            SourceConfig::new("flaky", SourceKind::Http, "t"),
            Arc::new(FlakyAdapter),
        );
        let collector = Collector::new(vec![flaky, static_source("good", 5, 2)], 4);

        let mut seen = Vec::new();
        let summaries = collector.collect_all(|r| seen.push(r.resource_id)).await;

        assert_eq!(summaries[0].source_id, "flaky");
        assert_eq!(summaries[0].status, CollectionStatus::Failed);
        assert_eq!(summaries[0].records, 2);
        assert!(summaries[0].failure.as_deref().unwrap().contains("502"));

        assert_eq!(summaries[1].status, CollectionStatus::Completed);
        assert_eq!(summaries[1].records, 5);
        assert_eq!(seen.len(), 7);
    }

    #[tokio::test]
    async fn cancellation_stops_between_records() {
        let collector = Collector::new(vec![static_source("a", 10, 10), static_source("b", 10, 10)], 1);
        let cancel = collector.cancel_flag();

        let mut seen = 0;
        let summaries = collector
            .collect_all(|_| {
                seen += 1;
                cancel.cancel();
            })
            .await;

        assert_eq!(seen, 1);
        assert!(summaries.iter().all(|s| s.status == CollectionStatus::Cancelled));
        assert_eq!(summaries.iter().map(|s| s.records).sum::<usize>(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn global_concurrency_bound_is_respected() {
        let open = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let sources = (0..5)
            .map(|i| {
                let id = format!("s{i}");
                let adapter = GaugedAdapter {
                    id: id.clone(),
                    open: Arc::clone(&open),
                    peak: Arc::clone(&peak),
                };
                EvidenceSource::new(SourceConfig::new(id, SourceKind::Http, "t"), Arc::new(adapter))
            })
            .collect();

        let collector = Collector::new(sources, 2);
        let summaries = collector.collect_all(|_| {}).await;

        assert_eq!(summaries.len(), 5);
        assert!(summaries.iter().all(|s| s.records == 2 && s.status == CollectionStatus::Completed));
        assert_eq!(peak.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn throttled_source_does_not_starve_others() {
        // One token, refilled every 10s: three pages take ~20s.
        let slow_config = SourceConfig::new("slow", SourceKind::Static, "t")
            .with_page_size(1)
            .with_rate_limit(1, 0.1);
        let slow = EvidenceSource::new(slow_config, Arc::new(StaticAdapter::new("slow", records("slow", 3), 1)));
        let collector = Collector::new(vec![slow, static_source("fast", 6, 2)], 2);

        let start = Instant::now();
        let arrivals = Mutex::new(Vec::new());
        let summaries = collector
            .collect_all(|r| arrivals.lock().unwrap().push((r.source_id, start.elapsed())))
            .await;

        let arrivals = arrivals.into_inner().unwrap();
        let fast_done = arrivals
            .iter()
            .filter(|(s, _)| s == "fast")
            .map(|(_, t)| *t)
            .max()
            .unwrap();
        let slow_done = arrivals
            .iter()
            .filter(|(s, _)| s == "slow")
            .map(|(_, t)| *t)
            .max()
            .unwrap();

        assert!(fast_done < Duration::from_secs(1), "{fast_done:?}");
        assert!(slow_done >= Duration::from_secs(20), "{slow_done:?}");
        assert!(summaries.iter().all(|s| s.status == CollectionStatus::Completed));
    }
}
