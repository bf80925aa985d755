use async_trait::async_trait;

use attest_core::EvidenceRecord;

use super::parse_offset;
use crate::adapter::{Page, SourceAdapter};
use crate::config::SourceConfig;
use crate::error::AdapterError;

/// Serves records listed inline in the source config, `page_size` at a time.
#[derive(Debug, Clone)]
pub struct StaticAdapter {
    source_id: String,
    records: Vec<EvidenceRecord>,
    page_size: usize,
}

impl StaticAdapter {
    pub fn new(source_id: impl Into<String>, records: Vec<EvidenceRecord>, page_size: usize) -> Self {
        Self {
            source_id: source_id.into(),
            records,
            page_size: page_size.max(1),
        }
    }

    pub fn from_config(config: &SourceConfig) -> Self {
        let records = config
            .records
            .iter()
            .cloned()
            .map(|raw| raw.into_record(config))
            .collect();
        Self::new(config.id.clone(), records, config.page_size)
    }
}

#[async_trait]
impl SourceAdapter for StaticAdapter {
    fn kind(&self) -> &'static str {
        "static"
    }

    async fn fetch_page(&self, cursor: Option<String>) -> Result<Page, AdapterError> {
        let start = parse_offset(cursor.as_deref(), &self.source_id)? as usize;
        let start = start.min(self.records.len());
        let end = (start + self.page_size).min(self.records.len());

        Ok(Page {
            records: self.records[start..end].to_vec(),
            next_cursor: (end < self.records.len()).then(|| end.to_string()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use attest_core::Attributes;

    fn records(n: usize) -> Vec<EvidenceRecord> {
        (0..n)
            .map(|i| EvidenceRecord::new(format!("r{i}"), "inline", "t", Attributes::new()))
            .collect()
    }

    #[tokio::test]
    async fn pages_through_inline_records() {
        let adapter = StaticAdapter::new("inline", records(5), 2);

        let first = adapter.fetch_page(None).await.unwrap();
        assert_eq!(first.records.len(), 2);
        assert_eq!(first.next_cursor.as_deref(), Some("2"));

        let second = adapter.fetch_page(first.next_cursor).await.unwrap();
        assert_eq!(second.records[0].resource_id, "r2");

        let last = adapter.fetch_page(Some("4".into())).await.unwrap();
        assert_eq!(last.records.len(), 1);
        assert!(last.next_cursor.is_none());
    }

    #[tokio::test]
    async fn empty_source_yields_one_empty_page() {
        let adapter = StaticAdapter::new("inline", Vec::new(), 10);
        let page = adapter.fetch_page(None).await.unwrap();
        assert!(page.records.is_empty());
        assert!(page.next_cursor.is_none());
    }

    #[tokio::test]
    async fn garbage_cursor_is_a_parse_error() {
        let adapter = StaticAdapter::new("inline", records(1), 1);
        let err = adapter.fetch_page(Some("abc".into())).await.unwrap_err();
        assert!(matches!(err, AdapterError::Parse { .. }));
    }
}
