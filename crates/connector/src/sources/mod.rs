//! Built-in source adapters.

mod file;
mod http;
mod static_source;

use std::sync::Arc;

pub use file::JsonLinesAdapter;
pub use http::HttpAdapter;
pub use static_source::StaticAdapter;

use crate::adapter::SourceAdapter;
use crate::config::{SourceConfig, SourceKind};
use crate::error::{AdapterError, CollectError};

/// Construct the adapter for `config.kind`.
pub fn build_adapter(config: &SourceConfig) -> Result<Arc<dyn SourceAdapter>, CollectError> {
    let adapter: Arc<dyn SourceAdapter> = match config.kind {
        SourceKind::Static => Arc::new(StaticAdapter::from_config(config)),
        SourceKind::File => Arc::new(JsonLinesAdapter::from_config(config)?),
        SourceKind::Http => Arc::new(HttpAdapter::from_config(config)?),
    };
    Ok(adapter)
}

/// Offset cursors are plain decimal strings.
fn parse_offset(cursor: Option<&str>, location: &str) -> Result<u64, AdapterError> {
    match cursor {
        None => Ok(0),
        Some(raw) => raw.parse().map_err(|_| AdapterError::Parse {
            location: location.to_string(),
            reason: format!("invalid cursor '{raw}'"),
        }),
    }
}
