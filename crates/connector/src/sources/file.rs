use std::io::SeekFrom;
use std::path::PathBuf;

use async_trait::async_trait;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, AsyncSeekExt, BufReader};

use crate::adapter::{Page, SourceAdapter};
use crate::config::{RawRecord, SourceConfig};
use crate::error::{AdapterError, CollectError};

/// Reads a JSON-lines evidence file, one [`RawRecord`] per line.
///
/// The cursor is `<byte offset>:<line number>` so a page resumes exactly
/// where the previous one stopped and parse errors can name their line.
#[derive(Debug, Clone)]
pub struct JsonLinesAdapter {
    config: SourceConfig,
    path: PathBuf,
}

impl JsonLinesAdapter {
    pub fn from_config(config: &SourceConfig) -> Result<Self, CollectError> {
        let path = config
            .path
            .clone()
            .ok_or_else(|| CollectError::Config(format!("source '{}': file sources need a path", config.id)))?;
        Ok(Self {
            config: config.clone(),
            path,
        })
    }

    fn parse_cursor(&self, cursor: Option<&str>) -> Result<(u64, u64), AdapterError> {
        let Some(raw) = cursor else {
            return Ok((0, 0));
        };
        raw.split_once(':')
            .and_then(|(offset, line)| Some((offset.parse().ok()?, line.parse().ok()?)))
            .ok_or_else(|| AdapterError::Parse {
                location: self.path.display().to_string(),
                reason: format!("invalid cursor '{raw}'"),
            })
    }
}

#[async_trait]
impl SourceAdapter for JsonLinesAdapter {
    fn kind(&self) -> &'static str {
        "file"
    }

    async fn fetch_page(&self, cursor: Option<String>) -> Result<Page, AdapterError> {
        let (mut offset, mut line_no) = self.parse_cursor(cursor.as_deref())?;

        let mut file = File::open(&self.path).await?;
        file.seek(SeekFrom::Start(offset)).await?;
        let mut reader = BufReader::new(file);

        let mut records = Vec::new();
        let mut line = String::new();
        while records.len() < self.config.page_size {
            line.clear();
            let read = reader.read_line(&mut line).await?;
            if read == 0 {
                return Ok(Page::last(records));
            }
            offset += read as u64;
            line_no += 1;

            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            let raw: RawRecord = serde_json::from_str(trimmed).map_err(|e| AdapterError::Parse {
                location: format!("{}:{line_no}", self.path.display()),
                reason: e.to_string(),
            })?;
            records.push(raw.into_record(&self.config));
        }

        // A full page; an empty follow-up page ends the run if the file is done.
        Ok(Page {
            records,
            next_cursor: Some(format!("{offset}:{line_no}")),
        })
    }
}
