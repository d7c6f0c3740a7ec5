//! Persisted request and block records

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::app::request::{DownloadRequest, Priority, RequestKey};
use crate::app::source::{Protocol, ProtocolKind, Source};

/// Identity of a persisted block: `"{request_id}-{index}"`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlockId {
    pub request_id: u64,
    pub index: u32,
}

impl BlockId {
    pub fn new(request_id: u64, index: u32) -> Self {
        Self { request_id, index }
    }
}

impl std::fmt::Display for BlockId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}", self.request_id, self.index)
    }
}

/// Serialized form of a source
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceRecord {
    pub url: String,
    pub protocol: ProtocolKind,
    #[serde(with = "humantime_serde")]
    pub connect_timeout: std::time::Duration,
    #[serde(with = "humantime_serde")]
    pub read_timeout: std::time::Duration,
    #[serde(default)]
    pub headers: Vec<(String, String)>,
}

impl From<&Source> for SourceRecord {
    fn from(source: &Source) -> Self {
        let (connect_timeout, read_timeout) = source.protocol().timeouts();
        let headers = match source.protocol() {
            Protocol::Http(p) => p.headers.clone(),
            Protocol::Ftp(_) => Vec::new(),
        };
        Self {
            url: source.url().to_string(),
            protocol: source.protocol().kind(),
            connect_timeout,
            read_timeout,
            headers,
        }
    }
}

/// One persisted block row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedBlock {
    pub index: u32,
    pub start: u64,
    pub end: u64,
    pub downloaded_bytes: u64,
    pub url: String,
    pub updated_at: DateTime<Utc>,
}

/// A persisted request with its blocks, ordered by index
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedRequest {
    pub id: u64,
    pub sources: Vec<SourceRecord>,
    pub destination: PathBuf,
    pub temp_path: PathBuf,
    pub priority: Priority,
    pub max_retry_times: u32,
    pub block_size: u64,
    pub total_length: u64,
    #[serde(default)]
    pub blocks: Vec<PersistedBlock>,
}

impl PersistedRequest {
    /// Snapshot a planned request
    pub fn from_request(request: &DownloadRequest) -> Self {
        let now = Utc::now();
        let blocks = request
            .block_requests()
            .iter()
            .map(|b| PersistedBlock {
                index: b.index(),
                start: b.block().start(),
                end: b.block().end(),
                downloaded_bytes: b.downloaded(),
                url: b.block().source().url().to_string(),
                updated_at: now,
            })
            .collect();

        Self {
            id: request.id(),
            sources: request.sources().iter().map(SourceRecord::from).collect(),
            destination: request.destination().to_path_buf(),
            temp_path: request.temp_path(),
            priority: request.priority(),
            max_retry_times: request.max_retry_times(),
            block_size: request.block_size(),
            total_length: request.total_length().unwrap_or(0),
            blocks,
        }
    }

    /// URL-set identity of the persisted request
    pub fn key(&self) -> RequestKey {
        RequestKey::from_urls(self.sources.iter().map(|s| s.url.clone()))
    }

    /// Sum of persisted progress
    pub fn downloaded_bytes(&self) -> u64 {
        self.blocks.iter().map(|b| b.downloaded_bytes).sum()
    }

    /// Request row without its blocks
    pub(crate) fn without_blocks(&self) -> Self {
        Self {
            blocks: Vec::new(),
            ..self.clone()
        }
    }
}
