//! In-memory tables shared by the memory and JSON backends

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::types::{BlockId, PersistedBlock, PersistedRequest};
use crate::app::request::RequestKey;

/// Request rows keyed by id, block rows keyed by request id then index
#[derive(Debug, Default, Clone)]
pub(crate) struct Tables {
    requests: BTreeMap<u64, PersistedRequest>,
    blocks: BTreeMap<u64, BTreeMap<u32, PersistedBlock>>,
}

/// On-disk document
#[derive(Debug, Default, Serialize, Deserialize)]
pub(crate) struct StoreDocument {
    pub version: u32,
    pub requests: Vec<PersistedRequest>,
}

pub(crate) const DOCUMENT_VERSION: u32 = 1;

impl Tables {
    fn assemble(&self, row: &PersistedRequest) -> PersistedRequest {
        let mut request = row.clone();
        request.blocks = self
            .blocks
            .get(&row.id)
            .map(|b| b.values().cloned().collect())
            .unwrap_or_default();
        request
    }

    pub fn all(&self) -> Vec<PersistedRequest> {
        self.requests.values().map(|r| self.assemble(r)).collect()
    }

    pub fn query_by_urls(&self, urls: &[String]) -> Option<PersistedRequest> {
        let wanted = RequestKey::from_urls(urls.iter().cloned());
        self.requests
            .values()
            .find(|r| r.key().overlaps(&wanted))
            .map(|r| self.assemble(r))
    }

    pub fn upsert_request(&mut self, request: &PersistedRequest) {
        self.requests.insert(request.id, request.without_blocks());
    }

    pub fn upsert_blocks(&mut self, request: &PersistedRequest) {
        let rows = self.blocks.entry(request.id).or_default();
        for block in &request.blocks {
            rows.insert(block.index, block.clone());
        }
    }

    pub fn remove_request(&mut self, request_id: u64) -> bool {
        self.requests.remove(&request_id).is_some()
    }

    pub fn remove_blocks(&mut self, request_id: u64) -> bool {
        self.blocks.remove(&request_id).is_some()
    }

    pub fn update_block_progress(
        &mut self,
        block: BlockId,
        downloaded_bytes: u64,
        timestamp: DateTime<Utc>,
    ) -> bool {
        match self
            .blocks
            .get_mut(&block.request_id)
            .and_then(|rows| rows.get_mut(&block.index))
        {
            Some(row) => {
                row.downloaded_bytes = downloaded_bytes;
                row.updated_at = timestamp;
                true
            }
            None => false,
        }
    }

    pub fn to_document(&self) -> StoreDocument {
        StoreDocument {
            version: DOCUMENT_VERSION,
            requests: self.all(),
        }
    }

    pub fn from_document(document: StoreDocument) -> Self {
        let mut tables = Self::default();
        for request in document.requests {
            tables.upsert_request(&request);
            tables.upsert_blocks(&request);
        }
        tables
    }
}
