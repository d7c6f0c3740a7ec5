//! Process-local store

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use super::tables::Tables;
use super::types::{BlockId, PersistedRequest};
use super::DownloadStore;
use crate::errors::StoreResult;

/// Store backed by in-memory tables
///
/// Outlives any number of downloaders sharing it, which makes it the
/// backend of choice for restart scenarios inside one process.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DownloadStore for MemoryStore {
    async fn get_all_requests(&self) -> StoreResult<Vec<PersistedRequest>> {
        Ok(self.tables.lock().await.all())
    }

    async fn query_by_urls(&self, urls: &[String]) -> StoreResult<Option<PersistedRequest>> {
        Ok(self.tables.lock().await.query_by_urls(urls))
    }

    async fn upsert_request(&self, request: &PersistedRequest) -> StoreResult<()> {
        self.tables.lock().await.upsert_request(request);
        Ok(())
    }

    async fn upsert_blocks(&self, request: &PersistedRequest) -> StoreResult<()> {
        self.tables.lock().await.upsert_blocks(request);
        Ok(())
    }

    async fn remove_request(&self, request_id: u64) -> StoreResult<()> {
        self.tables.lock().await.remove_request(request_id);
        Ok(())
    }

    async fn remove_blocks(&self, request_id: u64) -> StoreResult<()> {
        self.tables.lock().await.remove_blocks(request_id);
        Ok(())
    }

    async fn update_block_progress(
        &self,
        block: BlockId,
        downloaded_bytes: u64,
        timestamp: DateTime<Utc>,
    ) -> StoreResult<()> {
        self.tables
            .lock()
            .await
            .update_block_progress(block, downloaded_bytes, timestamp);
        Ok(())
    }
}
