//! Persistence of request plans and block progress
//!
//! The engine only talks to the [`DownloadStore`] trait. Three backends are
//! provided:
//!
//! - [`NoStore`]: persists nothing, so nothing resumes across restarts
//! - [`MemoryStore`]: process-local tables
//! - [`JsonFileStore`]: one JSON document rewritten atomically per change

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::errors::StoreResult;

pub mod json;
pub mod memory;
mod tables;
pub mod types;

pub use json::JsonFileStore;
pub use memory::MemoryStore;
pub use types::{BlockId, PersistedBlock, PersistedRequest, SourceRecord};

/// Durable mapping from request and block identity to their state
#[async_trait]
pub trait DownloadStore: Send + Sync + std::fmt::Debug {
    /// Every persisted request with its blocks
    async fn get_all_requests(&self) -> StoreResult<Vec<PersistedRequest>>;

    /// First persisted request sharing any URL with `urls`
    async fn query_by_urls(&self, urls: &[String]) -> StoreResult<Option<PersistedRequest>>;

    /// Insert or replace the request row; blocks are ignored
    async fn upsert_request(&self, request: &PersistedRequest) -> StoreResult<()>;

    /// Insert or replace every block row of the request
    async fn upsert_blocks(&self, request: &PersistedRequest) -> StoreResult<()>;

    async fn remove_request(&self, request_id: u64) -> StoreResult<()>;

    async fn remove_blocks(&self, request_id: u64) -> StoreResult<()>;

    /// Record a checkpoint; unknown blocks are ignored
    async fn update_block_progress(
        &self,
        block: BlockId,
        downloaded_bytes: u64,
        timestamp: DateTime<Utc>,
    ) -> StoreResult<()>;
}

/// Store that keeps nothing
#[derive(Debug, Default, Clone, Copy)]
pub struct NoStore;

#[async_trait]
impl DownloadStore for NoStore {
    async fn get_all_requests(&self) -> StoreResult<Vec<PersistedRequest>> {
        Ok(Vec::new())
    }

    async fn query_by_urls(&self, _urls: &[String]) -> StoreResult<Option<PersistedRequest>> {
        Ok(None)
    }

    async fn upsert_request(&self, _request: &PersistedRequest) -> StoreResult<()> {
        Ok(())
    }

    async fn upsert_blocks(&self, _request: &PersistedRequest) -> StoreResult<()> {
        Ok(())
    }

    async fn remove_request(&self, _request_id: u64) -> StoreResult<()> {
        Ok(())
    }

    async fn remove_blocks(&self, _request_id: u64) -> StoreResult<()> {
        Ok(())
    }

    async fn update_block_progress(
        &self,
        _block: BlockId,
        _downloaded_bytes: u64,
        _timestamp: DateTime<Utc>,
    ) -> StoreResult<()> {
        Ok(())
    }
}
