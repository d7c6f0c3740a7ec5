//! JSON file store
//!
//! Keeps the whole store in memory and rewrites the file after every change.
//! Writes go to a temporary file in the same directory which is then renamed
//! over the store, so a crash never leaves a half-written document.

use std::io::Write;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::tables::{StoreDocument, Tables};
use super::types::{BlockId, PersistedRequest};
use super::DownloadStore;
use crate::errors::{StoreError, StoreResult};

/// Store persisted as a single JSON document
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    tables: Mutex<Tables>,
}

impl JsonFileStore {
    /// Open the store at `path`, starting empty if the file does not exist
    pub async fn open(path: impl Into<PathBuf>) -> StoreResult<Self> {
        let path = path.into();
        let tables = match tokio::fs::read(&path).await {
            Ok(bytes) if bytes.is_empty() => Tables::default(),
            Ok(bytes) => {
                let document: StoreDocument = serde_json::from_slice(&bytes)?;
                info!(
                    "Loaded {} persisted requests from {}",
                    document.requests.len(),
                    path.display()
                );
                Tables::from_document(document)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Tables::default(),
            Err(e) => return Err(e.into()),
        };

        Ok(Self {
            path,
            tables: Mutex::new(tables),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn flush(&self, tables: &Tables) -> StoreResult<()> {
        let bytes = serde_json::to_vec_pretty(&tables.to_document())?;
        let path = self.path.clone();

        tokio::task::spawn_blocking(move || write_atomically(&path, &bytes))
            .await
            .map_err(|e| StoreError::Backend {
                message: format!("store writer panicked: {}", e),
            })??;

        debug!("Store written to {}", self.path.display());
        Ok(())
    }
}

fn write_atomically(path: &Path, bytes: &[u8]) -> StoreResult<()> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    std::fs::create_dir_all(&dir)?;

    let mut tmp = tempfile::NamedTempFile::new_in(&dir)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|_| StoreError::Persist {
        path: path.to_path_buf(),
    })?;
    Ok(())
}

#[async_trait]
impl DownloadStore for JsonFileStore {
    async fn get_all_requests(&self) -> StoreResult<Vec<PersistedRequest>> {
        Ok(self.tables.lock().await.all())
    }

    async fn query_by_urls(&self, urls: &[String]) -> StoreResult<Option<PersistedRequest>> {
        Ok(self.tables.lock().await.query_by_urls(urls))
    }

    async fn upsert_request(&self, request: &PersistedRequest) -> StoreResult<()> {
        let mut tables = self.tables.lock().await;
        tables.upsert_request(request);
        self.flush(&tables).await
    }

    async fn upsert_blocks(&self, request: &PersistedRequest) -> StoreResult<()> {
        let mut tables = self.tables.lock().await;
        tables.upsert_blocks(request);
        self.flush(&tables).await
    }

    async fn remove_request(&self, request_id: u64) -> StoreResult<()> {
        let mut tables = self.tables.lock().await;
        if tables.remove_request(request_id) {
            self.flush(&tables).await?;
        }
        Ok(())
    }

    async fn remove_blocks(&self, request_id: u64) -> StoreResult<()> {
        let mut tables = self.tables.lock().await;
        if tables.remove_blocks(request_id) {
            self.flush(&tables).await?;
        }
        Ok(())
    }

    async fn update_block_progress(
        &self,
        block: BlockId,
        downloaded_bytes: u64,
        timestamp: DateTime<Utc>,
    ) -> StoreResult<()> {
        let mut tables = self.tables.lock().await;
        if tables.update_block_progress(block, downloaded_bytes, timestamp) {
            self.flush(&tables).await?;
        }
        Ok(())
    }
}
