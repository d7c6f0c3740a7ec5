//! Public entry point of the engine
//!
//! A [`Downloader`] owns one dispatcher. Build it with
//! [`Downloader::builder`], create requests with [`Downloader::request`] and
//! submit them with [`Downloader::start`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tracing::info;

use super::client::{ClientConfig, ClientFactory, ProtocolClientFactory};
use super::dispatcher::{Dispatcher, DownloaderConfig};
use super::request::{DownloadRequest, DownloadRequestBuilder};
use super::store::{DownloadStore, NoStore, PersistedRequest};
use crate::errors::{ConfigResult, DownloadResult, StoreResult};

/// Resumable multi-connection downloader
#[derive(Debug)]
pub struct Downloader {
    dispatcher: Arc<Dispatcher>,
    next_id: AtomicU64,
}

impl Downloader {
    pub fn builder() -> DownloaderBuilder {
        DownloaderBuilder::default()
    }

    pub fn config(&self) -> &DownloaderConfig {
        self.dispatcher.config()
    }

    /// Start a request with a fresh id and the configured defaults
    pub fn request(&self) -> DownloadRequestBuilder {
        let config = self.dispatcher.config();
        DownloadRequestBuilder::new(self.next_id.fetch_add(1, Ordering::Relaxed))
            .max_retry_times(config.max_retry_times)
            .timeouts(config.connect_timeout, config.read_timeout)
    }

    /// Submit a request
    ///
    /// Returns false when a request with the same URL set is in flight. A
    /// request the pool refuses delivers `Failed` and the error is returned.
    pub fn start(&self, request: &Arc<DownloadRequest>) -> DownloadResult<bool> {
        self.dispatcher.enqueue(request)
    }

    /// Cancel in-flight requests that download `url`
    pub async fn cancel(&self, url: &str) -> usize {
        self.dispatcher.cancel(url).await
    }

    /// Cancel one request, optionally deleting its temp file and store rows
    pub async fn cancel_request(&self, request: &Arc<DownloadRequest>, cleanup: bool) -> bool {
        self.dispatcher.cancel_request(request, cleanup).await
    }

    pub async fn cancel_all(&self) -> usize {
        self.dispatcher.cancel_all().await
    }

    /// Drop in-flight or persisted state for `url`
    pub async fn clean(&self, url: &str) -> DownloadResult<bool> {
        self.dispatcher.clean(url).await
    }

    /// Requests currently in flight
    pub fn in_flight(&self) -> Vec<Arc<DownloadRequest>> {
        self.dispatcher.in_flight()
    }

    /// Requests the store could resume
    pub async fn persisted_requests(&self) -> StoreResult<Vec<PersistedRequest>> {
        self.dispatcher.store().get_all_requests().await
    }

    /// Cancel everything, let tasks checkpoint and stop the pools
    pub async fn shutdown(&self, grace: Duration) {
        self.dispatcher.shutdown(grace).await;
    }
}

/// Builder for [`Downloader`]
#[derive(Debug, Default)]
pub struct DownloaderBuilder {
    config: Option<DownloaderConfig>,
    client_config: Option<ClientConfig>,
    store: Option<Arc<dyn DownloadStore>>,
    factory: Option<Arc<dyn ClientFactory>>,
}

impl DownloaderBuilder {
    pub fn config(mut self, config: DownloaderConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Connection pool settings of the default HTTP client factory
    pub fn client_config(mut self, config: ClientConfig) -> Self {
        self.client_config = Some(config);
        self
    }

    /// Persistence backend, [`NoStore`] when unset
    pub fn store(mut self, store: Arc<dyn DownloadStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Replace the protocol client factory
    pub fn client_factory(mut self, factory: Arc<dyn ClientFactory>) -> Self {
        self.factory = Some(factory);
        self
    }

    /// Validate the configuration and start the pools
    ///
    /// Must be called from within a tokio runtime.
    pub fn build(self) -> ConfigResult<Downloader> {
        let config = self.config.unwrap_or_default();
        config.validate()?;

        let store = self.store.unwrap_or_else(|| Arc::new(NoStore));
        let factory = self.factory.unwrap_or_else(|| {
            Arc::new(ProtocolClientFactory::new(
                self.client_config.unwrap_or_default(),
            ))
        });

        info!(
            "Starting downloader: {} transfer threads, {} per request, store {:?}",
            config.thread_count, config.threads_per_request, store
        );

        Ok(Downloader {
            dispatcher: Dispatcher::new(config, store, factory),
            next_id: AtomicU64::new(seed_id()),
        })
    }
}

/// Request ids start at the current time in milliseconds
fn seed_id() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(1)
}
