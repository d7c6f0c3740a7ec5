//! Dispatcher: pools, registry and outcome aggregation
//!
//! The dispatcher owns the preparation pool (one worker, so resume lookups
//! against the store never interleave), the transfer pool and the registry
//! of in-flight requests keyed by their URL set. Tasks report back here;
//! terminal outcomes are decided by the request under its own lock and the
//! dispatcher carries out the side effects (store rows, temp file, rename,
//! registry membership).

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tracing::{debug, error, info, warn};
use url::Url;

use super::config::DownloaderConfig;
use super::pool::{PoolConfig, TaskKey, TaskPool};
use crate::app::client::ClientFactory;
use crate::app::events::DownloadEvent;
use crate::app::request::{BlockRequest, DownloadRequest, RequestState};
use crate::app::store::{DownloadStore, PersistedRequest};
use crate::app::task;
use crate::constants::workers::PREPARE_WORKERS;
use crate::errors::{DownloadError, DownloadResult};

/// Schedules preparation and block transfers and aggregates their outcomes
pub struct Dispatcher {
    config: DownloaderConfig,
    store: Arc<dyn DownloadStore>,
    factory: Arc<dyn ClientFactory>,
    registry: Mutex<HashMap<String, Arc<DownloadRequest>>>,
    prepare_pool: TaskPool,
    transfer_pool: TaskPool,
    submissions: AtomicU64,
}

impl Dispatcher {
    /// Create the dispatcher and start both pools
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(
        config: DownloaderConfig,
        store: Arc<dyn DownloadStore>,
        factory: Arc<dyn ClientFactory>,
    ) -> Arc<Self> {
        let prepare_pool = TaskPool::start(PoolConfig {
            name: "prepare",
            min_workers: PREPARE_WORKERS,
            max_workers: PREPARE_WORKERS,
            keep_alive: config.keep_alive,
            capacity: config.max_task_count,
        });
        let transfer_pool = TaskPool::start(PoolConfig {
            name: "transfer",
            min_workers: config.core_thread_count.min(config.thread_count),
            max_workers: config.thread_count,
            keep_alive: config.keep_alive,
            capacity: config.max_task_count,
        });

        Arc::new(Self {
            config,
            store,
            factory,
            registry: Mutex::new(HashMap::new()),
            prepare_pool,
            transfer_pool,
            submissions: AtomicU64::new(0),
        })
    }

    pub fn config(&self) -> &DownloaderConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn DownloadStore> {
        &self.store
    }

    pub fn factory(&self) -> &Arc<dyn ClientFactory> {
        &self.factory
    }

    fn registry(&self) -> MutexGuard<'_, HashMap<String, Arc<DownloadRequest>>> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Requests currently registered
    pub fn in_flight(&self) -> Vec<Arc<DownloadRequest>> {
        self.registry().values().cloned().collect()
    }

    /// Register a request and queue its preparation
    ///
    /// Returns false when a request with the same URL set is already in
    /// flight. A request refused by the pool fails with a `Failed` event and
    /// the error is also returned to the caller.
    pub fn enqueue(self: &Arc<Self>, request: &Arc<DownloadRequest>) -> DownloadResult<bool> {
        {
            let mut registry = self.registry();
            if registry.contains_key(request.key().as_str()) {
                info!("Request for {} already in flight", request.key());
                return Ok(false);
            }
            if request.state() != RequestState::New {
                return Err(DownloadError::InvalidRequest {
                    reason: format!("request {} was already submitted", request.id()),
                });
            }
            registry.insert(request.key().as_str().to_string(), Arc::clone(request));
        }

        request.set_submission(self.submissions.fetch_add(1, Ordering::AcqRel) + 1);
        request.transition(RequestState::PrepareQueued);

        let key = TaskKey::new(request.priority(), request.submission(), 0);
        let guard = TaskGuard::new(Arc::clone(self), Arc::clone(request));
        let submitted = self.prepare_pool.submit(key, async move {
            task::prepare::run(&guard.dispatcher, &guard.request).await;
            guard.finish().await;
        });

        if let Err(e) = submitted {
            warn!("Could not queue request {}: {}", request.id(), e);
            request.fail(None, Arc::new(refusal_copy(&e)));
            self.unregister(request);
            return Err(e);
        }

        debug!(
            "Request {} queued for preparation ({} priority)",
            request.id(),
            request.priority()
        );
        Ok(true)
    }

    /// Queue a block transfer
    pub fn enqueue_block(self: &Arc<Self>, block: &Arc<BlockRequest>) -> DownloadResult<()> {
        let request = block.request().ok_or_else(|| DownloadError::InvalidRequest {
            reason: format!("block {} has no live request", block.index()),
        })?;

        let key = TaskKey::new(request.priority(), request.submission(), block.index());
        let job_block = Arc::clone(block);
        let guard = TaskGuard::new(Arc::clone(self), request);
        self.transfer_pool.submit(key, async move {
            task::transfer::run(&guard.dispatcher, &guard.request, &job_block).await;
            guard.finish().await;
        })
    }

    /// Cancel every in-flight request that has `url` among its sources
    pub async fn cancel(&self, url: &str) -> usize {
        let url = normalize(url);
        let matches: Vec<_> = self
            .registry()
            .values()
            .filter(|r| r.key().contains(&url))
            .cloned()
            .collect();

        let mut cancelled = 0;
        for request in matches {
            if self.cancel_request(&request, false).await {
                cancelled += 1;
            }
        }
        cancelled
    }

    /// Cancel one request, optionally deleting its temp file and store rows
    pub async fn cancel_request(&self, request: &Arc<DownloadRequest>, cleanup: bool) -> bool {
        if !request.request_cancel(cleanup) {
            return false;
        }
        info!("Cancelling request {} ({})", request.id(), request.key());

        if request.outstanding_tasks() == 0 {
            self.settle_cancelled(request).await;
        }
        true
    }

    pub async fn cancel_all(&self) -> usize {
        let requests = self.in_flight();
        let mut cancelled = 0;
        for request in requests {
            if self.cancel_request(&request, false).await {
                cancelled += 1;
            }
        }
        cancelled
    }

    /// Drop all state for `url`
    ///
    /// An in-flight request is cancelled with cleanup. Otherwise persisted
    /// rows and the temp file of an earlier run are removed directly.
    pub async fn clean(&self, url: &str) -> DownloadResult<bool> {
        let url = normalize(url);
        let in_flight: Vec<_> = self
            .registry()
            .values()
            .filter(|r| r.key().contains(&url))
            .cloned()
            .collect();

        if !in_flight.is_empty() {
            for request in &in_flight {
                self.cancel_request(request, true).await;
            }
            return Ok(true);
        }

        match self.store.query_by_urls(&[url]).await? {
            Some(persisted) => {
                self.discard_persisted(&persisted).await;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Delete the temp file and rows of a persisted request
    pub(crate) async fn discard_persisted(&self, persisted: &PersistedRequest) {
        info!("Discarding persisted state of request {}", persisted.id);
        remove_file_quietly(&persisted.temp_path).await;
        self.remove_rows(persisted.id).await;
    }

    async fn remove_rows(&self, request_id: u64) {
        if let Err(e) = self.store.remove_blocks(request_id).await {
            warn!("Failed to remove blocks of request {}: {}", request_id, e);
        }
        if let Err(e) = self.store.remove_request(request_id).await {
            warn!("Failed to remove request {}: {}", request_id, e);
        }
    }

    /// Deliver block and request progress
    pub(crate) fn deliver_progress(&self, request: &DownloadRequest, block: &BlockRequest) {
        request.emit(DownloadEvent::BlockProgress {
            request_id: request.id(),
            block: block.block().clone(),
            downloaded: block.downloaded(),
            total: block.block().size(),
        });
        request.emit(DownloadEvent::Progress {
            request_id: request.id(),
            downloaded: request.downloaded_bytes(),
            total: request.total_length().unwrap_or(0),
        });
    }

    /// A block reached its size
    pub(crate) async fn block_completed(&self, request: &Arc<DownloadRequest>, block: &BlockRequest) {
        self.deliver_block_completed(request, block);
        self.try_complete(request).await;
    }

    /// Deliver `BlockCompleted` once per block
    pub(crate) fn deliver_block_completed(&self, request: &DownloadRequest, block: &BlockRequest) {
        if block.latch_delivery() {
            debug!("Block {} of request {} complete", block.index(), request.id());
            request.emit(DownloadEvent::BlockCompleted {
                request_id: request.id(),
                block: block.block().clone(),
            });
        }
    }

    /// A block failed for good
    pub(crate) async fn block_failed(
        &self,
        request: &Arc<DownloadRequest>,
        block: &BlockRequest,
        error: DownloadError,
    ) {
        let error = Arc::new(error);
        if !request.fail_from_block(block, Arc::clone(&error)) {
            debug!(
                "Failure of block {} of request {} superseded: {}",
                block.index(),
                request.id(),
                error
            );
            return;
        }

        error!(
            "Request {} failed in block {}: {}",
            request.id(),
            block.index(),
            error
        );
        self.finished_with_failure(request);
    }

    /// Fail a request before or outside its block transfers
    pub(crate) async fn failed(&self, request: &Arc<DownloadRequest>, error: DownloadError) {
        if request.fail(None, Arc::new(error)) {
            error!("Request {} failed", request.id());
            self.finished_with_failure(request);
        }
    }

    /// Leave the registry once no task of the failed request is left
    ///
    /// Siblings cancelled by the failure still write their final
    /// checkpoint, so a resubmission must not adopt the run before then.
    fn finished_with_failure(&self, request: &Arc<DownloadRequest>) {
        if request.outstanding_tasks() == 0 {
            self.unregister(request);
        }
    }

    /// Finish the request once every block is complete
    ///
    /// Removes the store rows and renames the temp file into place. A failed
    /// rename fails the request instead.
    pub(crate) async fn try_complete(&self, request: &Arc<DownloadRequest>) {
        if !request.begin_finish() {
            return;
        }

        self.remove_rows(request.id()).await;

        let temp_path = request.temp_path();
        let destination = request.destination();
        let renamed = tokio::fs::rename(&temp_path, destination).await;
        self.unregister(request);
        match renamed {
            Ok(()) => {
                request.complete();
                info!(
                    "Request {} completed: {}",
                    request.id(),
                    destination.display()
                );
            }
            Err(e) => {
                warn!(
                    "Rename {} -> {} failed: {}",
                    temp_path.display(),
                    destination.display(),
                    e
                );
                let error = DownloadError::AtomicOperationFailed {
                    temp_path: temp_path.clone(),
                    final_path: destination.to_path_buf(),
                };
                request.fail(None, Arc::new(error));
            }
        }
    }

    /// A queued or running task of `request` has unwound
    pub(crate) async fn task_finished(&self, request: &Arc<DownloadRequest>) {
        if request.task_done() == 0 {
            self.settle_idle(request).await;
        }
    }

    /// Settle a request whose last task unwound
    async fn settle_idle(&self, request: &Arc<DownloadRequest>) {
        match request.state() {
            RequestState::Cancelled => self.settle_cancelled(request).await,
            RequestState::Failed => self.unregister(request),
            _ => {}
        }
    }

    /// Deliver `Cancelled`, clean up when asked, leave the registry
    async fn settle_cancelled(&self, request: &Arc<DownloadRequest>) {
        if !request.settle_cancelled() {
            return;
        }
        if request.cleanup_on_cancel() {
            remove_file_quietly(&request.temp_path()).await;
            self.remove_rows(request.id()).await;
        }
        self.unregister(request);
        info!("Request {} cancelled", request.id());
        request.emit(DownloadEvent::Cancelled {
            request_id: request.id(),
        });
    }

    fn unregister(&self, request: &Arc<DownloadRequest>) {
        let mut registry = self.registry();
        if registry
            .get(request.key().as_str())
            .is_some_and(|r| Arc::ptr_eq(r, request))
        {
            registry.remove(request.key().as_str());
        }
    }

    /// Stop accepting work and cancel in-flight requests
    ///
    /// Cancelled block tasks still write their final checkpoint, so the
    /// persisted rows stay usable for a later resume. Workers still busy
    /// after `grace` are aborted.
    pub async fn shutdown(&self, grace: Duration) {
        info!("Shutting down dispatcher");
        self.prepare_pool.close();
        self.transfer_pool.close();

        let cancelled = self.cancel_all().await;
        if cancelled > 0 {
            info!("Cancelled {} in-flight requests", cancelled);
        }

        self.prepare_pool.join(grace).await;
        self.transfer_pool.join(grace).await;
    }
}

/// One queued or running task of a request
///
/// Dropping the guard without `finish` still counts the task done: a job
/// that panics, is aborted or is refused by its pool never reaches its end.
struct TaskGuard {
    dispatcher: Arc<Dispatcher>,
    request: Arc<DownloadRequest>,
    armed: bool,
}

impl TaskGuard {
    fn new(dispatcher: Arc<Dispatcher>, request: Arc<DownloadRequest>) -> Self {
        request.task_submitted();
        Self {
            dispatcher,
            request,
            armed: true,
        }
    }

    async fn finish(mut self) {
        self.armed = false;
        self.dispatcher.task_finished(&self.request).await;
    }
}

impl Drop for TaskGuard {
    fn drop(&mut self) {
        if !self.armed || self.request.task_done() != 0 {
            return;
        }
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let dispatcher = Arc::clone(&self.dispatcher);
        let request = Arc::clone(&self.request);
        handle.spawn(async move {
            dispatcher.settle_idle(&request).await;
        });
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("in_flight", &self.registry().len())
            .field("prepare_pool", &self.prepare_pool)
            .field("transfer_pool", &self.transfer_pool)
            .field("store", &self.store)
            .finish()
    }
}

/// A pool refusal to deliver as the request's failure
fn refusal_copy(error: &DownloadError) -> DownloadError {
    match error {
        DownloadError::ShuttingDown => DownloadError::ShuttingDown,
        DownloadError::QueueOverflow { capacity } => DownloadError::QueueOverflow {
            capacity: *capacity,
        },
        other => DownloadError::InvalidRequest {
            reason: other.to_string(),
        },
    }
}

/// Canonical URL text, so lookups match the request key
fn normalize(url: &str) -> String {
    Url::parse(url)
        .map(|u| u.to_string())
        .unwrap_or_else(|_| url.to_string())
}

async fn remove_file_quietly(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => debug!("Removed {}", path.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("Failed to remove {}: {}", path.display(), e),
    }
}
