//! The download request state machine
//!
//! A [`DownloadRequest`] is shared between the dispatcher, its preparation
//! task and every block task. State changes and the completion decision run
//! under one mutex per request; counters that only feed progress reporting
//! are read without it.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};

use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::block::BlockRequest;
use super::types::{Priority, RequestKey, RequestState};
use crate::app::block::FileBlock;
use crate::app::events::{DownloadEvent, EventSender};
use crate::app::source::Source;
use crate::errors::DownloadError;

#[derive(Debug)]
struct RequestInner {
    state: RequestState,
    temp_path: PathBuf,
    cleanup_on_cancel: bool,
    /// Completion has been decided and the rename is in progress
    finishing: bool,
}

/// One logical download
#[derive(Debug)]
pub struct DownloadRequest {
    key: RequestKey,
    id: AtomicU64,
    submission: AtomicU64,
    sources: Vec<Source>,
    destination: PathBuf,
    priority: Priority,
    max_retry_times: u32,
    events: Option<EventSender>,
    cancel: CancellationToken,
    total_length: OnceLock<u64>,
    block_size: AtomicU64,
    blocks: OnceLock<Vec<Arc<BlockRequest>>>,
    outstanding: AtomicUsize,
    delivered: AtomicBool,
    inner: Mutex<RequestInner>,
}

impl DownloadRequest {
    pub(crate) fn new(
        id: u64,
        sources: Vec<Source>,
        destination: PathBuf,
        temp_path: PathBuf,
        priority: Priority,
        max_retry_times: u32,
        events: Option<EventSender>,
    ) -> Self {
        Self {
            key: RequestKey::from_sources(&sources),
            id: AtomicU64::new(id),
            submission: AtomicU64::new(0),
            sources,
            destination,
            priority,
            max_retry_times,
            events,
            cancel: CancellationToken::new(),
            total_length: OnceLock::new(),
            block_size: AtomicU64::new(0),
            blocks: OnceLock::new(),
            outstanding: AtomicUsize::new(0),
            delivered: AtomicBool::new(false),
            inner: Mutex::new(RequestInner {
                state: RequestState::New,
                temp_path,
                cleanup_on_cancel: false,
                finishing: false,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, RequestInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn id(&self) -> u64 {
        self.id.load(Ordering::Acquire)
    }

    pub fn key(&self) -> &RequestKey {
        &self.key
    }

    pub fn sources(&self) -> &[Source] {
        &self.sources
    }

    /// Source used for the length query and for every block
    pub fn primary_source(&self) -> &Source {
        // the builder refuses requests without sources
        &self.sources[0]
    }

    pub fn destination(&self) -> &Path {
        &self.destination
    }

    pub fn temp_path(&self) -> PathBuf {
        self.lock().temp_path.clone()
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }

    pub fn max_retry_times(&self) -> u32 {
        self.max_retry_times
    }

    pub fn state(&self) -> RequestState {
        self.lock().state
    }

    pub fn total_length(&self) -> Option<u64> {
        self.total_length.get().copied()
    }

    pub fn block_size(&self) -> u64 {
        self.block_size.load(Ordering::Acquire)
    }

    /// Block states, empty until preparation has planned the request
    pub fn block_requests(&self) -> &[Arc<BlockRequest>] {
        self.blocks.get().map(Vec::as_slice).unwrap_or(&[])
    }

    /// Approximate bytes downloaded across all blocks
    ///
    /// Reads each block counter without the request lock, so the sum is a
    /// snapshot for progress display only and never feeds completion checks.
    pub fn downloaded_bytes(&self) -> u64 {
        self.block_requests().iter().map(|b| b.downloaded()).sum()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub(crate) fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub(crate) fn submission(&self) -> u64 {
        self.submission.load(Ordering::Acquire)
    }

    pub(crate) fn set_submission(&self, seq: u64) {
        self.submission.store(seq, Ordering::Release);
    }

    /// Move to `next` if the state machine allows it
    pub(crate) fn transition(&self, next: RequestState) -> bool {
        let mut inner = self.lock();
        if inner.finishing || !inner.state.can_transition_to(next) {
            return false;
        }
        debug!(
            "Request {} state {} -> {}",
            self.id(),
            inner.state,
            next
        );
        inner.state = next;
        true
    }

    /// Set once from the server's answer
    pub(crate) fn set_total_length(&self, length: u64) -> bool {
        self.total_length.set(length).is_ok()
    }

    /// Take over identity and layout of a persisted earlier run
    pub(crate) fn adopt(&self, id: u64, block_size: u64, temp_path: PathBuf) {
        self.id.store(id, Ordering::Release);
        self.block_size.store(block_size, Ordering::Release);
        self.lock().temp_path = temp_path;
    }

    pub(crate) fn set_block_size(&self, block_size: u64) {
        self.block_size.store(block_size, Ordering::Release);
    }

    /// Install the block plan, only the first call wins
    pub(crate) fn set_block_requests(&self, blocks: Vec<Arc<BlockRequest>>) -> bool {
        self.blocks.set(blocks).is_ok()
    }

    /// Mark cancelled and signal every task of this request
    ///
    /// Returns false when the request already reached a terminal state or is
    /// renaming its file.
    pub(crate) fn request_cancel(&self, cleanup: bool) -> bool {
        {
            let mut inner = self.lock();
            if inner.finishing || inner.state.is_terminal() {
                return false;
            }
            inner.state = RequestState::Cancelled;
            inner.cleanup_on_cancel = cleanup;
        }
        self.cancel.cancel();
        true
    }

    pub fn cleanup_on_cancel(&self) -> bool {
        self.lock().cleanup_on_cancel
    }

    /// Decide completion under the request lock
    ///
    /// True for exactly one caller, once every block is complete and has
    /// taken its delivery latch, so `Completed` follows every
    /// `BlockCompleted`.
    pub(crate) fn begin_finish(&self) -> bool {
        let mut inner = self.lock();
        if inner.finishing
            || inner.state.is_terminal()
            || !inner.state.can_transition_to(RequestState::Completed)
        {
            return false;
        }
        let blocks = self.block_requests();
        if blocks.is_empty() || !blocks.iter().all(|b| b.is_complete() && b.is_delivered()) {
            return false;
        }
        inner.finishing = true;
        true
    }

    /// Deliver completion after a successful rename
    pub(crate) fn complete(&self) -> bool {
        let mut inner = self.lock();
        if !inner.finishing {
            return false;
        }
        inner.finishing = false;
        inner.state = RequestState::Completed;
        if self.latch_delivery() {
            self.emit(DownloadEvent::Completed {
                request_id: self.id(),
            });
        }
        true
    }

    /// Fail the request and deliver `Failed` once
    ///
    /// Also settles a request whose rename failed after `begin_finish`.
    /// Returns false when another outcome was already decided.
    pub(crate) fn fail(&self, block: Option<FileBlock>, error: Arc<DownloadError>) -> bool {
        let mut inner = self.lock();
        if !self.fail_locked(&mut inner, block, error) {
            return false;
        }
        for block in self.block_requests() {
            block.cancel_silently();
        }
        true
    }

    /// Escalate a non-retryable block fault
    ///
    /// Under the request lock: the failing block takes its latch, every
    /// sibling is cancelled without an outcome of its own, `BlockFailed` is
    /// delivered and then the request fails once.
    pub(crate) fn fail_from_block(&self, failing: &BlockRequest, error: Arc<DownloadError>) -> bool {
        let mut inner = self.lock();
        if !failing.latch_delivery() {
            return false;
        }

        for sibling in self.block_requests() {
            if sibling.index() != failing.index() {
                sibling.cancel_silently();
            }
        }

        self.emit(DownloadEvent::BlockFailed {
            request_id: self.id(),
            block: failing.block().clone(),
            error: Arc::clone(&error),
        });

        if inner.finishing {
            return false;
        }
        self.fail_locked(&mut inner, Some(failing.block().clone()), error)
    }

    fn fail_locked(
        &self,
        inner: &mut RequestInner,
        block: Option<FileBlock>,
        error: Arc<DownloadError>,
    ) -> bool {
        if inner.state.is_terminal() {
            return false;
        }
        inner.finishing = false;
        inner.state = RequestState::Failed;
        if self.latch_delivery() {
            self.emit(DownloadEvent::Failed {
                request_id: self.id(),
                block,
                error,
            });
        }
        true
    }

    /// Take the delivery latch of a cancelled request
    ///
    /// The caller delivers `Cancelled` after its cleanup.
    pub(crate) fn settle_cancelled(&self) -> bool {
        let inner = self.lock();
        inner.state == RequestState::Cancelled && self.latch_delivery()
    }

    /// Take the request-level delivery latch; true exactly once
    pub(crate) fn latch_delivery(&self) -> bool {
        !self.delivered.swap(true, Ordering::AcqRel)
    }

    pub(crate) fn task_submitted(&self) {
        self.outstanding.fetch_add(1, Ordering::AcqRel);
    }

    /// Returns the number of tasks still queued or running
    pub(crate) fn task_done(&self) -> usize {
        self.outstanding.fetch_sub(1, Ordering::AcqRel) - 1
    }

    pub(crate) fn outstanding_tasks(&self) -> usize {
        self.outstanding.load(Ordering::Acquire)
    }

    pub(crate) fn emit(&self, event: DownloadEvent) {
        if let Some(tx) = &self.events {
            // a dropped receiver only means nobody is listening
            let _ = tx.send(event);
        }
    }
}
