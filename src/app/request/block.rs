//! Runtime state for one block of a request

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use tokio_util::sync::CancellationToken;

use super::core::DownloadRequest;
use crate::app::block::FileBlock;

/// Mutable state of a [`FileBlock`] while its request is in flight
///
/// Holds a non-owning reference to its parent. The cancellation token is a
/// child of the parent's token, so cancelling the request reaches every
/// block, while a block can be cancelled alone when a sibling fails.
#[derive(Debug)]
pub struct BlockRequest {
    block: FileBlock,
    request: Weak<DownloadRequest>,
    downloaded: AtomicU64,
    retries: AtomicU32,
    delivered: AtomicBool,
    cancel: CancellationToken,
}

impl BlockRequest {
    /// Create block state, resuming from `downloaded` bytes
    pub(crate) fn new(block: FileBlock, parent: &Arc<DownloadRequest>, downloaded: u64) -> Self {
        let downloaded = downloaded.min(block.size());
        Self {
            block,
            request: Arc::downgrade(parent),
            downloaded: AtomicU64::new(downloaded),
            retries: AtomicU32::new(0),
            delivered: AtomicBool::new(false),
            cancel: parent.cancel_token().child_token(),
        }
    }

    pub fn block(&self) -> &FileBlock {
        &self.block
    }

    pub fn index(&self) -> u32 {
        self.block.index()
    }

    /// Parent request, if it is still alive
    pub fn request(&self) -> Option<Arc<DownloadRequest>> {
        self.request.upgrade()
    }

    pub fn downloaded(&self) -> u64 {
        self.downloaded.load(Ordering::Acquire)
    }

    /// Record `bytes` written to disk and return the new total
    pub(crate) fn advance(&self, bytes: u64) -> u64 {
        self.downloaded.fetch_add(bytes, Ordering::AcqRel) + bytes
    }

    /// Forget bytes past `downloaded` that never reached the disk
    pub(crate) fn rewind(&self, downloaded: u64) {
        self.downloaded.fetch_min(downloaded, Ordering::AcqRel);
    }

    /// Bytes still missing
    pub fn remaining(&self) -> u64 {
        self.block.size().saturating_sub(self.downloaded())
    }

    /// Absolute file offset the next transfer starts at
    pub fn resume_offset(&self) -> u64 {
        self.block.start() + self.downloaded()
    }

    pub fn is_complete(&self) -> bool {
        self.downloaded() >= self.block.size()
    }

    pub fn retry_count(&self) -> u32 {
        self.retries.load(Ordering::Acquire)
    }

    /// Consume one retry if fewer than `max` were used
    pub(crate) fn try_retry(&self, max: u32) -> Option<u32> {
        self.retries
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < max).then_some(n + 1)
            })
            .ok()
            .map(|prev| prev + 1)
    }

    /// Take the delivery latch; true exactly once
    pub(crate) fn latch_delivery(&self) -> bool {
        !self.delivered.swap(true, Ordering::AcqRel)
    }

    pub fn is_delivered(&self) -> bool {
        self.delivered.load(Ordering::Acquire)
    }

    /// Stop this block without ever delivering an outcome for it
    pub(crate) fn cancel_silently(&self) {
        self.delivered.store(true, Ordering::Release);
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub(crate) fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }
}
