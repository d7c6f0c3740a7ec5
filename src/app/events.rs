//! Download events delivered to the caller
//!
//! Each request may carry an unbounded sender registered when the request is
//! built. Progress events are best-effort snapshots; terminal events are
//! guarded by delivery latches, so exactly one of `Completed`, `Failed` or
//! `Cancelled` is sent per request and at most one of `BlockCompleted` or
//! `BlockFailed` per block.

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::app::block::FileBlock;
use crate::errors::DownloadError;

/// Events emitted while a request runs
#[derive(Debug, Clone)]
pub enum DownloadEvent {
    /// Approximate request-wide progress
    Progress {
        request_id: u64,
        downloaded: u64,
        total: u64,
    },
    /// Progress of a single block
    ///
    /// Both counts are local to the block: `total` is the block size, not
    /// the file length carried by `Progress`.
    BlockProgress {
        request_id: u64,
        block: FileBlock,
        downloaded: u64,
        total: u64,
    },
    /// File renamed to its destination
    Completed { request_id: u64 },
    /// One block finished
    BlockCompleted { request_id: u64, block: FileBlock },
    /// Request failed, `block` is set when a block fault caused it
    Failed {
        request_id: u64,
        block: Option<FileBlock>,
        error: Arc<DownloadError>,
    },
    /// One block failed for good
    BlockFailed {
        request_id: u64,
        block: FileBlock,
        error: Arc<DownloadError>,
    },
    /// Request was cancelled and all its tasks have unwound
    Cancelled { request_id: u64 },
}

impl DownloadEvent {
    /// Whether this is a request-level terminal event
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            DownloadEvent::Completed { .. }
                | DownloadEvent::Failed { .. }
                | DownloadEvent::Cancelled { .. }
        )
    }

    pub fn request_id(&self) -> u64 {
        match self {
            DownloadEvent::Progress { request_id, .. }
            | DownloadEvent::BlockProgress { request_id, .. }
            | DownloadEvent::Completed { request_id }
            | DownloadEvent::BlockCompleted { request_id, .. }
            | DownloadEvent::Failed { request_id, .. }
            | DownloadEvent::BlockFailed { request_id, .. }
            | DownloadEvent::Cancelled { request_id } => *request_id,
        }
    }
}

/// Sending half registered on a request
pub type EventSender = mpsc::UnboundedSender<DownloadEvent>;

/// Receiving half kept by the caller
pub type EventReceiver = mpsc::UnboundedReceiver<DownloadEvent>;

/// Create an event channel for one or more requests
pub fn event_channel() -> (EventSender, EventReceiver) {
    mpsc::unbounded_channel()
}
