//! Preparation of a download request
//!
//! Runs once per request on the single preparation worker: resolves the
//! remote length, decides between resuming a persisted run and planning a
//! fresh one, creates the temp file, persists the plan and queues every
//! incomplete block.

use std::path::Path;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::app::block::{block_count, is_partition, plan_blocks, FileBlock};
use crate::app::dispatcher::Dispatcher;
use crate::app::request::{BlockRequest, DownloadRequest, RequestState};
use crate::app::store::PersistedRequest;
use crate::errors::{DownloadError, DownloadResult};

/// Blocks to create, with the bytes each already holds
type Plan = Vec<(FileBlock, u64)>;

/// Prepare `request`, failing it on any non-cancellation error
pub(crate) async fn run(dispatcher: &Arc<Dispatcher>, request: &Arc<DownloadRequest>) {
    match prepare(dispatcher, request).await {
        Ok(()) => {}
        Err(e) if e.is_cancellation() || request.is_cancelled() => {
            debug!("Preparation of request {} stopped: {}", request.id(), e);
        }
        Err(e) => dispatcher.failed(request, e).await,
    }
}

fn ensure_live(request: &DownloadRequest) -> DownloadResult<()> {
    if request.is_cancelled() {
        return Err(DownloadError::cancelled(format!(
            "request {} during preparation",
            request.id()
        )));
    }
    Ok(())
}

async fn prepare(dispatcher: &Arc<Dispatcher>, request: &Arc<DownloadRequest>) -> DownloadResult<()> {
    ensure_live(request)?;
    request.transition(RequestState::Preparing);

    let destination = request.destination();
    if tokio::fs::try_exists(destination).await? {
        return Err(DownloadError::DestinationExists {
            path: destination.to_path_buf(),
        });
    }

    let source = request.primary_source();
    let mut client = dispatcher
        .factory()
        .create(source, request.cancel_token().child_token())?;
    let queried = client.query_length(source).await;
    let resume_supported = client.is_resume_supported();
    client.close().await;
    let total_length = queried?;
    ensure_live(request)?;

    let inherited = inherit(dispatcher, request, total_length, resume_supported).await?;
    ensure_live(request)?;

    request.set_total_length(total_length);
    let temp_path = request.temp_path();
    create_temp_file(&temp_path, inherited.is_none()).await?;

    let plan = match inherited {
        Some(plan) => plan,
        None => {
            let config = dispatcher.config();
            let count = block_count(
                total_length,
                resume_supported,
                config.min_block_size,
                config.threads_per_request,
                config.max_block_count,
            );
            let (blocks, block_size) = plan_blocks(source, total_length, count);
            request.set_block_size(block_size);
            blocks.into_iter().map(|b| (b, 0)).collect()
        }
    };

    let blocks: Vec<_> = plan
        .into_iter()
        .map(|(block, downloaded)| Arc::new(BlockRequest::new(block, request, downloaded)))
        .collect();
    let block_total = blocks.len();
    if !request.set_block_requests(blocks) {
        return Err(DownloadError::InvalidRequest {
            reason: format!("request {} was planned twice", request.id()),
        });
    }

    let snapshot = PersistedRequest::from_request(request);
    let store = dispatcher.store();
    store.upsert_request(&snapshot).await?;
    store.upsert_blocks(&snapshot).await?;

    ensure_live(request)?;
    request.transition(RequestState::DownloadQueued);

    let mut queued = 0;
    for block in request.block_requests() {
        if block.is_complete() {
            dispatcher.deliver_block_completed(request, block);
            continue;
        }
        ensure_live(request)?;
        dispatcher.enqueue_block(block)?;
        queued += 1;
    }

    info!(
        "Request {} prepared: {} bytes in {} blocks, {} queued{}",
        request.id(),
        total_length,
        block_total,
        queued,
        if resume_supported { "" } else { " (no range support)" }
    );

    if queued == 0 {
        dispatcher.try_complete(request).await;
    }
    Ok(())
}

/// Adopt a persisted run of the same download, if it is still usable
///
/// A persisted run is dropped, with its temp file and rows, when its temp
/// file is gone, the remote length changed, the server no longer honours
/// ranges or its blocks do not cover the file exactly.
async fn inherit(
    dispatcher: &Dispatcher,
    request: &DownloadRequest,
    total_length: u64,
    resume_supported: bool,
) -> DownloadResult<Option<Plan>> {
    let store = dispatcher.store();
    let Some(persisted) = store.query_by_urls(request.key().urls()).await? else {
        return Ok(None);
    };

    let reason = if !tokio::fs::try_exists(&persisted.temp_path).await? {
        Some("temp file is missing".to_string())
    } else if persisted.total_length != total_length {
        Some(format!(
            "length changed from {} to {}",
            persisted.total_length, total_length
        ))
    } else if !resume_supported {
        Some("server does not support ranges".to_string())
    } else if !is_partition(
        persisted.blocks.iter().map(|b| (b.start, b.end)),
        total_length,
    ) {
        Some("persisted blocks do not cover the file".to_string())
    } else {
        None
    };

    if let Some(reason) = reason {
        warn!(
            "Not resuming request {} for {}: {}",
            persisted.id,
            request.key(),
            reason
        );
        dispatcher.discard_persisted(&persisted).await;
        return Ok(None);
    }

    let source = request.primary_source();
    let plan: Plan = persisted
        .blocks
        .iter()
        .map(|b| {
            (
                FileBlock::new(source.clone(), b.index, b.start, b.end),
                b.downloaded_bytes,
            )
        })
        .collect();

    info!(
        "Resuming request {} with {} of {} bytes on disk",
        persisted.id,
        persisted.downloaded_bytes(),
        total_length
    );
    request.adopt(persisted.id, persisted.block_size, persisted.temp_path.clone());
    Ok(Some(plan))
}

/// Open the temp file, emptying it unless a persisted run is adopted
///
/// A leftover file without rows may be longer than the new download and
/// would otherwise leave its tail in the result.
async fn create_temp_file(path: &Path, fresh: bool) -> DownloadResult<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(fresh)
        .open(path)
        .await?;
    Ok(())
}
