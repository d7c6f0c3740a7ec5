//! Block transfer task
//!
//! Streams one block from its source into the shared temp file at the
//! block's offset. Blocks own disjoint ranges, so each task opens its own
//! handle and writes without locking. Progress becomes durable at
//! checkpoints: buffered output is flushed and synced, then the byte count
//! is stored when the server honours ranges. A final checkpoint is taken on
//! every exit path.

use std::io::SeekFrom;
use std::sync::Arc;

use chrono::Utc;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncSeekExt, AsyncWriteExt, BufWriter};
use tracing::{debug, warn};

use super::checkpoint::CheckpointPolicy;
use crate::app::client::{ByteStream, TransferClient};
use crate::app::dispatcher::Dispatcher;
use crate::app::request::{BlockRequest, DownloadRequest, RequestState};
use crate::app::store::BlockId;
use crate::errors::{DownloadError, DownloadResult};

/// Transfer `block` and report the outcome to the dispatcher
pub(crate) async fn run(
    dispatcher: &Arc<Dispatcher>,
    request: &Arc<DownloadRequest>,
    block: &Arc<BlockRequest>,
) {
    let error = match transfer(dispatcher, request, block).await {
        Ok(()) => {
            dispatcher.block_completed(request, block).await;
            return;
        }
        Err(e) => e,
    };

    if error.is_cancellation() || block.is_cancelled() {
        debug!(
            "Block {} of request {} stopped: {}",
            block.index(),
            request.id(),
            error
        );
        return;
    }

    if error.is_retryable() {
        if let Some(attempt) = block.try_retry(request.max_retry_times()) {
            warn!(
                "Block {} of request {} failed at byte {}, retry {}/{}: {}",
                block.index(),
                request.id(),
                block.resume_offset(),
                attempt,
                request.max_retry_times(),
                error
            );
            match dispatcher.enqueue_block(block) {
                Ok(()) => return,
                Err(_) if block.is_cancelled() => return,
                Err(e) => {
                    dispatcher.block_failed(request, block, e).await;
                    return;
                }
            }
        }
    }

    dispatcher.block_failed(request, block, error).await;
}

async fn transfer(
    dispatcher: &Dispatcher,
    request: &DownloadRequest,
    block: &BlockRequest,
) -> DownloadResult<()> {
    ensure_live(block)?;
    request.transition(RequestState::Downloading);

    if block.is_complete() {
        return Ok(());
    }

    let source = block.block().source();
    let mut client = dispatcher
        .factory()
        .create(source, block.cancel_token().child_token())?;

    let result = stream_block(dispatcher, request, block, client.as_mut()).await;
    client.close().await;
    result?;

    if !block.is_complete() {
        return Err(DownloadError::IncompleteBlock {
            index: block.index(),
            received: block.downloaded(),
            expected: block.block().size(),
        });
    }
    Ok(())
}

async fn stream_block(
    dispatcher: &Dispatcher,
    request: &DownloadRequest,
    block: &BlockRequest,
    client: &mut dyn TransferClient,
) -> DownloadResult<()> {
    let offset = block.resume_offset();
    let source = block.block().source();
    client
        .connect(source, offset, Some(block.block().end()))
        .await?;
    let resume_supported = client.is_resume_supported();
    let mut stream = client.stream()?;

    let temp_path = request.temp_path();
    let mut file = OpenOptions::new().write(true).open(&temp_path).await?;
    file.seek(SeekFrom::Start(offset)).await?;

    let config = dispatcher.config();
    let mut writer = BufWriter::with_capacity(config.buffer_size, file);
    let mut policy = CheckpointPolicy::new(
        config.checkpoint_bytes,
        config.checkpoint_interval,
        block.downloaded(),
    );

    debug!(
        "Block {} of request {} streaming from byte {} to {}",
        block.index(),
        request.id(),
        offset,
        block.block().end()
    );

    let pumped = pump(
        dispatcher,
        request,
        block,
        &mut stream,
        &mut writer,
        &mut policy,
        resume_supported,
    )
    .await;

    // taken on every exit so a resume never trusts unflushed bytes
    let last = checkpoint(
        dispatcher,
        request,
        block,
        &mut writer,
        &mut policy,
        resume_supported,
    )
    .await;
    if let Err(e) = &last {
        warn!(
            "Final checkpoint of block {} of request {} failed, back to {} bytes: {}",
            block.index(),
            request.id(),
            policy.durable(),
            e
        );
        block.rewind(policy.durable());
    }
    pumped.and(last)
}

async fn pump(
    dispatcher: &Dispatcher,
    request: &DownloadRequest,
    block: &BlockRequest,
    stream: &mut ByteStream,
    writer: &mut BufWriter<File>,
    policy: &mut CheckpointPolicy,
    resume_supported: bool,
) -> DownloadResult<()> {
    let mut buf = vec![0u8; dispatcher.config().buffer_size];

    while !block.is_complete() {
        ensure_live(block)?;
        let read = stream.read(&mut buf).await?;
        if read == 0 {
            break;
        }

        // a server sending past the range must not spill into the next block
        let take = (read as u64).min(block.remaining()) as usize;
        ensure_live(block)?;
        writer.write_all(&buf[..take]).await?;
        block.advance(take as u64);
        dispatcher.deliver_progress(request, block);

        policy.record(take as u64);
        if policy.is_due() {
            checkpoint(dispatcher, request, block, writer, policy, resume_supported).await?;
        }
    }
    Ok(())
}

/// Flush and sync the file, then store the block's progress
async fn checkpoint(
    dispatcher: &Dispatcher,
    request: &DownloadRequest,
    block: &BlockRequest,
    writer: &mut BufWriter<File>,
    policy: &mut CheckpointPolicy,
    resume_supported: bool,
) -> DownloadResult<()> {
    writer.flush().await?;
    writer.get_ref().sync_all().await?;
    policy.mark(block.downloaded());

    if resume_supported {
        let id = BlockId::new(request.id(), block.index());
        if let Err(e) = dispatcher
            .store()
            .update_block_progress(id, block.downloaded(), Utc::now())
            .await
        {
            warn!("Failed to store checkpoint of block {}: {}", id, e);
        }
    }

    debug!(
        "Checkpoint block {} of request {} at {} bytes",
        block.index(),
        request.id(),
        block.downloaded()
    );
    Ok(())
}

fn ensure_live(block: &BlockRequest) -> DownloadResult<()> {
    if block.is_cancelled() {
        return Err(DownloadError::cancelled(format!("block {}", block.index())));
    }
    Ok(())
}
