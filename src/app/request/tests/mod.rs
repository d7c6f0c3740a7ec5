//! Unit tests for request state, identity and latches

use std::path::PathBuf;
use std::sync::Arc;

use super::*;
use crate::app::block::plan_blocks;
use crate::app::events::{event_channel, DownloadEvent};
use crate::errors::DownloadError;

fn request(urls: &[&str]) -> Arc<DownloadRequest> {
    urls.iter()
        .fold(DownloadRequestBuilder::new(7), |b, u| b.http(u))
        .directory("/tmp/dl")
        .file_name("file.bin")
        .build()
        .unwrap()
}

fn with_blocks(request: &Arc<DownloadRequest>, total: u64, count: usize) {
    let (blocks, size) = plan_blocks(request.primary_source(), total, count);
    request.set_block_size(size);
    let states = blocks
        .into_iter()
        .map(|b| Arc::new(BlockRequest::new(b, request, 0)))
        .collect();
    assert!(request.set_block_requests(states));
}

#[test]
fn test_forward_transitions() {
    // Test the happy path through the state machine
    let req = request(&["http://h/a"]);
    assert_eq!(req.state(), RequestState::New);
    for next in [
        RequestState::PrepareQueued,
        RequestState::Preparing,
        RequestState::DownloadQueued,
        RequestState::Downloading,
    ] {
        assert!(req.transition(next), "to {}", next);
        assert_eq!(req.state(), next);
    }
}

#[test]
fn test_illegal_transitions_are_refused() {
    // Test skipping states and leaving terminal states
    let req = request(&["http://h/a"]);
    assert!(!req.transition(RequestState::Downloading));
    assert!(!req.transition(RequestState::Completed));

    assert!(req.transition(RequestState::Failed));
    assert!(!req.transition(RequestState::PrepareQueued));
    assert!(!req.transition(RequestState::Cancelled));
    assert_eq!(req.state(), RequestState::Failed);
}

#[test]
fn test_cancel_from_any_live_state() {
    // Test that cancellation works before and during download
    for steps in 0..4 {
        let req = request(&["http://h/a"]);
        let path = [
            RequestState::PrepareQueued,
            RequestState::Preparing,
            RequestState::DownloadQueued,
        ];
        for s in path.iter().take(steps) {
            assert!(req.transition(*s));
        }
        assert!(req.request_cancel(true));
        assert_eq!(req.state(), RequestState::Cancelled);
        assert!(req.is_cancelled());
        assert!(req.cleanup_on_cancel());
        assert!(!req.request_cancel(false));
    }
}

#[test]
fn test_key_ignores_order_and_duplicates() {
    // Test URL-set identity
    let a = request(&["http://h/a", "http://m/a"]);
    let b = request(&["http://m/a", "http://h/a", "http://m/a"]);
    let c = request(&["http://h/a"]);
    assert_eq!(a.key(), b.key());
    assert_ne!(a.key(), c.key());
    assert!(a.key().overlaps(c.key()));
    assert!(a.key().contains("http://m/a"));
    assert!(!a.key().contains("http://x/a"));
}

#[test]
fn test_priority_ordering_and_parsing() {
    // Test priority order and CLI parsing
    assert!(Priority::High > Priority::Medium);
    assert!(Priority::Medium > Priority::Low);
    assert_eq!(Priority::default(), Priority::Medium);
    assert_eq!("HIGH".parse::<Priority>().unwrap(), Priority::High);
    assert!("urgent".parse::<Priority>().is_err());
}

#[test]
fn test_builder_paths() {
    // Test destination and temp file naming
    let req = request(&["http://h/a"]);
    assert_eq!(req.destination(), PathBuf::from("/tmp/dl/file.bin"));
    assert_eq!(req.temp_path(), PathBuf::from("/tmp/dl/file.bin.tmp"));

    let derived = DownloadRequestBuilder::new(1)
        .http("http://h/dir/archive.tar.gz")
        .directory("/x")
        .build()
        .unwrap();
    assert_eq!(derived.destination(), PathBuf::from("/x/archive.tar.gz"));
}

#[test]
fn test_builder_rejections() {
    // Test invalid requests are refused at build time
    let none = DownloadRequestBuilder::new(1).file_name("f").build();
    assert!(matches!(none, Err(DownloadError::InvalidRequest { .. })));

    let bad_url = DownloadRequestBuilder::new(1).http("::nope::").file_name("f").build();
    assert!(matches!(bad_url, Err(DownloadError::InvalidUrl { .. })));

    let no_name = DownloadRequestBuilder::new(1).http("http://h/").build();
    assert!(matches!(no_name, Err(DownloadError::InvalidRequest { .. })));

    let traversal = DownloadRequestBuilder::new(1)
        .http("http://h/a")
        .file_name("../etc/passwd")
        .build();
    assert!(traversal.is_err());
}

#[test]
fn test_headers_attach_to_last_source() {
    // Test per-source headers
    let req = DownloadRequestBuilder::new(1)
        .http("http://h/a")
        .http("http://m/a")
        .header("Authorization", "Bearer t")
        .build()
        .unwrap();
    let headers = |i: usize| match req.sources()[i].protocol() {
        crate::app::source::Protocol::Http(p) => p.headers.len(),
        _ => usize::MAX,
    };
    assert_eq!(headers(0), 0);
    assert_eq!(headers(1), 1);
}

#[test]
fn test_block_retry_budget() {
    // Test that retries stop at the configured maximum
    let req = request(&["http://h/a"]);
    with_blocks(&req, 100, 1);
    let block = &req.block_requests()[0];

    assert_eq!(block.try_retry(2), Some(1));
    assert_eq!(block.try_retry(2), Some(2));
    assert_eq!(block.try_retry(2), None);
    assert_eq!(block.retry_count(), 2);
}

#[test]
fn test_block_latch_is_one_shot() {
    // Test block delivery latch and silent cancellation
    let req = request(&["http://h/a"]);
    with_blocks(&req, 100, 2);
    let (first, second) = (&req.block_requests()[0], &req.block_requests()[1]);

    assert!(first.latch_delivery());
    assert!(!first.latch_delivery());

    second.cancel_silently();
    assert!(second.is_cancelled());
    assert!(!second.latch_delivery());
    assert!(!req.is_cancelled());
}

#[test]
fn test_request_cancel_reaches_blocks() {
    // Test that the block tokens are children of the request token
    let req = request(&["http://h/a"]);
    with_blocks(&req, 100, 3);
    assert!(req.request_cancel(false));
    assert!(req.block_requests().iter().all(|b| b.is_cancelled()));
}

#[test]
fn test_begin_finish_requires_every_block() {
    // Test the completion decision and its one-shot nature
    let req = request(&["http://h/a"]);
    req.transition(RequestState::PrepareQueued);
    req.transition(RequestState::Preparing);
    req.transition(RequestState::DownloadQueued);
    with_blocks(&req, 10, 2);

    let blocks = req.block_requests();
    blocks[0].advance(blocks[0].block().size());
    assert!(blocks[0].latch_delivery());
    assert!(!req.begin_finish());

    blocks[1].advance(blocks[1].block().size());
    assert_eq!(req.downloaded_bytes(), 10);
    // complete but not yet reported
    assert!(!req.begin_finish());
    assert!(blocks[1].latch_delivery());
    assert!(req.begin_finish());
    assert!(!req.begin_finish());

    // cancelling during the rename is too late
    assert!(!req.request_cancel(false));
    assert!(req.complete());
    assert_eq!(req.state(), RequestState::Completed);
}

#[test]
fn test_resumed_block_offsets() {
    // Test that inherited progress moves the resume offset
    let req = request(&["http://h/a"]);
    let (blocks, _) = plan_blocks(req.primary_source(), 100, 2);
    let block = BlockRequest::new(blocks[1].clone(), &req, 20);
    assert_eq!(block.resume_offset(), 70);
    assert_eq!(block.remaining(), 30);

    let clamped = BlockRequest::new(blocks[0].clone(), &req, 500);
    assert!(clamped.is_complete());
    assert_eq!(clamped.downloaded(), 50);
}

#[test]
fn test_events_reach_receiver() {
    // Test event emission and terminal classification
    let (tx, mut rx) = event_channel();
    let req = DownloadRequestBuilder::new(3)
        .http("http://h/a")
        .events(tx)
        .build()
        .unwrap();
    req.emit(DownloadEvent::Completed { request_id: 3 });
    let event = rx.try_recv().unwrap();
    assert!(event.is_terminal());
    assert_eq!(event.request_id(), 3);

    drop(rx);
    // a closed channel is ignored
    req.emit(DownloadEvent::Cancelled { request_id: 3 });
}

#[test]
fn test_block_failure_escalates_once() {
    // Test sibling cancellation and a single request-level failure
    let (tx, mut rx) = event_channel();
    let req = DownloadRequestBuilder::new(9)
        .http("http://h/a")
        .events(tx)
        .build()
        .unwrap();
    req.transition(RequestState::PrepareQueued);
    with_blocks(&req, 90, 3);

    let blocks = req.block_requests();
    let error = Arc::new(DownloadError::cancelled("test"));
    assert!(req.fail_from_block(&blocks[1], Arc::clone(&error)));
    assert!(!req.fail_from_block(&blocks[1], Arc::clone(&error)));
    // siblings were latched silently
    assert!(!req.fail_from_block(&blocks[0], Arc::clone(&error)));
    assert!(blocks[0].is_cancelled() && blocks[2].is_cancelled());
    assert!(!blocks[1].is_cancelled());
    assert_eq!(req.state(), RequestState::Failed);

    let mut terminal = 0;
    let mut block_failures = 0;
    while let Ok(event) = rx.try_recv() {
        match event {
            DownloadEvent::Failed { block, .. } => {
                assert_eq!(block.map(|b| b.index()), Some(1));
                terminal += 1;
            }
            DownloadEvent::BlockFailed { block, .. } => {
                assert_eq!(block.index(), 1);
                block_failures += 1;
            }
            other => panic!("unexpected event {:?}", other),
        }
    }
    assert_eq!((terminal, block_failures), (1, 1));
}

#[test]
fn test_cancelled_settles_once() {
    // Test that the cancel latch is taken once and only after cancellation
    let req = request(&["http://h/a"]);
    assert!(!req.settle_cancelled());
    assert!(req.request_cancel(true));
    assert!(req.cleanup_on_cancel());
    assert!(req.settle_cancelled());
    assert!(!req.settle_cancelled());
    assert!(!req.fail(None, Arc::new(DownloadError::cancelled("late"))));
    assert_eq!(req.state(), RequestState::Cancelled);
}
