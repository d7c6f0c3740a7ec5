//! Tests for the task pools and the dispatcher
//!
//! Dispatcher tests run against an in-memory transfer client so that range
//! support, transport faults and stalls can be scripted per test.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream;
use tempfile::TempDir;
use tokio::sync::{oneshot, Barrier, Notify};
use tokio_util::sync::CancellationToken;

use super::*;
use crate::app::client::{ByteStream, ClientFactory, TransferClient};
use crate::app::events::{event_channel, DownloadEvent, EventReceiver};
use crate::app::request::{DownloadRequest, DownloadRequestBuilder, Priority, RequestState};
use crate::app::source::Source;
use crate::app::store::{DownloadStore, MemoryStore, NoStore, PersistedRequest};
use crate::errors::{DownloadError, DownloadResult};

const URL: &str = "http://mem.test/file.bin";

// ---------------------------------------------------------------------------
// Pools
// ---------------------------------------------------------------------------

fn pool(min: usize, max: usize, capacity: usize) -> TaskPool {
    TaskPool::start(PoolConfig {
        name: "test",
        min_workers: min,
        max_workers: max,
        keep_alive: Duration::from_millis(50),
        capacity,
    })
}

/// Occupy the only worker until the returned sender fires
async fn block_worker(pool: &TaskPool) -> oneshot::Sender<()> {
    let (started_tx, started_rx) = oneshot::channel();
    let (release_tx, release_rx) = oneshot::channel::<()>();
    pool.submit(TaskKey::new(Priority::High, 0, 0), async move {
        let _ = started_tx.send(());
        let _ = release_rx.await;
    })
    .unwrap();
    started_rx.await.unwrap();
    release_tx
}

#[test]
fn test_task_key_ordering() {
    // Test priority first, then submission order, then block index
    let high_late = TaskKey::new(Priority::High, 9, 0);
    let low_early = TaskKey::new(Priority::Low, 1, 0);
    assert!(high_late > low_early);

    let first = TaskKey::new(Priority::Medium, 1, 3);
    let second = TaskKey::new(Priority::Medium, 2, 0);
    assert!(first > second);

    let block0 = TaskKey::new(Priority::Medium, 1, 0);
    assert!(block0 > first);
}

#[tokio::test]
async fn test_pool_dequeues_by_priority() {
    // Test that queued tasks run in key order
    let pool = pool(1, 1, 0);
    let release = block_worker(&pool).await;

    let order = Arc::new(Mutex::new(Vec::new()));
    let (done_tx, mut done_rx) = tokio::sync::mpsc::unbounded_channel();
    let keys = [
        ("low", TaskKey::new(Priority::Low, 1, 0)),
        ("high-3", TaskKey::new(Priority::High, 3, 0)),
        ("medium", TaskKey::new(Priority::Medium, 2, 0)),
        ("high-2-b1", TaskKey::new(Priority::High, 2, 1)),
        ("high-2-b0", TaskKey::new(Priority::High, 2, 0)),
    ];
    for (name, key) in keys {
        let order = Arc::clone(&order);
        let done = done_tx.clone();
        pool.submit(key, async move {
            order.lock().unwrap().push(name);
            let _ = done.send(());
        })
        .unwrap();
    }

    release.send(()).unwrap();
    for _ in 0..keys.len() {
        done_rx.recv().await.unwrap();
    }
    assert_eq!(
        *order.lock().unwrap(),
        vec!["high-2-b0", "high-2-b1", "high-3", "medium", "low"]
    );
}

#[tokio::test]
async fn test_equal_keys_run_in_queue_order() {
    // Test the FIFO tie-break for identical keys
    let pool = pool(1, 1, 0);
    let release = block_worker(&pool).await;

    let order = Arc::new(Mutex::new(Vec::new()));
    let (done_tx, mut done_rx) = tokio::sync::mpsc::unbounded_channel();
    for i in 0..4 {
        let order = Arc::clone(&order);
        let done = done_tx.clone();
        pool.submit(TaskKey::new(Priority::Medium, 5, 0), async move {
            order.lock().unwrap().push(i);
            let _ = done.send(());
        })
        .unwrap();
    }

    release.send(()).unwrap();
    for _ in 0..4 {
        done_rx.recv().await.unwrap();
    }
    assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3]);
}

#[tokio::test]
async fn test_pool_capacity_and_close() {
    // Test queue overflow and refusal after close
    let pool = pool(1, 1, 1);
    let release = block_worker(&pool).await;

    pool.submit(TaskKey::new(Priority::Low, 1, 0), async {}).unwrap();
    let overflow = pool.submit(TaskKey::new(Priority::Low, 2, 0), async {});
    assert!(matches!(
        overflow,
        Err(DownloadError::QueueOverflow { capacity: 1 })
    ));
    assert_eq!(pool.queued(), 1);

    pool.close();
    let closed = pool.submit(TaskKey::new(Priority::Low, 3, 0), async {});
    assert!(matches!(closed, Err(DownloadError::ShuttingDown)));

    release.send(()).unwrap();
    pool.join(Duration::from_secs(5)).await;
    assert_eq!(pool.queued(), 0);
    assert_eq!(pool.workers(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_pool_grows_to_max_and_shrinks_to_min() {
    // Test growth under load and keep-alive expiry of extra workers
    let pool = pool(1, 3, 0);
    let barrier = Arc::new(Barrier::new(3));
    let (done_tx, mut done_rx) = tokio::sync::mpsc::unbounded_channel();
    for i in 0..3 {
        let barrier = Arc::clone(&barrier);
        let done = done_tx.clone();
        pool.submit(TaskKey::new(Priority::Medium, i, 0), async move {
            // only completes when three tasks run at once
            barrier.wait().await;
            let _ = done.send(());
        })
        .unwrap();
    }

    for _ in 0..3 {
        tokio::time::timeout(Duration::from_secs(5), done_rx.recv())
            .await
            .expect("tasks should run concurrently")
            .unwrap();
    }
    assert!(pool.workers() <= 3);

    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(pool.workers(), 1);
}

#[tokio::test]
async fn test_panicking_task_keeps_worker() {
    // Test that a panic does not take the worker down
    let pool = pool(1, 1, 0);
    pool.submit(TaskKey::new(Priority::High, 1, 0), async {
        panic!("boom");
    })
    .unwrap();

    let (tx, rx) = oneshot::channel();
    pool.submit(TaskKey::new(Priority::Low, 2, 0), async move {
        let _ = tx.send(());
    })
    .unwrap();
    tokio::time::timeout(Duration::from_secs(5), rx)
        .await
        .unwrap()
        .unwrap();
}

// ---------------------------------------------------------------------------
// Dispatcher
// ---------------------------------------------------------------------------

/// How the in-memory server behaves
#[derive(Debug, Default)]
struct Script {
    ranges: bool,
    /// Connections that drop halfway through their range
    failures: AtomicU32,
    /// Length queries hang until cancelled
    stall: bool,
    /// Connections at this offset get a server error
    reject: Option<u64>,
    /// Connections at this offset wait for `release`
    hold: Option<u64>,
    release: Notify,
    /// Connecting panics
    panic_on_connect: bool,
    connects: Mutex<Vec<(u64, Option<u64>)>>,
}

#[derive(Debug)]
struct MemoryFactory {
    content: Arc<Vec<u8>>,
    script: Arc<Script>,
}

impl ClientFactory for MemoryFactory {
    fn create(
        &self,
        _source: &Source,
        cancel: CancellationToken,
    ) -> DownloadResult<Box<dyn TransferClient>> {
        Ok(Box::new(MemoryClient {
            content: Arc::clone(&self.content),
            script: Arc::clone(&self.script),
            cancel,
            range: None,
            fail: false,
            resume_supported: false,
        }))
    }
}

struct MemoryClient {
    content: Arc<Vec<u8>>,
    script: Arc<Script>,
    cancel: CancellationToken,
    range: Option<(usize, usize)>,
    fail: bool,
    resume_supported: bool,
}

#[async_trait]
impl TransferClient for MemoryClient {
    async fn query_length(&mut self, _source: &Source) -> DownloadResult<u64> {
        if self.script.stall {
            self.cancel.cancelled().await;
            return Err(DownloadError::cancelled("stalled query"));
        }
        self.resume_supported = self.script.ranges;
        Ok(self.content.len() as u64)
    }

    async fn connect(
        &mut self,
        _source: &Source,
        start: u64,
        end: Option<u64>,
    ) -> DownloadResult<()> {
        self.script.connects.lock().unwrap().push((start, end));
        if self.script.panic_on_connect {
            panic!("client bug");
        }
        if self.script.reject == Some(start) {
            return Err(DownloadError::ServerError {
                status: 500,
                url: URL.to_string(),
            });
        }
        if self.script.hold == Some(start) {
            self.script.release.notified().await;
        }
        self.resume_supported = self.script.ranges;
        if !self.script.ranges && start > 0 {
            return Err(DownloadError::RangeIgnored {
                url: URL.to_string(),
                offset: start,
            });
        }

        let last = self.content.len() - 1;
        self.range = Some(if self.script.ranges {
            (start as usize, end.map_or(last, |e| e as usize))
        } else {
            (0, last)
        });
        self.fail = self
            .script
            .failures
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
            .is_ok();
        Ok(())
    }

    fn stream(&mut self) -> DownloadResult<ByteStream> {
        let (start, end) = self.range.take().ok_or_else(|| DownloadError::InvalidRequest {
            reason: "not connected".to_string(),
        })?;
        let body = Bytes::copy_from_slice(&self.content[start..=end]);

        let chunks: Vec<std::io::Result<Bytes>> = if self.fail {
            let half = body.len() / 2;
            vec![
                Ok(body.slice(..half)),
                Err(std::io::Error::new(
                    std::io::ErrorKind::ConnectionReset,
                    "connection reset",
                )),
            ]
        } else {
            body.chunks(1000).map(|c| Ok(Bytes::copy_from_slice(c))).collect()
        };
        Ok(ByteStream::from_chunks(
            stream::iter(chunks),
            self.cancel.clone(),
            None,
        ))
    }

    fn is_resume_supported(&self) -> bool {
        self.resume_supported
    }

    fn cancel(&self) {
        self.cancel.cancel();
    }

    async fn close(&mut self) {
        self.range = None;
    }
}

struct Harness {
    dispatcher: Arc<Dispatcher>,
    script: Arc<Script>,
    content: Arc<Vec<u8>>,
    dir: TempDir,
}

fn harness(len: usize, script: Script, store: Arc<dyn DownloadStore>) -> Harness {
    let content: Arc<Vec<u8>> = Arc::new((0..len).map(|i| (i % 251) as u8).collect());
    let script = Arc::new(script);
    let factory = Arc::new(MemoryFactory {
        content: Arc::clone(&content),
        script: Arc::clone(&script),
    });
    let config = DownloaderConfigBuilder::from_config(ConfigPresets::testing())
        .min_block_size(1024)
        .threads_per_request(2)
        .build()
        .unwrap();
    Harness {
        dispatcher: Dispatcher::new(config, store, factory),
        script,
        content,
        dir: TempDir::new().unwrap(),
    }
}

impl Harness {
    fn request(&self, id: u64) -> (Arc<DownloadRequest>, EventReceiver) {
        let (tx, rx) = event_channel();
        let request = DownloadRequestBuilder::new(id)
            .http(URL)
            .directory(self.dir.path())
            .file_name("file.bin")
            .events(tx)
            .build()
            .unwrap();
        (request, rx)
    }
}

/// Collect events up to and including the terminal one
async fn until_terminal(rx: &mut EventReceiver) -> Vec<DownloadEvent> {
    let mut events = Vec::new();
    loop {
        let event = tokio::time::timeout(Duration::from_secs(10), rx.recv())
            .await
            .expect("terminal event in time")
            .expect("channel open");
        let terminal = event.is_terminal();
        events.push(event);
        if terminal {
            return events;
        }
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_single_block_without_range_support() {
    // Test that a 200-only server gets one block and completes once
    let h = harness(10_000, Script::default(), Arc::new(NoStore));
    let (request, mut rx) = h.request(1);
    assert!(h.dispatcher.enqueue(&request).unwrap());

    let events = until_terminal(&mut rx).await;
    assert!(matches!(events.last(), Some(DownloadEvent::Completed { .. })));
    assert_eq!(request.block_requests().len(), 1);
    assert_eq!(request.state(), RequestState::Completed);

    let written = std::fs::read(request.destination()).unwrap();
    assert_eq!(written, *h.content);
    assert!(!request.temp_path().exists());
    assert!(h.dispatcher.in_flight().is_empty());
    assert_eq!(*h.script.connects.lock().unwrap(), vec![(0, Some(9_999))]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_ranges_split_into_blocks() {
    // Test that a range-capable server gets the configured block count
    let script = Script {
        ranges: true,
        ..Script::default()
    };
    let h = harness(10_000, script, Arc::new(NoStore));
    let (request, mut rx) = h.request(2);
    h.dispatcher.enqueue(&request).unwrap();

    let events = until_terminal(&mut rx).await;
    assert!(matches!(events.last(), Some(DownloadEvent::Completed { .. })));

    let completed_blocks = events
        .iter()
        .filter(|e| matches!(e, DownloadEvent::BlockCompleted { .. }))
        .count();
    assert_eq!(completed_blocks, 2);
    assert_eq!(request.block_size(), 5_000);

    // block progress counts against the block, request progress the file
    for event in &events {
        match event {
            DownloadEvent::BlockProgress { total, .. } => assert_eq!(*total, 5_000),
            DownloadEvent::Progress { total, .. } => assert_eq!(*total, 10_000),
            _ => {}
        }
    }

    let mut connects = h.script.connects.lock().unwrap().clone();
    connects.sort();
    assert_eq!(connects, vec![(0, Some(4_999)), (5_000, Some(9_999))]);
    assert_eq!(std::fs::read(request.destination()).unwrap(), *h.content);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_transport_faults_are_retried_from_offset() {
    // Test retry-then-succeed resuming where the dropped connection stopped
    let script = Script {
        ranges: true,
        failures: AtomicU32::new(2),
        ..Script::default()
    };
    let h = harness(4_000, script, Arc::new(NoStore));
    let (request, mut rx) = h.request(3);
    h.dispatcher.enqueue(&request).unwrap();

    let events = until_terminal(&mut rx).await;
    assert!(matches!(events.last(), Some(DownloadEvent::Completed { .. })));
    assert!(!events
        .iter()
        .any(|e| matches!(e, DownloadEvent::BlockFailed { .. })));
    assert_eq!(std::fs::read(request.destination()).unwrap(), *h.content);

    // every retry resumed past the bytes already written
    let connects = h.script.connects.lock().unwrap().clone();
    assert_eq!(connects.len(), 4);
    assert!(connects.iter().any(|(start, _)| *start != 0 && *start != 2_000));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_retry_exhaustion_fails_once() {
    // Test that persistent faults fail the request exactly once
    let script = Script {
        ranges: true,
        failures: AtomicU32::new(u32::MAX),
        ..Script::default()
    };
    let h = harness(4_000, script, Arc::new(NoStore));
    let (request, mut rx) = h.request(4);
    h.dispatcher.enqueue(&request).unwrap();

    let events = until_terminal(&mut rx).await;
    let Some(DownloadEvent::Failed { block, error, .. }) = events.last() else {
        panic!("expected failure, got {:?}", events.last());
    };
    assert!(block.is_some());
    assert!(error.is_retryable());
    assert_eq!(request.state(), RequestState::Failed);

    // no second terminal event arrives
    tokio::time::sleep(Duration::from_millis(200)).await;
    while let Ok(event) = rx.try_recv() {
        assert!(!event.is_terminal(), "second terminal event {:?}", event);
    }
    assert!(request.temp_path().exists());
    assert!(!request.destination().exists());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_duplicate_and_cancel_with_cleanup() {
    // Test de-duplication by URL set and cancellation settling once
    let script = Script {
        stall: true,
        ..Script::default()
    };
    let store = Arc::new(MemoryStore::new());
    let h = harness(1_000, script, store);
    let (first, mut rx) = h.request(5);
    let (second, _rx2) = h.request(6);

    assert!(h.dispatcher.enqueue(&first).unwrap());
    assert!(!h.dispatcher.enqueue(&second).unwrap());
    assert_eq!(second.state(), RequestState::New);
    assert_eq!(h.dispatcher.in_flight().len(), 1);

    assert_eq!(h.dispatcher.cancel("http://mem.test/other").await, 0);
    assert!(h.dispatcher.clean(URL).await.unwrap());

    let events = until_terminal(&mut rx).await;
    assert!(matches!(
        events.last(),
        Some(DownloadEvent::Cancelled { request_id: 5 })
    ));
    assert_eq!(first.state(), RequestState::Cancelled);
    assert!(h.dispatcher.in_flight().is_empty());
    assert!(!first.temp_path().exists());

    // already settled
    assert!(!h.dispatcher.cancel_request(&first, false).await);
}

#[tokio::test]
async fn test_cancel_unsubmitted_request_settles_immediately() {
    // Test that nothing outstanding means an immediate Cancelled
    let h = harness(100, Script::default(), Arc::new(NoStore));
    let (request, mut rx) = h.request(7);
    assert!(h.dispatcher.cancel_request(&request, false).await);
    assert!(matches!(
        rx.try_recv(),
        Ok(DownloadEvent::Cancelled { request_id: 7 })
    ));

    // a cancelled request cannot be submitted
    assert!(h.dispatcher.enqueue(&request).is_err());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_existing_destination_fails_preparation() {
    // Test that a finished file is never overwritten
    let h = harness(100, Script::default(), Arc::new(NoStore));
    let (request, mut rx) = h.request(8);
    std::fs::write(request.destination(), b"done").unwrap();
    h.dispatcher.enqueue(&request).unwrap();

    let events = until_terminal(&mut rx).await;
    match events.last() {
        Some(DownloadEvent::Failed { block, error, .. }) => {
            assert!(block.is_none());
            assert!(matches!(**error, DownloadError::DestinationExists { .. }));
        }
        other => panic!("expected failure, got {:?}", other),
    }
    assert_eq!(std::fs::read(request.destination()).unwrap(), b"done");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_resume_adopts_persisted_progress() {
    // Test that a persisted run resumes each block at its stored offset
    let script = Script {
        ranges: true,
        ..Script::default()
    };
    let store = Arc::new(MemoryStore::new());
    let h = harness(8_000, script, Arc::clone(&store) as Arc<dyn DownloadStore>);

    // an earlier run wrote 1500 bytes of block 0 and nothing of block 1
    let (earlier, _) = h.request(100);
    let (blocks, size) = crate::app::block::plan_blocks(earlier.primary_source(), 8_000, 2);
    earlier.set_total_length(8_000);
    earlier.set_block_size(size);
    earlier.set_block_requests(
        blocks
            .into_iter()
            .map(|b| {
                let done = if b.index() == 0 { 1_500 } else { 0 };
                Arc::new(crate::app::request::BlockRequest::new(b, &earlier, done))
            })
            .collect(),
    );
    let persisted = crate::app::store::PersistedRequest::from_request(&earlier);
    store.upsert_request(&persisted).await.unwrap();
    store.upsert_blocks(&persisted).await.unwrap();
    let mut partial = vec![0u8; 8_000];
    partial[..1_500].copy_from_slice(&h.content[..1_500]);
    std::fs::write(earlier.temp_path(), &partial).unwrap();

    let (request, mut rx) = h.request(200);
    h.dispatcher.enqueue(&request).unwrap();
    let events = until_terminal(&mut rx).await;
    assert!(matches!(
        events.last(),
        Some(DownloadEvent::Completed { request_id: 100 })
    ));
    assert_eq!(request.id(), 100);

    let mut connects = h.script.connects.lock().unwrap().clone();
    connects.sort();
    assert_eq!(connects, vec![(1_500, Some(3_999)), (4_000, Some(7_999))]);
    assert_eq!(std::fs::read(request.destination()).unwrap(), *h.content);
    assert!(store.get_all_requests().await.unwrap().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_changed_length_discards_persisted_run() {
    // Test that a different remote length starts over
    let script = Script {
        ranges: true,
        ..Script::default()
    };
    let store = Arc::new(MemoryStore::new());
    let h = harness(6_000, script, Arc::clone(&store) as Arc<dyn DownloadStore>);

    let (earlier, _) = h.request(300);
    let (blocks, size) = crate::app::block::plan_blocks(earlier.primary_source(), 5_000, 2);
    earlier.set_total_length(5_000);
    earlier.set_block_size(size);
    earlier.set_block_requests(
        blocks
            .into_iter()
            .map(|b| Arc::new(crate::app::request::BlockRequest::new(b, &earlier, 100)))
            .collect(),
    );
    let persisted = crate::app::store::PersistedRequest::from_request(&earlier);
    store.upsert_request(&persisted).await.unwrap();
    store.upsert_blocks(&persisted).await.unwrap();
    std::fs::write(earlier.temp_path(), vec![0u8; 5_000]).unwrap();

    let (request, mut rx) = h.request(400);
    h.dispatcher.enqueue(&request).unwrap();
    let events = until_terminal(&mut rx).await;
    assert!(matches!(
        events.last(),
        Some(DownloadEvent::Completed { request_id: 400 })
    ));

    let mut connects = h.script.connects.lock().unwrap().clone();
    connects.sort();
    assert_eq!(connects, vec![(0, Some(2_999)), (3_000, Some(5_999))]);
    assert_eq!(std::fs::read(request.destination()).unwrap(), *h.content);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_shutdown_refuses_new_work() {
    // Test that a shut down dispatcher rejects requests
    let h = harness(100, Script::default(), Arc::new(NoStore));
    h.dispatcher.shutdown(Duration::from_secs(2)).await;

    let (request, mut rx) = h.request(9);
    assert!(matches!(
        h.dispatcher.enqueue(&request),
        Err(DownloadError::ShuttingDown)
    ));
    assert!(h.dispatcher.in_flight().is_empty());
    assert_eq!(request.state(), RequestState::Failed);

    // the listener still hears about the refusal, once
    match rx.try_recv() {
        Ok(DownloadEvent::Failed {
            request_id: 9,
            block: None,
            error,
        }) => assert!(matches!(*error, DownloadError::ShuttingDown)),
        other => panic!("expected a failure, got {:?}", other),
    }
    assert!(rx.try_recv().is_err());
}

/// Wait until no request is registered
async fn until_idle(dispatcher: &Dispatcher) {
    tokio::time::timeout(Duration::from_secs(10), async {
        while !dispatcher.in_flight().is_empty() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("registry drained in time");
}

async fn persisted(store: &MemoryStore) -> PersistedRequest {
    store
        .query_by_urls(&[URL.to_string()])
        .await
        .unwrap()
        .expect("persisted request")
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_checkpoints_reach_the_store() {
    // Test that a transfer's own checkpoints persist its byte counts
    let script = Script {
        ranges: true,
        failures: AtomicU32::new(u32::MAX),
        ..Script::default()
    };
    let store = Arc::new(MemoryStore::new());
    let h = harness(10_000, script, Arc::clone(&store) as Arc<dyn DownloadStore>);
    let (request, mut rx) = h.request(20);
    h.dispatcher.enqueue(&request).unwrap();

    let events = until_terminal(&mut rx).await;
    assert!(matches!(events.last(), Some(DownloadEvent::Failed { .. })));
    until_idle(&h.dispatcher).await;

    let rows = persisted(&store).await;
    assert_eq!(rows.blocks.len(), 2);
    for (row, block) in rows.blocks.iter().zip(request.block_requests()) {
        assert_eq!(row.index, block.index());
        assert_eq!(row.downloaded_bytes, block.downloaded());
        assert!(row.downloaded_bytes < block.block().size());
    }
    assert!(rows.blocks.iter().any(|row| row.downloaded_bytes > 0));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_no_range_support_keeps_progress_out_of_store() {
    // Test that bytes from a 200-only server are never recorded as resumable
    let script = Script {
        failures: AtomicU32::new(1),
        ..Script::default()
    };
    let store = Arc::new(MemoryStore::new());
    let h = harness(10_000, script, Arc::clone(&store) as Arc<dyn DownloadStore>);
    let (request, mut rx) = h.request(21);
    h.dispatcher.enqueue(&request).unwrap();

    // the retry cannot resume at byte 5000 without ranges
    let events = until_terminal(&mut rx).await;
    match events.last() {
        Some(DownloadEvent::Failed { error, .. }) => {
            assert!(matches!(**error, DownloadError::RangeIgnored { .. }));
        }
        other => panic!("expected a failure, got {:?}", other),
    }
    until_idle(&h.dispatcher).await;

    assert_eq!(request.block_requests()[0].downloaded(), 5_000);
    let rows = persisted(&store).await;
    assert_eq!(rows.blocks.len(), 1);
    assert_eq!(rows.blocks[0].downloaded_bytes, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_interrupted_run_resumes_on_new_dispatcher() {
    // Test a failed run picked up by a later dispatcher from its checkpoints
    let script = Script {
        ranges: true,
        failures: AtomicU32::new(u32::MAX),
        ..Script::default()
    };
    let store = Arc::new(MemoryStore::new());
    let h = harness(10_000, script, Arc::clone(&store) as Arc<dyn DownloadStore>);
    let (first, mut rx) = h.request(30);
    h.dispatcher.enqueue(&first).unwrap();
    let events = until_terminal(&mut rx).await;
    assert!(matches!(events.last(), Some(DownloadEvent::Failed { .. })));
    until_idle(&h.dispatcher).await;
    h.dispatcher.shutdown(Duration::from_secs(2)).await;

    let mut expected: Vec<_> = first
        .block_requests()
        .iter()
        .map(|b| (b.resume_offset(), Some(b.block().end())))
        .collect();
    expected.sort();

    let healthy = Arc::new(Script {
        ranges: true,
        ..Script::default()
    });
    let factory = Arc::new(MemoryFactory {
        content: Arc::clone(&h.content),
        script: Arc::clone(&healthy),
    });
    let resumed = Dispatcher::new(
        h.dispatcher.config().clone(),
        Arc::clone(&store) as Arc<dyn DownloadStore>,
        factory,
    );

    let (second, mut rx) = h.request(31);
    resumed.enqueue(&second).unwrap();
    let events = until_terminal(&mut rx).await;
    assert!(matches!(
        events.last(),
        Some(DownloadEvent::Completed { request_id: 30 })
    ));

    let mut connects = healthy.connects.lock().unwrap().clone();
    connects.sort();
    assert_eq!(connects, expected);
    assert_eq!(std::fs::read(second.destination()).unwrap(), *h.content);
    assert!(store.get_all_requests().await.unwrap().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_panicked_task_still_lets_cancel_settle() {
    // Test that a task lost to a panic is still counted done
    let script = Script {
        panic_on_connect: true,
        ..Script::default()
    };
    let h = harness(1_000, script, Arc::new(NoStore));
    let (request, mut rx) = h.request(40);
    h.dispatcher.enqueue(&request).unwrap();

    tokio::time::timeout(Duration::from_secs(10), async {
        while h.script.connects.lock().unwrap().is_empty() || request.outstanding_tasks() > 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("panicked task accounted for");

    assert!(h.dispatcher.cancel_request(&request, false).await);
    let events = until_terminal(&mut rx).await;
    assert!(matches!(
        events.last(),
        Some(DownloadEvent::Cancelled { request_id: 40 })
    ));
    assert!(h.dispatcher.in_flight().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_failed_request_stays_registered_until_siblings_unwind() {
    // Test that a resubmission cannot adopt a run still being checkpointed
    let script = Script {
        ranges: true,
        reject: Some(5_000),
        hold: Some(0),
        ..Script::default()
    };
    let h = harness(10_000, script, Arc::new(NoStore));
    let (request, mut rx) = h.request(50);
    h.dispatcher.enqueue(&request).unwrap();

    let events = until_terminal(&mut rx).await;
    match events.last() {
        Some(DownloadEvent::Failed { block: Some(block), .. }) => assert_eq!(block.index(), 1),
        other => panic!("expected a block failure, got {:?}", other),
    }

    // block 0 is still connecting
    assert_eq!(h.dispatcher.in_flight().len(), 1);
    let (again, _rx) = h.request(51);
    assert!(!h.dispatcher.enqueue(&again).unwrap());

    h.script.release.notify_one();
    until_idle(&h.dispatcher).await;
    assert_eq!(request.outstanding_tasks(), 0);
}

