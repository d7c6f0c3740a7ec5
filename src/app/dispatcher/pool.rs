//! Priority task pools
//!
//! A [`TaskPool`] runs boxed futures on a bounded set of tokio worker tasks.
//! Ready tasks wait in a binary heap and are taken highest priority first,
//! then by request submission order, block index and finally the order in
//! which they were queued, so equal keys never starve each other.
//!
//! The pool keeps `min_workers` workers alive and grows up to `max_workers`
//! while more tasks are queued than workers are idle. Workers above the
//! minimum exit after `keep_alive` without work.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures::FutureExt;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::app::request::Priority;
use crate::errors::{DownloadError, DownloadResult};

/// Unit of work run by a pool
pub(crate) type Job = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Scheduling key of a queued task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskKey {
    pub priority: Priority,
    pub submission: u64,
    pub block: u32,
}

impl TaskKey {
    pub fn new(priority: Priority, submission: u64, block: u32) -> Self {
        Self {
            priority,
            submission,
            block,
        }
    }
}

impl Ord for TaskKey {
    /// Greater means dequeued first
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.submission.cmp(&self.submission))
            .then_with(|| other.block.cmp(&self.block))
    }
}

impl PartialOrd for TaskKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

struct QueuedTask {
    key: TaskKey,
    seq: u64,
    job: Job,
}

impl PartialEq for QueuedTask {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for QueuedTask {}

impl PartialOrd for QueuedTask {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedTask {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key
            .cmp(&other.key)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// Sizing of one pool
#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub name: &'static str,
    pub min_workers: usize,
    pub max_workers: usize,
    pub keep_alive: Duration,
    /// Queued task limit, zero means unbounded
    pub capacity: usize,
}

#[derive(Default)]
struct PoolState {
    queue: BinaryHeap<QueuedTask>,
    next_seq: u64,
    workers: usize,
    idle: usize,
    accepting: bool,
    handles: Vec<JoinHandle<()>>,
}

struct Shared {
    config: PoolConfig,
    state: Mutex<PoolState>,
    notify: Notify,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Bounded pool of workers draining a priority queue
pub struct TaskPool {
    shared: Arc<Shared>,
}

impl TaskPool {
    /// Create the pool and spawn its minimum workers
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(config: PoolConfig) -> Self {
        let min = config.min_workers.min(config.max_workers);
        let pool = Self {
            shared: Arc::new(Shared {
                config,
                state: Mutex::new(PoolState {
                    accepting: true,
                    ..PoolState::default()
                }),
                notify: Notify::new(),
            }),
        };

        {
            let mut state = pool.shared.lock();
            for _ in 0..min {
                state.workers += 1;
                let handle = spawn_worker(Arc::clone(&pool.shared));
                state.handles.push(handle);
            }
        }

        debug!(
            "Pool {} started with {} workers (max {})",
            pool.shared.config.name, min, pool.shared.config.max_workers
        );
        pool
    }

    /// Queue a task, growing the pool when every worker is busy
    pub fn submit<F>(&self, key: TaskKey, job: F) -> DownloadResult<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let config = &self.shared.config;
        {
            let mut state = self.shared.lock();
            if !state.accepting {
                return Err(DownloadError::ShuttingDown);
            }
            if config.capacity > 0 && state.queue.len() >= config.capacity {
                return Err(DownloadError::QueueOverflow {
                    capacity: config.capacity,
                });
            }

            let seq = state.next_seq;
            state.next_seq += 1;
            state.queue.push(QueuedTask {
                key,
                seq,
                job: Box::pin(job),
            });

            if state.queue.len() > state.idle && state.workers < config.max_workers {
                state.workers += 1;
                state.handles.retain(|h| !h.is_finished());
                let handle = spawn_worker(Arc::clone(&self.shared));
                state.handles.push(handle);
                debug!("Pool {} grew to {} workers", config.name, state.workers);
            }
        }

        self.shared.notify.notify_one();
        Ok(())
    }

    /// Tasks waiting for a worker
    pub fn queued(&self) -> usize {
        self.shared.lock().queue.len()
    }

    /// Live workers
    pub fn workers(&self) -> usize {
        self.shared.lock().workers
    }

    /// Stop accepting tasks; queued tasks still run
    pub fn close(&self) {
        self.shared.lock().accepting = false;
        self.shared.notify.notify_waiters();
    }

    /// Wait for workers to drain the queue and exit
    ///
    /// Workers still running after `grace` are aborted.
    pub async fn join(&self, grace: Duration) {
        self.close();
        let handles = std::mem::take(&mut self.shared.lock().handles);
        let aborts: Vec<_> = handles.iter().map(JoinHandle::abort_handle).collect();
        let name = self.shared.config.name;

        if tokio::time::timeout(grace, futures::future::join_all(handles))
            .await
            .is_err()
        {
            warn!("Pool {} did not drain within {:?}, aborting", name, grace);
            for handle in aborts {
                handle.abort();
            }
        }
        info!("Pool {} stopped", name);
    }
}

impl std::fmt::Debug for TaskPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.shared.lock();
        f.debug_struct("TaskPool")
            .field("name", &self.shared.config.name)
            .field("workers", &state.workers)
            .field("idle", &state.idle)
            .field("queued", &state.queue.len())
            .field("accepting", &state.accepting)
            .finish()
    }
}

fn spawn_worker(shared: Arc<Shared>) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(job) = next_job(&shared).await {
            if AssertUnwindSafe(job).catch_unwind().await.is_err() {
                error!("Task panicked in pool {}", shared.config.name);
            }
        }
        debug!("Worker of pool {} exiting", shared.config.name);
    })
}

/// Wait for the next task; None tells the worker to exit
async fn next_job(shared: &Shared) -> Option<Job> {
    let config = &shared.config;
    let mut waiting = false;

    loop {
        let notified = shared.notify.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();

        {
            let mut state = shared.lock();
            if waiting {
                state.idle -= 1;
                waiting = false;
            }
            if let Some(task) = state.queue.pop() {
                return Some(task.job);
            }
            if !state.accepting {
                state.workers -= 1;
                return None;
            }
            state.idle += 1;
            waiting = true;
        }

        if tokio::time::timeout(config.keep_alive, notified).await.is_err() {
            let mut state = shared.lock();
            state.idle -= 1;
            waiting = false;
            if state.workers > config.min_workers && state.queue.is_empty() {
                state.workers -= 1;
                return None;
            }
        }
    }
}
