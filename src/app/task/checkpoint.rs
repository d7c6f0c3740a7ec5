//! When a block transfer makes its progress durable

use std::time::{Duration, Instant};

/// Decides when a running transfer checkpoints
///
/// The first write of a task always checkpoints. After that a checkpoint is
/// due once at least `min_bytes` were written since the last one and at
/// least `min_interval` has passed. The policy also remembers the block's
/// byte count at the last successful checkpoint, the most a retry may trust.
#[derive(Debug, Clone)]
pub struct CheckpointPolicy {
    min_bytes: u64,
    min_interval: Duration,
    pending: u64,
    last: Option<Instant>,
    durable: u64,
}

impl CheckpointPolicy {
    /// `durable` is the block's byte count already on disk
    pub fn new(min_bytes: u64, min_interval: Duration, durable: u64) -> Self {
        Self {
            min_bytes,
            min_interval,
            pending: 0,
            last: None,
            durable,
        }
    }

    /// Account for `bytes` written
    pub fn record(&mut self, bytes: u64) {
        self.pending += bytes;
    }

    pub fn is_due(&self) -> bool {
        self.is_due_at(Instant::now())
    }

    pub fn is_due_at(&self, now: Instant) -> bool {
        match self.last {
            None => true,
            Some(last) => {
                self.pending >= self.min_bytes
                    && now.saturating_duration_since(last) >= self.min_interval
            }
        }
    }

    /// A checkpoint made `durable` bytes of the block safe at `now`
    pub fn mark_at(&mut self, now: Instant, durable: u64) {
        self.pending = 0;
        self.last = Some(now);
        self.durable = durable;
    }

    pub fn mark(&mut self, durable: u64) {
        self.mark_at(Instant::now(), durable);
    }

    /// Block bytes known to be flushed and synced
    pub fn durable(&self) -> u64 {
        self.durable
    }

    /// Bytes written since the last checkpoint
    pub fn pending(&self) -> u64 {
        self.pending
    }
}
