//! Downloader configuration management
//!
//! This module provides the configuration of the dispatcher, its pools and
//! the transfer tasks, validated eagerly so a bad value fails at
//! construction rather than in the middle of a transfer.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants::{checkpoint, http, limits, workers};
use crate::errors::{ConfigError, ConfigResult};

/// Configuration for the download engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DownloaderConfig {
    /// Default connect timeout for new HTTP sources, zero disables it
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,
    /// Default per-read timeout for new HTTP sources, zero disables it
    #[serde(with = "humantime_serde")]
    pub read_timeout: Duration,
    /// Default retry budget per block
    pub max_retry_times: u32,
    /// I/O buffer size in bytes
    pub buffer_size: usize,
    /// Maximum transfer workers
    pub thread_count: usize,
    /// Transfer workers kept alive while idle
    pub core_thread_count: usize,
    /// Blocks a resumable request is split into
    pub threads_per_request: usize,
    /// Queued task limit per pool, zero means unbounded
    pub max_task_count: usize,
    /// Files below this size are never split
    pub min_block_size: u64,
    /// Upper bound on blocks per request
    pub max_block_count: usize,
    /// Idle time before workers above the core exit
    #[serde(with = "humantime_serde")]
    pub keep_alive: Duration,
    /// Bytes written between periodic checkpoints
    pub checkpoint_bytes: u64,
    /// Time elapsed between periodic checkpoints
    #[serde(with = "humantime_serde")]
    pub checkpoint_interval: Duration,
}

impl Default for DownloaderConfig {
    fn default() -> Self {
        Self {
            connect_timeout: http::CONNECT_TIMEOUT,
            read_timeout: http::READ_TIMEOUT,
            max_retry_times: limits::MAX_RETRIES,
            buffer_size: limits::BUFFER_SIZE,
            thread_count: workers::DEFAULT_THREAD_COUNT,
            core_thread_count: workers::CORE_TRANSFER_WORKERS,
            threads_per_request: workers::DEFAULT_THREADS_PER_REQUEST,
            max_task_count: limits::MAX_TASK_COUNT,
            min_block_size: limits::MIN_BLOCK_SIZE,
            max_block_count: limits::MAX_BLOCK_COUNT,
            keep_alive: workers::KEEP_ALIVE,
            checkpoint_bytes: checkpoint::MIN_BYTES,
            checkpoint_interval: checkpoint::MIN_INTERVAL,
        }
    }
}

impl DownloaderConfig {
    /// Validate configuration values and return errors for invalid settings
    pub fn validate(&self) -> ConfigResult<()> {
        if self.buffer_size == 0 {
            return Err(ConfigError::invalid(
                "buffer_size",
                self.buffer_size,
                "Buffer size must be greater than zero",
            ));
        }

        if self.thread_count == 0 {
            return Err(ConfigError::invalid(
                "thread_count",
                self.thread_count,
                "At least one transfer thread is required",
            ));
        }

        if self.threads_per_request == 0 || self.threads_per_request > self.thread_count {
            return Err(ConfigError::invalid(
                "threads_per_request",
                self.threads_per_request,
                format!("Must be between 1 and thread_count ({})", self.thread_count),
            ));
        }

        if self.core_thread_count > self.thread_count {
            return Err(ConfigError::invalid(
                "core_thread_count",
                self.core_thread_count,
                format!("Cannot exceed thread_count ({})", self.thread_count),
            ));
        }

        if self.min_block_size == 0 {
            return Err(ConfigError::invalid(
                "min_block_size",
                self.min_block_size,
                "Minimum block size must be greater than zero",
            ));
        }

        if self.max_block_count == 0 {
            return Err(ConfigError::invalid(
                "max_block_count",
                self.max_block_count,
                "At least one block per request is required",
            ));
        }

        Ok(())
    }
}

/// Builder for DownloaderConfig following the established pattern
#[derive(Debug, Default)]
pub struct DownloaderConfigBuilder {
    config: DownloaderConfig,
}

impl DownloaderConfigBuilder {
    /// Create a new builder with default values
    pub fn new() -> Self {
        Self {
            config: DownloaderConfig::default(),
        }
    }

    /// Start from an existing configuration
    pub fn from_config(config: DownloaderConfig) -> Self {
        Self { config }
    }

    /// Set connect and read timeouts for new sources
    pub fn timeouts(mut self, connect: Duration, read: Duration) -> Self {
        self.config.connect_timeout = connect;
        self.config.read_timeout = read;
        self
    }

    /// Set the default retry budget per block
    pub fn max_retry_times(mut self, retries: u32) -> Self {
        self.config.max_retry_times = retries;
        self
    }

    /// Set the I/O buffer size
    pub fn buffer_size(mut self, size: usize) -> Self {
        self.config.buffer_size = size;
        self
    }

    /// Set the maximum number of transfer workers
    pub fn thread_count(mut self, count: usize) -> Self {
        self.config.thread_count = count;
        self.config.core_thread_count = self.config.core_thread_count.min(count);
        self
    }

    /// Set the number of transfer workers kept while idle
    pub fn core_thread_count(mut self, count: usize) -> Self {
        self.config.core_thread_count = count;
        self
    }

    /// Set the number of blocks per resumable request
    pub fn threads_per_request(mut self, count: usize) -> Self {
        self.config.threads_per_request = count;
        self
    }

    /// Set the queued task limit, zero for unbounded
    pub fn max_task_count(mut self, count: usize) -> Self {
        self.config.max_task_count = count;
        self
    }

    /// Set the size below which files are not split
    pub fn min_block_size(mut self, size: u64) -> Self {
        self.config.min_block_size = size;
        self
    }

    /// Set the maximum number of blocks per request
    pub fn max_block_count(mut self, count: usize) -> Self {
        self.config.max_block_count = count;
        self
    }

    /// Set the idle keep-alive of extra workers
    pub fn keep_alive(mut self, keep_alive: Duration) -> Self {
        self.config.keep_alive = keep_alive;
        self
    }

    /// Set the periodic checkpoint thresholds
    pub fn checkpoint(mut self, bytes: u64, interval: Duration) -> Self {
        self.config.checkpoint_bytes = bytes;
        self.config.checkpoint_interval = interval;
        self
    }

    /// Build and validate the configuration
    pub fn build(self) -> ConfigResult<DownloaderConfig> {
        self.config.validate()?;
        Ok(self.config)
    }

    /// Build without validation (for testing)
    pub fn build_unchecked(self) -> DownloaderConfig {
        self.config
    }
}

/// Preset configurations for common scenarios
pub struct ConfigPresets;

impl ConfigPresets {
    /// Defaults, suited to large files over real networks
    pub fn production() -> DownloaderConfig {
        DownloaderConfig::default()
    }

    /// Small blocks and short timers for tests
    pub fn testing() -> DownloaderConfig {
        DownloaderConfig {
            connect_timeout: Duration::from_secs(2),
            read_timeout: Duration::from_secs(5),
            buffer_size: 1024,
            min_block_size: 1024,
            keep_alive: Duration::from_millis(200),
            checkpoint_interval: Duration::from_millis(50),
            ..DownloaderConfig::default()
        }
    }
}
