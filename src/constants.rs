//! Application constants for blockfetch
//!
//! This module centralizes the constants used throughout the engine,
//! organized by functional domain.

use std::time::Duration;

/// HTTP protocol constants
pub mod http {
    use super::Duration;

    /// Default user agent for all HTTP requests
    pub const USER_AGENT: &str = concat!("blockfetch/", env!("CARGO_PKG_VERSION"));

    /// Maximum number of redirect hops followed per call
    pub const MAX_REDIRECTS: usize = 3;

    /// Default connection establishment timeout
    pub const CONNECT_TIMEOUT: Duration = Duration::from_millis(8_000);

    /// Default timeout for a single read
    pub const READ_TIMEOUT: Duration = Duration::from_millis(8_000);

    /// Status codes that are followed as redirects
    pub const REDIRECT_CODES: [u16; 6] = [300, 301, 302, 303, 307, 308];

    /// Idle pooled connections are dropped after this long
    pub const POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(90);

    /// Pooled idle connections kept per host
    pub const POOL_MAX_PER_HOST: usize = 16;

    /// TCP keep-alive interval
    pub const TCP_KEEPALIVE: Duration = Duration::from_secs(30);
}

/// Transfer and splitting limits
pub mod limits {
    /// Default retry budget per block
    pub const MAX_RETRIES: u32 = 2;

    /// Default I/O buffer size in bytes
    pub const BUFFER_SIZE: usize = 8_192;

    /// Files smaller than this are never split
    pub const MIN_BLOCK_SIZE: u64 = 16 * 1024 * 1024;

    /// Upper bound on blocks per request
    pub const MAX_BLOCK_COUNT: usize = 16;

    /// Default cap on queued tasks across both pools
    pub const MAX_TASK_COUNT: usize = 10_000;
}

/// Checkpoint cadence for block transfers
pub mod checkpoint {
    use super::Duration;

    /// Bytes that must be written since the last checkpoint
    pub const MIN_BYTES: u64 = 64 * 1024;

    /// Time that must elapse since the last checkpoint
    pub const MIN_INTERVAL: Duration = Duration::from_millis(2_000);
}

/// Worker pool configuration
pub mod workers {
    use super::Duration;

    /// Maximum transfer workers
    pub const DEFAULT_THREAD_COUNT: usize = 4;

    /// Blocks a single request is split into
    pub const DEFAULT_THREADS_PER_REQUEST: usize = 2;

    /// Transfer workers kept alive while idle
    pub const CORE_TRANSFER_WORKERS: usize = 2;

    /// Preparation is serialized onto one worker
    pub const PREPARE_WORKERS: usize = 1;

    /// Idle time after which workers above the core exit
    pub const KEEP_ALIVE: Duration = Duration::from_secs(10);

    /// Grace period the CLI gives workers to checkpoint on shutdown
    pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);
}

/// File system constants
pub mod files {
    /// Suffix appended to the destination name for the in-progress file
    pub const TEMP_FILE_SUFFIX: &str = ".tmp";

    /// Directory name under the platform config dir
    pub const CONFIG_DIR_NAME: &str = "blockfetch";

    /// Default configuration file name
    pub const CONFIG_FILE_NAME: &str = "config.toml";

    /// Default JSON store file name
    pub const STORE_FILE_NAME: &str = "downloads.json";
}

pub use checkpoint::{MIN_BYTES as CHECKPOINT_MIN_BYTES, MIN_INTERVAL as CHECKPOINT_INTERVAL};
pub use http::{MAX_REDIRECTS, USER_AGENT};
pub use workers::DEFAULT_THREAD_COUNT;
