//! Scheduling of preparation and block transfers
//!
//! This module provides the [`Dispatcher`] with its two pools and the
//! configuration that sizes them:
//!
//! - `config`: [`DownloaderConfig`], its builder and presets
//! - `pool`: priority-ordered worker pools on tokio tasks
//! - `core`: registry of in-flight requests and outcome aggregation
//!
//! Submission never blocks: `enqueue` only registers the request and queues
//! its preparation. Within a pool tasks are taken by request priority, then
//! submission order, so equal priorities are served first come first served.

pub mod config;
pub mod core;
pub mod pool;

pub use self::core::Dispatcher;
pub use config::{ConfigPresets, DownloaderConfig, DownloaderConfigBuilder};
pub use pool::{PoolConfig, TaskKey, TaskPool};

#[cfg(test)]
mod tests;
