//! One-shot tasks run by the dispatcher's pools
//!
//! - `prepare`: length query, resume detection, block planning
//! - `transfer`: chunked block I/O with checkpoints and retries
//! - `checkpoint`: when a running transfer makes its progress durable

pub mod checkpoint;
pub(crate) mod prepare;
pub(crate) mod transfer;

pub use checkpoint::CheckpointPolicy;
